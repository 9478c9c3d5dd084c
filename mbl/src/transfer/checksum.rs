//! MD5 checksums of local files and parsing of remote `md5sum` output.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::Regex;

use crate::error::{Result, TransferError};

static DIGEST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("valid digest pattern"));

static LISTING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\\)?([0-9a-f]{32}) [ *](.+)$").expect("valid listing pattern"));

/// Hex MD5 of a local file's contents.
pub fn local_md5(path: &Path) -> Result<String> {
    let io_error = |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_error)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The digest from `md5sum <path>` output.
///
/// GNU md5sum prefixes the line with `\` when the file name needed escaping.
pub fn parse_md5sum(path: &str, output: &str) -> Result<String> {
    let digest = output.split_whitespace().next().unwrap_or_default();
    let digest = digest.strip_prefix('\\').unwrap_or(digest);
    if DIGEST.is_match(digest) {
        Ok(digest.to_string())
    } else {
        Err(TransferError::ChecksumOutput {
            path: path.to_string(),
            output: output.trim().to_string(),
        }
        .into())
    }
}

/// Relative path to digest map from `find . -type f -exec md5sum {} +` output.
///
/// Leading `./` is stripped and escaped names are unescaped; lines that are
/// not digest listings are ignored.
pub fn parse_md5sum_listing(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| LISTING_LINE.captures(line))
        .map(|caps| {
            let path = caps[3].strip_prefix("./").unwrap_or(&caps[3]);
            let path = if caps.get(1).is_some() {
                unescape_name(path)
            } else {
                path.to_string()
            };
            (path, caps[2].to_string())
        })
        .collect()
}

/// Undo md5sum's `\\` and `\n` escapes in a listed file name.
fn unescape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello\n").unwrap();
        assert_eq!(local_md5(&path).unwrap(), "b1946ac92492d2347c6235b4d2611184");

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(local_md5(&empty).unwrap(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_local_md5_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(local_md5(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_parse_md5sum() {
        let digest =
            parse_md5sum("/tmp/a", "b1946ac92492d2347c6235b4d2611184  /tmp/a\n").unwrap();
        assert_eq!(digest, "b1946ac92492d2347c6235b4d2611184");

        assert!(parse_md5sum("/tmp/a", "").is_err());
        assert!(parse_md5sum("/tmp/a", "md5sum: /tmp/a: Is a directory").is_err());
    }

    #[test]
    fn test_parse_listing() {
        let output = "\
b1946ac92492d2347c6235b4d2611184  ./a.txt
d41d8cd98f00b204e9800998ecf8427e  ./sub/dir/b file.bin
md5sum: ./unreadable: Permission denied
";
        let listing = parse_md5sum_listing(output);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing["a.txt"], "b1946ac92492d2347c6235b4d2611184");
        assert_eq!(listing["sub/dir/b file.bin"], "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_parse_escaped_names() {
        let digest = parse_md5sum(
            "/tmp/a\\b.txt",
            "\\9dd4e461268c8034f5c8564e155c67a6  /tmp/a\\\\b.txt\n",
        )
        .unwrap();
        assert_eq!(digest, "9dd4e461268c8034f5c8564e155c67a6");

        let output = "\
\\9dd4e461268c8034f5c8564e155c67a6  ./a\\\\b.txt
\\d41d8cd98f00b204e9800998ecf8427e  ./two\\nlines
";
        let listing = parse_md5sum_listing(output);
        assert_eq!(listing["a\\b.txt"], "9dd4e461268c8034f5c8564e155c67a6");
        assert_eq!(listing["two\nlines"], "d41d8cd98f00b204e9800998ecf8427e");
    }
}
