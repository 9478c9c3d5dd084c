//! File transfer over SFTP with `scp`-like destination handling.
//!
//! When the destination is an existing directory the source's name is
//! appended; recursive mode copies whole trees and a directory is refused
//! without it. Every transfer is validated afterwards, see [`validate`].

pub mod checksum;
pub mod validate;

pub use validate::{ResolvedPaths, TransferKind, resolve_paths, validate_transfer};

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use walkdir::WalkDir;

use crate::error::{Result, TransferError};

const CHUNK_SIZE: usize = 32 * 1024;

const PROGRESS_TEMPLATE: &str = "{msg} is transferring. Progress: {percent}%";

/// Final component of a `/`-separated remote path.
pub(crate) fn remote_basename(remote: &str) -> &str {
    let trimmed = remote.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Join `name` onto a `/`-separated remote directory path.
pub(crate) fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() && !name.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn progress_bar(name: &str, size: u64, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(size);
    if let Ok(style) = ProgressStyle::with_template(PROGRESS_TEMPLATE) {
        bar.set_style(style);
    }
    bar.set_message(name.to_string());
    bar
}

fn local_io(path: &Path) -> impl Fn(std::io::Error) -> TransferError + '_ {
    move |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn remote_is_dir(sftp: &SftpSession, path: &str) -> bool {
    match sftp.metadata(path).await {
        Ok(metadata) => metadata.is_dir(),
        Err(_) => false,
    }
}

/// Copy `local` to `remote` on the device.
pub async fn upload(
    sftp: &SftpSession,
    local: &Path,
    remote: &str,
    recursive: bool,
    progress: bool,
) -> Result<()> {
    let metadata = tokio::fs::metadata(local).await.map_err(local_io(local))?;
    if metadata.is_dir() && !recursive {
        return Err(TransferError::Refused(format!(
            "{} is a directory (use recursive mode)",
            local.display()
        ))
        .into());
    }

    let name = local_name(local);
    let target = if remote_is_dir(sftp, remote).await {
        join_remote(remote, &name)
    } else {
        remote.to_string()
    };

    if metadata.is_file() {
        return upload_file(sftp, local, &target, progress).await;
    }

    // Sorted so parents are created before their contents.
    let entries: Vec<_> = WalkDir::new(local)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e: walkdir::Error| TransferError::Io {
            path: local.to_path_buf(),
            source: e.into(),
        })?;

    for entry in entries {
        let relative = entry.path().strip_prefix(local).unwrap_or(entry.path());
        let remote_path = relative
            .components()
            .fold(target.clone(), |acc, c| join_remote(&acc, &c.as_os_str().to_string_lossy()));

        if entry.file_type().is_dir() {
            if !sftp.try_exists(remote_path.as_str()).await.map_err(TransferError::Sftp)? {
                debug!("Creating remote directory {}", remote_path);
                sftp.create_dir(remote_path.as_str()).await.map_err(TransferError::Sftp)?;
            }
        } else if entry.file_type().is_file() {
            upload_file(sftp, entry.path(), &remote_path, progress).await?;
        }
    }
    Ok(())
}

async fn upload_file(sftp: &SftpSession, local: &Path, remote: &str, progress: bool) -> Result<()> {
    debug!("Uploading {} to {}", local.display(), remote);
    let mut source = tokio::fs::File::open(local).await.map_err(local_io(local))?;
    let size = source.metadata().await.map_err(local_io(local))?.len();
    let mut sink = sftp.create(remote).await.map_err(TransferError::Sftp)?;

    let bar = progress_bar(&local_name(local), size, progress);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = source.read(&mut buf).await.map_err(local_io(local))?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await.map_err(remote_io(remote))?;
        bar.inc(n as u64);
    }
    sink.shutdown().await.map_err(remote_io(remote))?;
    bar.finish();
    Ok(())
}

/// Copy `remote` on the device to `local`.
pub async fn download(
    sftp: &SftpSession,
    remote: &str,
    local: &Path,
    recursive: bool,
    progress: bool,
) -> Result<()> {
    let is_dir = sftp.metadata(remote).await.map_err(TransferError::Sftp)?.is_dir();
    if is_dir && !recursive {
        return Err(TransferError::Refused(format!(
            "{} is a directory (use recursive mode)",
            remote
        ))
        .into());
    }

    let target = if local.is_dir() {
        local.join(remote_basename(remote))
    } else {
        local.to_path_buf()
    };

    if !is_dir {
        return download_file(sftp, remote, &target, progress).await;
    }

    let mut pending: Vec<(String, PathBuf)> = vec![(remote.to_string(), target)];
    while let Some((remote_dir, local_dir)) = pending.pop() {
        if !local_dir.is_dir() {
            debug!("Creating local directory {}", local_dir.display());
            tokio::fs::create_dir_all(&local_dir)
                .await
                .map_err(local_io(&local_dir))?;
        }

        let entries = sftp
            .read_dir(remote_dir.as_str())
            .await
            .map_err(TransferError::Sftp)?;
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let remote_path = join_remote(&remote_dir, &name);
            let local_path = local_dir.join(&name);
            if entry.file_type().is_dir() {
                pending.push((remote_path, local_path));
            } else {
                download_file(sftp, &remote_path, &local_path, progress).await?;
            }
        }
    }
    Ok(())
}

async fn download_file(sftp: &SftpSession, remote: &str, local: &Path, progress: bool) -> Result<()> {
    debug!("Downloading {} to {}", remote, local.display());
    let size = sftp
        .metadata(remote)
        .await
        .map_err(TransferError::Sftp)?
        .size
        .unwrap_or(0);
    let mut source = sftp.open(remote).await.map_err(TransferError::Sftp)?;
    let mut sink = tokio::fs::File::create(local).await.map_err(local_io(local))?;

    let bar = progress_bar(remote_basename(remote), size, progress);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = source.read(&mut buf).await.map_err(remote_io(remote))?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await.map_err(local_io(local))?;
        bar.inc(n as u64);
    }
    sink.flush().await.map_err(local_io(local))?;
    bar.finish();
    Ok(())
}

fn remote_io(remote: &str) -> impl Fn(std::io::Error) -> TransferError + '_ {
    move |source| TransferError::Io {
        path: PathBuf::from(remote),
        source,
    }
}

fn local_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_basename() {
        assert_eq!(remote_basename("/tmp/certs/"), "certs");
        assert_eq!(remote_basename("/tmp/a.txt"), "a.txt");
        assert_eq!(remote_basename("a.txt"), "a.txt");
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/tmp", "a.txt"), "/tmp/a.txt");
        assert_eq!(join_remote("/tmp/", "a.txt"), "/tmp/a.txt");
        assert_eq!(join_remote("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote(".", "a.txt"), "./a.txt");
    }

    #[test]
    fn test_hidden_progress_when_disabled() {
        assert!(progress_bar("a.txt", 10, false).is_hidden());
    }
}
