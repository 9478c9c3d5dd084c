//! Post-transfer validation.
//!
//! The paths a transfer was invoked with may name the copied object itself
//! or the directory it was copied into, on either side. [`resolve_paths`]
//! works out which, then [`validate_transfer`] compares MD5 checksums of
//! the local and remote copies.

use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use super::checksum::{local_md5, parse_md5sum, parse_md5sum_listing};
use super::{join_remote, remote_basename};
use crate::error::{FileMismatch, Result, TransferError};
use crate::session::{RemoteShell, check_exit};

/// Whether a resolved transfer is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    File,
    Directory,
}

/// The local and remote paths of the transferred object itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub local: PathBuf,
    pub remote: String,
    pub kind: TransferKind,
}

/// Work out which local and remote paths hold the transferred object.
///
/// Directory trees are only considered when `recursive` is set and `local`
/// is a directory.
pub async fn resolve_paths<S: RemoteShell>(
    shell: &mut S,
    local: &Path,
    remote: &str,
    recursive: bool,
) -> Result<ResolvedPaths> {
    let local = strip_trailing_separators(local);
    let remote = remote.trim_end_matches('/');
    let remote = if remote.is_empty() { "/" } else { remote };

    if recursive && local.is_dir() {
        resolve_directory(shell, &local, remote).await
    } else {
        resolve_file(shell, &local, remote).await
    }
}

async fn resolve_file<S: RemoteShell>(
    shell: &mut S,
    local: &Path,
    remote: &str,
) -> Result<ResolvedPaths> {
    let local_base = local_basename(local);
    let remote_base = remote_basename(remote);

    if local.is_dir() {
        let candidate = local.join(remote_base);
        if !candidate.is_file() {
            return Err(resolution_error(
                local,
                remote,
                format!("'{}' is not a file", candidate.display()),
            ));
        }
        return Ok(ResolvedPaths {
            local: candidate,
            remote: remote.to_string(),
            kind: TransferKind::File,
        });
    }

    if !local.is_file() {
        return Err(resolution_error(local, remote, "local path does not exist"));
    }

    let remote = if local_base != remote_base && remote_is_dir(shell, remote).await? {
        join_remote(remote, &local_base)
    } else {
        remote.to_string()
    };

    Ok(ResolvedPaths {
        local: local.to_path_buf(),
        remote,
        kind: TransferKind::File,
    })
}

async fn resolve_directory<S: RemoteShell>(
    shell: &mut S,
    local: &Path,
    remote: &str,
) -> Result<ResolvedPaths> {
    let local_base = local_basename(local);
    let remote_base = remote_basename(remote);

    let (local, remote) = if local_base == remote_base {
        (local.to_path_buf(), remote.to_string())
    } else if remote_lists(shell, remote, &local_base).await? {
        (local.to_path_buf(), join_remote(remote, &local_base))
    } else if local.join(remote_base).exists() {
        (local.join(remote_base), remote.to_string())
    } else {
        (local.to_path_buf(), remote.to_string())
    };

    let kind = if local.is_dir() {
        TransferKind::Directory
    } else {
        TransferKind::File
    };
    Ok(ResolvedPaths {
        local,
        remote,
        kind,
    })
}

async fn remote_is_dir<S: RemoteShell>(shell: &mut S, remote: &str) -> Result<bool> {
    let output = shell
        .run_cmd(&format!("test -d {}", shell_arg(remote)), false, false)
        .await?;
    Ok(output.is_success())
}

async fn remote_lists<S: RemoteShell>(shell: &mut S, remote: &str, name: &str) -> Result<bool> {
    let output = shell
        .run_cmd(&format!("ls -1A {}", shell_arg(remote)), false, false)
        .await?;
    Ok(output.is_success() && output.stdout_text().lines().any(|line| line == name))
}

/// Prove a completed transfer is identical on both ends.
///
/// Called with the same paths the transfer was invoked with. A single file
/// mismatch fails with [`TransferError::ChecksumMismatch`]; in a directory
/// tree every file is checked and all differences are reported together in
/// [`TransferError::TreeMismatch`].
pub async fn validate_transfer<S: RemoteShell>(
    shell: &mut S,
    local: &Path,
    remote: &str,
    recursive: bool,
) -> Result<()> {
    let resolved = resolve_paths(shell, local, remote, recursive).await?;
    debug!(
        "Validating {} against {} ({:?})",
        resolved.local.display(),
        resolved.remote,
        resolved.kind
    );

    match resolved.kind {
        TransferKind::File => validate_file(shell, &resolved.local, &resolved.remote).await,
        TransferKind::Directory => validate_tree(shell, &resolved.local, &resolved.remote).await,
    }
}

async fn validate_file<S: RemoteShell>(shell: &mut S, local: &Path, remote: &str) -> Result<()> {
    let mut remote = remote.to_string();
    let mut output = remote_md5sum(shell, &remote).await?;

    if !output.is_success() && output.stderr_text().contains("Is a directory") {
        remote = join_remote(&remote, &local_basename(local));
        output = remote_md5sum(shell, &remote).await?;
    }
    check_exit(&output)?;

    let remote_digest = parse_md5sum(&remote, &output.stdout_text())?;
    let local_digest = local_md5(local)?;

    if remote_digest != local_digest {
        return Err(TransferError::ChecksumMismatch {
            path: remote,
            remote: remote_digest,
            local: local_digest,
        }
        .into());
    }
    Ok(())
}

async fn remote_md5sum<S: RemoteShell>(
    shell: &mut S,
    remote: &str,
) -> Result<crate::session::CommandOutput> {
    shell
        .run_cmd(&format!("md5sum {}", shell_arg(remote)), false, false)
        .await
}

async fn validate_tree<S: RemoteShell>(shell: &mut S, local: &Path, remote: &str) -> Result<()> {
    let local_files = local_tree_digests(local)?;

    let command = format!(
        "cd {} && find . -type f -exec md5sum {{}} +",
        shell_arg(remote)
    );
    let output = shell.run_cmd(&command, true, false).await?;
    let remote_files = parse_md5sum_listing(&output.stdout_text());

    let mismatches: Vec<FileMismatch> = local_files
        .into_iter()
        .filter_map(|(path, local)| match remote_files.get(&path) {
            Some(remote) if *remote == local => None,
            remote => Some(FileMismatch {
                path,
                local,
                remote: remote.cloned(),
            }),
        })
        .collect();

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(TransferError::TreeMismatch {
            root: remote.to_string(),
            mismatches,
        }
        .into())
    }
}

/// `(relative path, digest)` for every regular file under `root`, in sorted
/// traversal order.
fn local_tree_digests(root: &Path) -> Result<Vec<(String, String)>> {
    let mut digests = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| TransferError::Io {
            path: root.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        digests.push((relative, local_md5(entry.path())?));
    }
    Ok(digests)
}

/// Quote `path` for a remote command line.
///
/// A leading `-` would be read as an option, and `test` does not accept
/// `--`, so such paths are anchored with `./` instead.
fn shell_arg(path: &str) -> String {
    if path.starts_with('-') {
        shell_words::quote(&format!("./{}", path)).into_owned()
    } else {
        shell_words::quote(path).into_owned()
    }
}

fn strip_trailing_separators(path: &Path) -> PathBuf {
    // Path already ignores trailing separators when splitting components.
    path.components().collect()
}

fn local_basename(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

fn resolution_error(local: &Path, remote: &str, reason: impl Into<String>) -> crate::Error {
    TransferError::PathResolution {
        local: local.to_path_buf(),
        remote: remote.to_string(),
        reason: reason.into(),
    }
    .into()
}
