//! SSH sessions to devices.
//!
//! [`SshSession`] runs commands, transfers files and starts interactive
//! shells over one connection. The [`RemoteShell`] and [`RemoteFiles`]
//! traits describe what the rest of the crate needs from a session, so
//! validation and provisioning logic can run against any implementation.

mod builder;
mod output;
mod shell;
mod ssh;

pub use builder::{DEFAULT_COMMAND_TIMEOUT, SessionBuilder};
pub use output::{CommandOutput, LineEcho};
pub use ssh::{SessionSettings, SshSession};

use std::future::Future;
use std::path::Path;

use futures_util::future::BoxFuture;
use log::warn;

use crate::device::Device;
use crate::error::{CommandError, Result};

/// Something that can run shell commands on a device.
pub trait RemoteShell: Send {
    /// Run `command`, optionally echoing output and failing on non-zero exit.
    fn run_cmd(
        &mut self,
        command: &str,
        check: bool,
        writeout: bool,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// A [`RemoteShell`] that can also copy files to and from the device.
pub trait RemoteFiles: RemoteShell {
    /// Copy `local` to `remote` and validate the copy.
    fn put(
        &mut self,
        local: &Path,
        remote: &str,
        recursive: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Copy `remote` to `local` and validate the copy.
    fn get(
        &mut self,
        remote: &str,
        local: &Path,
        recursive: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A resource with an explicit open/close lifecycle.
pub trait Closable: Send {
    fn open(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Fail with [`CommandError::Remote`] unless the command exited with 0.
///
/// The error message is the command's stderr, trimmed.
pub fn check_exit(output: &CommandOutput) -> Result<()> {
    if output.is_success() {
        return Ok(());
    }
    Err(CommandError::Remote {
        command: output.command.clone(),
        code: output.exit_status,
        message: output.stderr_text().trim().to_string(),
    }
    .into())
}

/// Open `resource`, run `body` with it, then close it.
///
/// `close` runs exactly once whether opening or the body succeeded or not.
/// An error from the body takes precedence over an error from closing.
pub async fn scoped<S, T, F>(resource: &mut S, body: F) -> Result<T>
where
    S: Closable,
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T>>,
{
    let outcome = match resource.open().await {
        Ok(()) => body(resource).await,
        Err(e) => Err(e),
    };
    let closed = resource.close().await;

    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_error)) => {
            warn!("Failed to close session after error: {}", close_error);
            Err(e)
        }
    }
}

/// Connect to `device` with default settings and run `body` with the session.
///
/// ```rust,no_run
/// use futures_util::FutureExt;
/// use mbl::device::Device;
/// use mbl::session::with_session;
///
/// # async fn example() -> Result<(), mbl::Error> {
/// let device = Device::new("", "192.168.1.20");
/// let output = with_session(device, |session| {
///     async move { session.run_cmd("hostname", true, false).await }.boxed()
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_session<T, F>(device: Device, body: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a mut SshSession) -> BoxFuture<'a, Result<T>>,
{
    let mut session = SessionBuilder::new(device).build();
    scoped(&mut session, body).await
}

/// In-process stand-ins for a device session.
#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;

    /// Runs "remote" commands through the local `sh`.
    pub struct LocalShell {
        pub commands: Vec<String>,
        cwd: Option<std::path::PathBuf>,
    }

    impl LocalShell {
        pub fn new() -> Self {
            Self {
                commands: Vec::new(),
                cwd: None,
            }
        }

        /// Run commands from `dir`, the way relative paths resolve against
        /// the login directory on a device.
        pub fn in_dir(dir: &Path) -> Self {
            Self {
                commands: Vec::new(),
                cwd: Some(dir.to_path_buf()),
            }
        }
    }

    impl RemoteShell for LocalShell {
        async fn run_cmd(
            &mut self,
            command: &str,
            check: bool,
            _writeout: bool,
        ) -> Result<CommandOutput> {
            self.commands.push(command.to_string());
            let mut sh = tokio::process::Command::new("sh");
            sh.arg("-c").arg(command);
            if let Some(dir) = &self.cwd {
                sh.current_dir(dir);
            }
            let out = sh
                .output()
                .await
                .expect("sh is available");
            let output = CommandOutput::new(
                command,
                out.stdout,
                out.stderr,
                out.status.code().map(|code| code as u32),
                Duration::ZERO,
            );
            if check {
                check_exit(&output)?;
            }
            Ok(output)
        }
    }

    /// A call made against [`RecordingSession`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Run(String),
        Put {
            local: String,
            remote: String,
            recursive: bool,
        },
        Get {
            remote: String,
            local: String,
            recursive: bool,
        },
    }

    /// Records every call; commands containing `fail_on` exit with status 3.
    pub struct RecordingSession {
        pub calls: Vec<Call>,
        pub fail_on: Option<String>,
        pub stdout: Vec<u8>,
    }

    impl RecordingSession {
        pub fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_on: None,
                stdout: Vec::new(),
            }
        }

        pub fn failing_on(pattern: &str) -> Self {
            Self {
                fail_on: Some(pattern.to_string()),
                ..Self::new()
            }
        }

        pub fn commands(&self) -> Vec<&str> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Run(command) => Some(command.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    impl RemoteShell for RecordingSession {
        async fn run_cmd(
            &mut self,
            command: &str,
            check: bool,
            _writeout: bool,
        ) -> Result<CommandOutput> {
            self.calls.push(Call::Run(command.to_string()));
            let failed = self
                .fail_on
                .as_deref()
                .is_some_and(|pattern| command.contains(pattern));
            let output = if failed {
                CommandOutput::new(command, Vec::new(), b"boom\n".to_vec(), Some(3), Duration::ZERO)
            } else {
                CommandOutput::new(command, self.stdout.clone(), Vec::new(), Some(0), Duration::ZERO)
            };
            if check {
                check_exit(&output)?;
            }
            Ok(output)
        }
    }

    impl RemoteFiles for RecordingSession {
        async fn put(&mut self, local: &Path, remote: &str, recursive: bool) -> Result<()> {
            self.calls.push(Call::Put {
                local: local.display().to_string(),
                remote: remote.to_string(),
                recursive,
            });
            Ok(())
        }

        async fn get(&mut self, remote: &str, local: &Path, recursive: bool) -> Result<()> {
            self.calls.push(Call::Get {
                remote: remote.to_string(),
                local: local.display().to_string(),
                recursive,
            });
            Ok(())
        }
    }
}
