//! SSH session to one device.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use russh_sftp::client::SftpSession;

use super::output::{CommandOutput, LineEcho};
use super::{Closable, RemoteFiles, RemoteShell, check_exit, shell};
use crate::device::Device;
use crate::error::{CommandError, Error, Result, TransportError};
use crate::transfer;
use crate::transport::{AuthMethod, HostKeyVerification, SshConfig, SshTransport};

/// Connection settings that are not part of the device record.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub host_key_verification: HostKeyVerification,
    pub known_hosts_path: Option<PathBuf>,
    /// Show transfer progress on the terminal.
    pub progress: bool,
}

enum SessionState {
    Unconnected,
    Connected(SshTransport),
    Closed,
}

/// An SSH session: `Unconnected -> Connected -> Closed`.
///
/// A closed session cannot be reopened. Use [`with_session`](super::with_session)
/// to guarantee the session is closed on every exit path.
pub struct SshSession {
    device: Device,
    settings: SessionSettings,
    state: SessionState,
}

impl SshSession {
    pub(crate) fn new(device: Device, settings: SessionSettings) -> Self {
        Self {
            device,
            settings,
            state: SessionState::Unconnected,
        }
    }

    /// The device this session talks to.
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected(_))
    }

    fn ssh_config(&self, host: &str) -> SshConfig {
        let (terminal_width, terminal_height) = shell::terminal_size();
        SshConfig {
            host: host.to_string(),
            port: self.settings.port,
            username: self.device.username.clone(),
            auth: AuthMethod::from_password(&self.device.password),
            timeout: self.settings.connect_timeout,
            terminal_width,
            terminal_height,
            host_key_verification: self.settings.host_key_verification.clone(),
            known_hosts_path: self.settings.known_hosts_path.clone(),
        }
    }

    /// Connect and authenticate.
    ///
    /// When the device has a hostname, `<hostname>.local` is tried first and
    /// the raw address is used only if that name does not resolve.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Unconnected => {}
            SessionState::Connected(_) => return Err(TransportError::AlreadyConnected.into()),
            SessionState::Closed => return Err(TransportError::Closed.into()),
        }

        let transport = match self.device.qualified_hostname() {
            Some(qualified) => match SshTransport::connect(self.ssh_config(&qualified)).await {
                Ok(transport) => transport,
                Err(Error::Transport(TransportError::Resolve { host, source })) => {
                    debug!("Could not resolve {} ({}), using {}", host, source, self.device.address);
                    SshTransport::connect(self.ssh_config(&self.device.address)).await?
                }
                Err(e) => return Err(e),
            },
            None => SshTransport::connect(self.ssh_config(&self.device.address)).await?,
        };

        self.state = SessionState::Connected(transport);
        Ok(())
    }

    /// Close the session. Closing an unconnected or closed session is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Connected(transport) => {
                debug!("Closing session to {}", self.device);
                transport.close().await
            }
            SessionState::Unconnected | SessionState::Closed => Ok(()),
        }
    }

    fn transport(&self) -> Result<&SshTransport> {
        match &self.state {
            SessionState::Connected(transport) => Ok(transport),
            SessionState::Unconnected => Err(TransportError::NotConnected.into()),
            SessionState::Closed => Err(TransportError::Closed.into()),
        }
    }

    /// Run `command` and collect its output.
    ///
    /// With `writeout`, stdout and stderr are echoed line by line as they
    /// arrive. With `check`, a non-zero exit status fails with
    /// [`CommandError::Remote`].
    pub async fn run_cmd(
        &mut self,
        command: &str,
        check: bool,
        writeout: bool,
    ) -> Result<CommandOutput> {
        let timeout = self.settings.command_timeout;
        let transport = self.transport()?;
        debug!("Running `{}` on {}", command, self.device);

        let start = Instant::now();
        let mut channel = transport.open_exec(command).await?;
        let (stdout, stderr, exit_status) =
            tokio::time::timeout(timeout, collect_output(&mut channel, writeout))
                .await
                .map_err(|_| CommandError::Timeout {
                    command: command.to_string(),
                    timeout,
                })?;

        let output = CommandOutput::new(command, stdout, stderr, exit_status, start.elapsed());
        trace!("`{}` exited with {:?} after {:?}", command, exit_status, output.elapsed);

        if check {
            check_exit(&output)?;
        }
        Ok(output)
    }

    /// Upload `local` to `remote`, then validate the copy.
    pub async fn put(&mut self, local: &Path, remote: &str, recursive: bool) -> Result<()> {
        let sftp = self.open_sftp().await?;
        let copied = transfer::upload(&sftp, local, remote, recursive, self.settings.progress).await;
        close_sftp(sftp).await;
        copied?;

        transfer::validate_transfer(self, local, remote, recursive).await
    }

    /// Download `remote` to `local`, then validate the copy.
    pub async fn get(&mut self, remote: &str, local: &Path, recursive: bool) -> Result<()> {
        let sftp = self.open_sftp().await?;
        let copied =
            transfer::download(&sftp, remote, local, recursive, self.settings.progress).await;
        close_sftp(sftp).await;
        copied?;

        transfer::validate_transfer(self, local, remote, recursive).await
    }

    async fn open_sftp(&self) -> Result<SftpSession> {
        self.transport()?.open_sftp().await
    }

    /// Attach the local terminal to a login shell on the device.
    ///
    /// Returns the shell's exit status if the server sent one.
    pub async fn start_shell(&mut self) -> Result<Option<u32>> {
        let (width, height) = shell::terminal_size();
        let channel = self.transport()?.open_shell(width, height).await?;
        shell::relay(channel).await
    }
}

async fn close_sftp(sftp: SftpSession) {
    if let Err(e) = sftp.close().await {
        debug!("Failed to close SFTP session: {}", e);
    }
}

/// Drain an exec channel until the server closes it.
async fn collect_output(
    channel: &mut Channel<Msg>,
    writeout: bool,
) -> (Vec<u8>, Vec<u8>, Option<u32>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;
    let mut stdout_echo = LineEcho::new();
    let mut stderr_echo = LineEcho::new();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => {
                stdout.extend_from_slice(data);
                if writeout {
                    echo(stdout_echo.push(data, &mut io::stdout()));
                }
            }
            ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                stderr.extend_from_slice(data);
                if writeout {
                    echo(stderr_echo.push(data, &mut io::stderr()));
                }
            }
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    if writeout {
        echo(stdout_echo.finish(&mut io::stdout()));
        echo(stderr_echo.finish(&mut io::stderr()));
    }
    (stdout, stderr, exit_status)
}

fn echo(result: io::Result<()>) {
    if let Err(e) = result {
        trace!("Dropped command echo: {}", e);
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!(
                "SSH session to {} dropped without close(); the connection is torn down without a disconnect message",
                self.device
            );
        }
    }
}

impl Closable for SshSession {
    async fn open(&mut self) -> Result<()> {
        self.connect().await
    }

    async fn close(&mut self) -> Result<()> {
        SshSession::close(self).await
    }
}

impl RemoteShell for SshSession {
    async fn run_cmd(&mut self, command: &str, check: bool, writeout: bool) -> Result<CommandOutput> {
        SshSession::run_cmd(self, command, check, writeout).await
    }
}

impl RemoteFiles for SshSession {
    async fn put(&mut self, local: &Path, remote: &str, recursive: bool) -> Result<()> {
        SshSession::put(self, local, remote, recursive).await
    }

    async fn get(&mut self, remote: &str, local: &Path, recursive: bool) -> Result<()> {
        SshSession::get(self, remote, local, recursive).await
    }
}
