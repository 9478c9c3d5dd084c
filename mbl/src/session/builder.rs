//! Builder for SSH sessions.

use std::path::PathBuf;
use std::time::Duration;

use super::ssh::{SessionSettings, SshSession};
use crate::device::Device;
use crate::transport::HostKeyVerification;
use crate::transport::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};

/// Default ceiling for a single remote command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for constructing [`SshSession`]s.
///
/// # Example
///
/// ```rust,no_run
/// use mbl::device::Device;
/// use mbl::session::SessionBuilder;
///
/// # async fn example() -> Result<(), mbl::Error> {
/// let device = Device::new("mbed-linux-os-1234", "192.168.1.20");
/// let mut session = SessionBuilder::new(device).progress(false).build();
/// session.connect().await?;
/// let output = session.run_cmd("uname -a", true, false).await?;
/// println!("{}", output);
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    device: Device,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    progress: bool,
}

impl SessionBuilder {
    /// Create a builder for `device`.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            progress: true,
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the timeout applied to each remote command.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a custom known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Show or hide transfer progress.
    pub fn progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Build the session.
    ///
    /// This does not connect. Call `connect()` on the returned session, or
    /// hand it to [`with_session`](super::with_session).
    pub fn build(self) -> SshSession {
        SshSession::new(
            self.device,
            SessionSettings {
                port: self.port,
                connect_timeout: self.connect_timeout,
                command_timeout: self.command_timeout,
                host_key_verification: self.host_key_verification,
                known_hosts_path: self.known_hosts_path,
                progress: self.progress,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let session = SessionBuilder::new(Device::new("dev", "10.0.0.2")).build();
        let settings = session.settings();
        assert_eq!(settings.port, 22);
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.command_timeout, Duration::from_secs(30));
        assert_eq!(settings.host_key_verification, HostKeyVerification::Disabled);
        assert!(settings.progress);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_overrides() {
        let session = SessionBuilder::new(Device::new("dev", "10.0.0.2"))
            .port(2222)
            .command_timeout(Duration::from_secs(5))
            .host_key_verification(HostKeyVerification::Strict)
            .known_hosts_path("/tmp/known_hosts")
            .progress(false)
            .build();
        let settings = session.settings();
        assert_eq!(settings.port, 2222);
        assert_eq!(settings.command_timeout, Duration::from_secs(5));
        assert_eq!(settings.host_key_verification, HostKeyVerification::Strict);
        assert_eq!(settings.known_hosts_path, Some(PathBuf::from("/tmp/known_hosts")));
        assert!(!settings.progress);
    }
}
