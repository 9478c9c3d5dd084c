//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    AcceptNew,

    /// Accept all keys without checking.
    ///
    /// Devices generate a fresh host key every time they are flashed, so
    /// this is the default.
    #[default]
    Disabled,
}

/// SSH connection configuration.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP address, IPv6 may carry a `%zone`).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection timeout.
    pub timeout: Duration,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    /// Configuration for `host` with default settings.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            auth: AuthMethod::None,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            terminal_width: 80,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    /// Get the host/port pair for connection.
    pub fn socket_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

/// Authentication method for SSH connections.
///
/// `none` authentication is always attempted first; a password is only sent
/// if the device asks for one.
#[derive(Debug, Clone, Default)]
pub enum AuthMethod {
    /// No credentials.
    #[default]
    None,

    /// Password authentication.
    Password(SecretString),
}

impl AuthMethod {
    /// Password auth from a possibly empty password; empty means none.
    pub fn from_password(password: &str) -> Self {
        if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::Password(SecretString::from(password.to_string()))
        }
    }

    /// The password, if one is configured.
    pub fn password(&self) -> Option<&str> {
        match self {
            AuthMethod::None => None,
            AuthMethod::Password(secret) => Some(secret.expose_secret()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SshConfig::new("10.0.0.2", "root");
        assert_eq!(config.port, 22);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.host_key_verification, HostKeyVerification::Disabled);
        assert_eq!(config.socket_addr(), ("10.0.0.2", 22));
        assert!(config.auth.password().is_none());
    }

    #[test]
    fn test_empty_password_means_none() {
        assert!(matches!(AuthMethod::from_password(""), AuthMethod::None));
        assert_eq!(AuthMethod::from_password("pw").password(), Some("pw"));
    }

    #[test]
    fn test_password_hidden_from_debug() {
        let config = SshConfig {
            auth: AuthMethod::from_password("hunter2"),
            ..SshConfig::new("10.0.0.2", "root")
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
