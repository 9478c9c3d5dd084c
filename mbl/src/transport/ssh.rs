//! SSH transport implementation using russh.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use russh::Channel;
use russh::client::{self, Handle, Msg};
use russh::keys::PublicKey;
use russh_sftp::client::SftpSession;

use super::config::{HostKeyVerification, SshConfig};
use crate::error::{CommandError, Result, TransferError, TransportError};

/// SSH transport wrapping russh client.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// Configuration used for this connection.
    config: SshConfig,
}

impl SshTransport {
    /// Resolve the host, connect and authenticate.
    ///
    /// A host name that does not resolve fails with
    /// [`TransportError::Resolve`] before any connection attempt, so callers
    /// can fall back to another address.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let addr = Self::resolve(&config).await?;
        debug!("Connecting to {} ({})", config.host, addr);

        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = tokio::time::timeout(config.timeout, client::connect(ssh_config, addr, handler))
            .await
            .map_err(|_| TransportError::Timeout(config.timeout))?
            .map_err(|e| {
                // check_server_key may have stored a more precise reason than
                // the generic russh::Error::UnknownKey.
                let stored = host_key_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match (stored, e) {
                    (Some(hk_err), _) => hk_err,
                    (None, russh::Error::IO(source)) => TransportError::ConnectionFailed {
                        host: config.host.clone(),
                        port: config.port,
                        source,
                    },
                    (None, e) => TransportError::Ssh(e),
                }
            })?;

        Self::authenticate(&mut session, &config).await?;
        debug!("Authenticated to {} as {}", config.host, config.username);

        Ok(Self { session, config })
    }

    async fn resolve(config: &SshConfig) -> Result<SocketAddr> {
        let resolve_error = |source: io::Error| TransportError::Resolve {
            host: config.host.clone(),
            source,
        };

        let mut addrs = tokio::net::lookup_host(config.socket_addr())
            .await
            .map_err(resolve_error)?;
        match addrs.next() {
            Some(addr) => Ok(addr),
            None => Err(resolve_error(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses returned",
            ))
            .into()),
        }
    }

    /// Try `none` authentication, then the password if one is configured.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let accepted = session
            .authenticate_none(&config.username)
            .await
            .map_err(TransportError::Ssh)?
            .success();
        if accepted {
            return Ok(());
        }

        if let Some(password) = config.auth.password() {
            let accepted = session
                .authenticate_password(&config.username, password)
                .await
                .map_err(TransportError::Ssh)?
                .success();
            if accepted {
                return Ok(());
            }
        }

        Err(TransportError::AuthenticationFailed {
            user: config.username.clone(),
        }
        .into())
    }

    /// Open a channel running `command`.
    pub async fn open_exec(&self, command: &str) -> Result<Channel<Msg>> {
        let execution_error = |source: russh::Error| CommandError::Execution {
            command: command.to_string(),
            source,
        };

        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(execution_error)?;
        channel.exec(true, command).await.map_err(execution_error)?;
        Ok(channel)
    }

    /// Open an SFTP sub-session on this connection.
    pub async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(TransportError::Ssh)?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(TransferError::Sftp)?;
        Ok(sftp)
    }

    /// Open a PTY channel running the login shell.
    pub async fn open_shell(&self, width: u32, height: u32) -> Result<Channel<Msg>> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(true, "xterm", width, height, 0, 0, &[])
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(channel)
    }

    /// Configuration this transport was opened with.
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Whether the server side has gone away.
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Stores a detailed host-key error so connect() can surface it
    /// instead of the generic russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err(TransportError::HostKeyChanged)` if key changed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        *self
            .host_key_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}
