//! Error types for mbl.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for mbl operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Remote command errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// File transfer and validation errors
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Device discovery errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Device selection and cache errors
    #[error("{0}")]
    Device(#[from] DeviceError),

    /// Credential store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Exit status of the remote command, if this error came from one.
    pub fn remote_exit_code(&self) -> Option<u32> {
        match self {
            Error::Command(CommandError::Remote { code, .. }) => *code,
            _ => None,
        }
    }
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Host name could not be resolved
    #[error("Could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Host key differs from the one in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host is not in known_hosts and strict checking is enabled
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Session not connected
    #[error("Session not connected")]
    NotConnected,

    /// Session already connected
    #[error("Session already connected")]
    AlreadyConnected,

    /// Session was closed and cannot be reused
    #[error("Session closed")]
    Closed,

    /// Terminal I/O error during an interactive shell
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Remote command errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The transport could not run the command at all
    #[error("The command `{command}` failed to execute: {source}")]
    Execution {
        command: String,
        #[source]
        source: russh::Error,
    },

    /// The command did not finish within the timeout
    #[error("The command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The command ran and exited with a non-zero status
    #[error("The command `{command}` exited with status {}: {message}", display_code(.code))]
    Remote {
        command: String,
        code: Option<u32>,
        message: String,
    },
}

fn display_code(code: &Option<u32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

/// File transfer and post-transfer validation errors.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Local and remote checksums differ
    #[error(
        "Remote file md5sum: {remote}, local file md5sum: {local} ({path}). \
         Your file may not have been transferred correctly!"
    )]
    ChecksumMismatch {
        path: String,
        remote: String,
        local: String,
    },

    /// One or more files of a directory transfer differ
    #[error("{} file(s) under {root} failed validation:\n{}", .mismatches.len(), format_mismatches(.mismatches))]
    TreeMismatch {
        root: String,
        mismatches: Vec<FileMismatch>,
    },

    /// Local/remote path pair could not be resolved for validation
    #[error("Cannot resolve transfer paths (local '{}', remote '{remote}'): {reason}", .local.display())]
    PathResolution {
        local: PathBuf,
        remote: String,
        reason: String,
    },

    /// Output of a remote checksum command could not be understood
    #[error("Unexpected checksum output for {path}: '{output}'")]
    ChecksumOutput { path: String, output: String },

    /// The transfer itself was refused
    #[error("{0}")]
    Refused(String),

    /// SFTP protocol error
    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    /// Local file I/O error
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A single file that failed directory validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMismatch {
    /// Path relative to the validated directory.
    pub path: String,
    /// Local checksum.
    pub local: String,
    /// Remote checksum, or `None` when the file is missing remotely.
    pub remote: Option<String>,
}

fn format_mismatches(mismatches: &[FileMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| match &m.remote {
            Some(remote) => format!("  {}: remote md5sum {}, local md5sum {}", m.path, remote, m.local),
            None => format!("  {}: missing on the device", m.path),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Device discovery errors.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// A discovered service carried an address that is not IPv4/IPv6
    #[error("Service '{name}' advertised an unusable address ({detail})")]
    AddressParse { name: String, detail: String },

    /// The native mDNS resolver failed
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// The browsing utility could not be run
    #[error("Failed to run {program}: {source}")]
    Browser {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The native browser event thread panicked
    #[error("mDNS event thread panicked")]
    EventThread,
}

/// Device selection and device cache errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No cached device and no address given
    #[error("Please select a device or provide an ip address.")]
    NoDeviceSelected,

    /// The supplied address is not IPv4 or IPv6
    #[error("Invalid address given: '{0}'")]
    InvalidAddress(String),

    /// No home directory to keep the device cache in
    #[error("Could not determine the home directory")]
    NoHomeDirectory,

    /// Device cache file I/O error
    #[error("Device cache {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Device cache file is not valid JSON
    #[error("Device cache {} is invalid: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Credential store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store UID is unknown
    #[error("UID '{0}' not recognised. You must create a store.")]
    NotFound(String),

    /// A known store UID points at a path that no longer exists
    #[error("Store '{uid}' location {} does not exist on disk. You must recreate the store.", .path.display())]
    KnownLocationInvalid { uid: String, path: PathBuf },

    /// Store config exists but holds no data
    #[error("The config file at {} contains no data. Your store is corrupt, please delete and recreate.", .0.display())]
    EmptyConfig(PathBuf),

    /// A store UID is already in the locations record
    #[error("Store UID '{0}' already exists in the record")]
    DuplicateUid(String),

    /// The store location already exists
    #[error("The given path already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Unrecognised store type
    #[error("Unknown store type '{0}' (expected 'user' or 'team')")]
    InvalidType(String),

    /// Certificate not held in the store
    #[error("Certificate '{0}' not found in the store.")]
    CertificateNotFound(String),

    /// Certificate header could not be parsed
    #[error("Invalid certificate header: {0}")]
    CertificateParse(String),

    /// Store file I/O error
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Store file is not valid JSON
    #[error("Invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias using mbl's Error.
pub type Result<T> = std::result::Result<T, Error>;
