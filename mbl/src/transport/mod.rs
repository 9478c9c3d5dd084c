//! SSH transport layer wrapping russh.
//!
//! This module owns the connection to one device: resolving its address,
//! the handshake, host-key checking and authentication, and opening the
//! exec, SFTP and shell channels the session layer works with.

pub mod config;
mod ssh;

pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use ssh::SshTransport;
