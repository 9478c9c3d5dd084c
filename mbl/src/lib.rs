//! # mbl
//!
//! Library behind `mbl-cli`, a tool for working with embedded Linux devices
//! on the local network.
//!
//! ## Features
//!
//! - Device discovery over mDNS, through `avahi-browse` or an in-process resolver
//! - SSH sessions via russh: commands, interactive shells and SFTP transfers
//! - MD5 validation of every transfer, files and whole directory trees
//! - Credential stores and certificate headers for device provisioning
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mbl::{Device, SessionBuilder};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mbl::Error> {
//!     let device = Device::new("mbed-linux-os-1234", "192.168.1.20");
//!     let mut session = SessionBuilder::new(device).build();
//!
//!     session.connect().await?;
//!     session.put(Path::new("app.tar"), "/scratch", false).await?;
//!     let output = session.run_cmd("tar -xf /scratch/app.tar -C /opt", true, true).await?;
//!     println!("exited with {:?}", output.exit_status);
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod provision;
pub mod session;
pub mod store;
pub mod text_list;
pub mod transfer;
pub mod transport;

// Re-export main types for convenience
pub use config::MblPaths;
pub use device::{Device, DeviceCache};
pub use discovery::{DiscoveryConfig, do_discovery};
pub use error::{Error, Result};
pub use session::{CommandOutput, RemoteFiles, RemoteShell, SessionBuilder, SshSession, with_session};
pub use store::{CertKind, Store, StoreType};
pub use text_list::IndexedTextList;
pub use transport::{AuthMethod, HostKeyVerification, SshConfig};
