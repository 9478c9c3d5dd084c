pub mod device;
pub mod provision;
pub mod shell;
pub mod store;
pub mod transfer;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::future::BoxFuture;
use log::debug;
use mbl::session::scoped;
use mbl::{Device, DeviceCache, MblPaths, SessionBuilder, SshSession};

#[derive(Parser)]
#[command(name = "mbl-cli")]
#[command(version)]
#[command(about = "Find, access and provision embedded Linux devices on the local network.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// IP address of the device, instead of the selected one
    #[arg(short, long, global = true)]
    pub address: Option<String>,

    /// Hide transfer progress and command output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List devices on the network
    List,
    /// Select a device to use for later commands
    Select,
    /// Show the selected device
    Which,
    /// Copy a file or directory from the device
    Get {
        src: String,
        dst: PathBuf,
        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,
    },
    /// Copy a file or directory to the device
    Put {
        src: PathBuf,
        dst: String,
        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,
    },
    /// Start a shell on the device, or run one command
    Shell {
        /// Command to run instead of an interactive shell
        cmd: Option<String>,
    },
    /// Save API keys to a store
    SaveApiKey {
        /// UID of the store
        uid: String,
        #[arg(required = true)]
        keys: Vec<String>,
        /// Create the store first, at PATH with TYPE (user or team)
        #[arg(long, num_args = 2, value_names = ["PATH", "TYPE"])]
        new_store: Option<Vec<String>>,
    },
    /// Parse a certificate header into the team store
    AddCert {
        name: String,
        header: PathBuf,
        /// The header is an update certificate
        #[arg(long)]
        update: bool,
    },
    /// List certificates in the team store
    ListCerts,
    /// Delete a certificate from the team store
    DeleteCert { name: String },
    /// Provision the device with stored certificates
    Provision {
        dev_cert: String,
        update_cert: String,
    },
    /// Show the device's provisioning status
    ProvisioningStatus,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Shared state for command handlers.
pub struct Context {
    pub paths: MblPaths,
    pub address: Option<String>,
    pub quiet: bool,
}

impl Context {
    /// The device named by `--address`, or the selected one.
    pub fn device(&self) -> mbl::Result<Device> {
        DeviceCache::resolve(&self.paths.device_file, self.address.as_deref())
    }

    pub fn session(&self, device: Device) -> SshSession {
        SessionBuilder::new(device).progress(!self.quiet).build()
    }
}

/// Connect to the current device, run `body`, and always close the session.
pub async fn on_device<T, F>(ctx: &Context, body: F) -> anyhow::Result<T>
where
    F: for<'a> FnOnce(&'a mut SshSession) -> BoxFuture<'a, mbl::Result<T>>,
{
    let device = ctx.device()?;
    debug!("Using device {}", device);
    let mut session = ctx.session(device);
    Ok(scoped(&mut session, body).await?)
}
