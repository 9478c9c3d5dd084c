//! Provisioning a device with certificates from the host.
//!
//! The certificate directories are copied into a scratch directory on the
//! device, flattened, and handed to the on-device provisioning utility. The
//! scratch directory is removed afterwards whether or not provisioning
//! succeeded.

use std::path::Path;

use log::{debug, warn};

use crate::error::Result;
use crate::session::{RemoteFiles, RemoteShell};
use crate::transfer::join_remote;

/// On-device provisioning utility.
pub const PROVISIONING_UTIL: &str = "/opt/arm/pelion-provisioning-util";

/// Where certificates are staged on the device.
pub const PROVISIONING_DIR: &str = "/scratch/provisioning-certs";

/// Provision the device with the developer and update certificates held in
/// `dev_cert_dir` and `update_cert_dir`.
pub async fn provision<S: RemoteFiles>(
    session: &mut S,
    dev_cert_dir: &Path,
    update_cert_dir: &Path,
) -> Result<()> {
    prepare_remote_dir(session, PROVISIONING_DIR).await?;

    let outcome = async {
        for dir in [dev_cert_dir, update_cert_dir] {
            transfer_cert_dir(session, dir, PROVISIONING_DIR).await?;
        }
        session
            .run_cmd(&format!("{} --provision", PROVISIONING_UTIL), true, true)
            .await?;
        Ok::<(), crate::Error>(())
    }
    .await;

    remove_remote_dir(session, PROVISIONING_DIR).await;
    outcome
}

/// Print the device's provisioning status.
pub async fn provisioning_status<S: RemoteShell>(session: &mut S) -> Result<()> {
    session
        .run_cmd(&format!("{} --get-pelion-status", PROVISIONING_UTIL), true, true)
        .await?;
    Ok(())
}

async fn prepare_remote_dir<S: RemoteShell>(session: &mut S, target: &str) -> Result<()> {
    let target = shell_words::quote(target);
    // Usually absent, so a failure here is expected.
    session.run_cmd(&format!("rm -r {}", target), false, false).await?;
    session.run_cmd(&format!("mkdir -p {}", target), true, false).await?;
    Ok(())
}

/// Copy `local_dir` under `target` and move its files up into `target`.
async fn transfer_cert_dir<S: RemoteFiles>(session: &mut S, local_dir: &Path, target: &str) -> Result<()> {
    session.put(local_dir, target, true).await?;

    let name = local_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let copied = join_remote(target, &name);
    debug!("Flattening {} into {}", copied, target);
    session
        .run_cmd(
            &format!("mv {}/* {}", shell_words::quote(&copied), shell_words::quote(target)),
            true,
            false,
        )
        .await?;
    Ok(())
}

async fn remove_remote_dir<S: RemoteShell>(session: &mut S, target: &str) {
    let command = format!("rm -r {}", shell_words::quote(target));
    if let Err(e) = session.run_cmd(&command, false, false).await {
        warn!("Failed to remove {}: {}", target, e);
    }
}
