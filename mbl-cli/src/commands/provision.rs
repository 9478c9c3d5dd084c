use futures_util::FutureExt;
use mbl::provision::{provision as provision_device, provisioning_status};
use mbl::{Store, StoreType};

use super::{Context, on_device};

/// Provision the device with two certificates from the team store.
pub async fn provision(ctx: &Context, dev_cert: &str, update_cert: &str) -> anyhow::Result<()> {
    let store = Store::default_store(&ctx.paths, StoreType::Team)?;
    // Both must be in the store before anything touches the device.
    store.certificate_paths(dev_cert)?;
    store.certificate_paths(update_cert)?;
    let dev_dir = store.certificate_dir(dev_cert);
    let update_dir = store.certificate_dir(update_cert);

    on_device(ctx, move |session| {
        async move { provision_device(session, &dev_dir, &update_dir).await }.boxed()
    })
    .await?;

    println!("Provisioning completed.");
    Ok(())
}

pub async fn status(ctx: &Context) -> anyhow::Result<()> {
    on_device(ctx, |session| async move { provisioning_status(session).await }.boxed()).await
}
