use std::path::PathBuf;

use futures_util::FutureExt;

use super::{Context, on_device};

pub async fn put(ctx: &Context, src: PathBuf, dst: String, recursive: bool) -> anyhow::Result<()> {
    let device = ctx.device()?;
    println!("Putting {} on device: {}\n", src.display(), device.hostname);

    on_device(ctx, move |session| {
        async move { session.put(&src, &dst, recursive).await }.boxed()
    })
    .await?;

    println!("\n\nTransfer completed.");
    Ok(())
}

pub async fn get(ctx: &Context, src: String, dst: PathBuf, recursive: bool) -> anyhow::Result<()> {
    let device = ctx.device()?;
    println!("Getting {} from device: {}\n", src, device.hostname);

    on_device(ctx, move |session| {
        async move { session.get(&src, &dst, recursive).await }.boxed()
    })
    .await?;

    println!("\n\nTransfer completed.");
    Ok(())
}
