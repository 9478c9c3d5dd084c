use std::path::Path;

use anyhow::{Context as _, bail};
use mbl::store::parse_cert_header;
use mbl::{CertKind, Store, StoreType};

use super::Context;

pub fn save_api_key(
    ctx: &Context,
    uid: &str,
    keys: Vec<String>,
    new_store: Option<Vec<String>>,
) -> anyhow::Result<()> {
    let mut store = match new_store.as_deref() {
        Some([path, store_type]) => {
            let store_type: StoreType = store_type.parse()?;
            Store::create(&ctx.paths, uid, store_type, Path::new(path))?
        }
        Some(other) => bail!("--new-store takes PATH and TYPE, got {} values", other.len()),
        None => Store::get(&ctx.paths, uid)?,
    };

    store.add_api_keys(keys);
    store.save()?;
    println!("API key saved to store '{}'.", store.uid());
    Ok(())
}

pub fn add_cert(ctx: &Context, name: &str, header: &Path, update: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(header)
        .with_context(|| format!("Failed to read {}", header.display()))?;
    let kind = if update {
        CertKind::Update
    } else {
        CertKind::Developer
    };
    let credentials = parse_cert_header(&text, kind)?;

    let mut store = Store::default_store(&ctx.paths, StoreType::Team)?;
    store.add_certificate(name, &credentials)?;
    println!("Certificate '{}' saved.", name);
    Ok(())
}

pub fn list_certs(ctx: &Context) -> anyhow::Result<()> {
    let store = Store::default_store(&ctx.paths, StoreType::Team)?;
    println!("Developer and update certificates in local storage:");
    for name in store.certificate_names() {
        println!("{}", name);
    }
    Ok(())
}

pub fn delete_cert(ctx: &Context, name: &str) -> anyhow::Result<()> {
    println!("Deleting certificate locally.");
    let mut store = Store::default_store(&ctx.paths, StoreType::Team)?;
    store.delete_certificate(name)?;
    println!("Certificate '{}' was deleted.", name);
    Ok(())
}
