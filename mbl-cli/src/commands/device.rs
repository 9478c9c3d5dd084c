use std::io::{self, BufRead, Write};

use anyhow::{Context as _, bail};
use mbl::discovery::DISCOVERY_TIMEOUT;
use mbl::{Device, DeviceCache, DiscoveryConfig, IndexedTextList, do_discovery};

use super::Context;

/// Discover devices and print them as a numbered list.
pub async fn list() -> anyhow::Result<IndexedTextList> {
    println!(
        "Discovering devices. This will take up to {} seconds.",
        DISCOVERY_TIMEOUT.as_secs()
    );

    let found = IndexedTextList::new();
    let sink = found.clone();
    do_discovery(move |line| sink.push(line), &DiscoveryConfig::default()).await?;

    if found.is_empty() {
        bail!("No devices found!");
    }
    println!("{}", found);
    Ok(found)
}

/// List devices, ask for one and remember it.
pub async fn select(ctx: &Context) -> anyhow::Result<()> {
    let found = list().await?;

    print!("\nSelect a device from the list: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;

    let device = parse_selection(&found, answer.trim())?;
    DeviceCache::save(&ctx.paths.device_file, &device)?;
    println!("Selected {}", device);
    Ok(())
}

fn parse_selection(found: &IndexedTextList, answer: &str) -> anyhow::Result<Device> {
    let index: usize = answer
        .parse()
        .context("Enter a valid device index as shown in the list.")?;
    let entry = match found.item(index) {
        Some(entry) => entry,
        None => bail!("Enter a number between 1 - {}", found.len()),
    };
    let (hostname, address) = entry
        .split_once(": ")
        .with_context(|| format!("Malformed list entry '{}'", entry))?;
    Ok(Device::new(hostname, address))
}

/// Print the selected device.
pub fn which(ctx: &Context) -> anyhow::Result<()> {
    let device = DeviceCache::load(&ctx.paths.device_file)?;
    println!("{}", device);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found() -> IndexedTextList {
        let list = IndexedTextList::new();
        list.push("mbed-linux-os-1: 10.0.0.2");
        list.push("mbed-linux-os-2: fe80::1%eth0");
        list
    }

    #[test]
    fn test_parse_selection() {
        let device = parse_selection(&found(), "2").unwrap();
        assert_eq!(device, Device::new("mbed-linux-os-2", "fe80::1%eth0"));
    }

    #[test]
    fn test_parse_selection_rejects_bad_input() {
        assert!(parse_selection(&found(), "zero").is_err());
        assert!(parse_selection(&found(), "0").is_err());
        let err = parse_selection(&found(), "3").unwrap_err();
        assert_eq!(err.to_string(), "Enter a number between 1 - 2");
    }
}
