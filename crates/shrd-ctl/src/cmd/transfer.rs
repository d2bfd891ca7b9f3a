//! Transfer commands — the client side of the protocol.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use shrd_services::{EventBus, Store, TransferClient};

pub async fn cmd_ping(store: Arc<Store>, events: EventBus, needle: &str) -> Result<()> {
    let device = super::resolve_device(&store, needle)?;
    let client = TransferClient::new(store, events);
    if client.ping(&device).await {
        println!("{} answered.", device.name);
    } else {
        println!("{} did not answer.", device.name);
        std::process::exit(1);
    }
    Ok(())
}

pub async fn cmd_send(
    store: Arc<Store>,
    events: EventBus,
    needle: &str,
    path: &str,
) -> Result<()> {
    let device = super::resolve_device(&store, needle)?;
    let client = TransferClient::new(store, events);
    client.send_file(&device, &PathBuf::from(path)).await?;
    println!("Sent {} to {}.", path, device.name);
    Ok(())
}

pub async fn cmd_ls(
    store: Arc<Store>,
    events: EventBus,
    needle: &str,
    path: &str,
) -> Result<()> {
    let device = super::resolve_device(&store, needle)?;
    let client = TransferClient::new(store, events);
    let listing = client.list(&device, path).await?;

    println!("{}:", listing.path);
    for entry in &listing.entries {
        if entry.is_dir {
            println!("  {:>10}  {}/", "dir", entry.name);
        } else {
            println!("  {:>10}  {}", entry.size, entry.name);
        }
    }
    Ok(())
}

pub async fn cmd_download(
    store: Arc<Store>,
    events: EventBus,
    needle: &str,
    path: &str,
) -> Result<()> {
    let device = super::resolve_device(&store, needle)?;
    let client = TransferClient::new(store, events);
    let dest = client.download(&device, path).await?;
    println!("Downloaded to {}.", dest.display());
    Ok(())
}
