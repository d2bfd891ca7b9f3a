//! Local-node and registry commands.

use anyhow::{Context, Result};

use shrd_core::{Device, DEFAULT_PORT};
use shrd_services::discovery::{local_pairing_code, primary_ipv4};
use shrd_services::Store;

pub fn cmd_info(store: &Store) -> Result<()> {
    let config = store.config();
    println!("Device id:     {}", config.device_id);
    println!("Device name:   {}", config.device_name);
    println!("Address:       {}:{}", primary_ipv4(), config.port);
    println!("Pairing code:  {}", local_pairing_code(&config));
    println!("Downloads dir: {}", config.downloads_dir);
    println!("Auto-accept:   {}", if config.auto_accept { "on" } else { "off" });
    Ok(())
}

pub fn cmd_devices(store: &Store) -> Result<()> {
    let devices = store.devices();
    if devices.is_empty() {
        println!("No enrolled devices.");
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_online { "●" } else { "○" };
        let last_seen = device.last_seen.as_deref().unwrap_or("never");
        println!(
            "{} {:<20} {:<38} {}:{}  last seen {}",
            marker, device.name, device.id, device.host, device.port, last_seen
        );
    }
    Ok(())
}

pub fn cmd_add(
    store: &Store,
    id: &str,
    name: &str,
    host: &str,
    port: Option<&str>,
) -> Result<()> {
    let port = match port {
        Some(port) => port.parse().context("port must be a number")?,
        None => DEFAULT_PORT,
    };
    store.add_device(Device {
        id: id.to_string(),
        name: name.to_string(),
        host: host.to_string(),
        port,
        last_seen: None,
        is_online: false,
    })?;
    println!("Enrolled {name} ({host}:{port}).");
    Ok(())
}

pub fn cmd_remove(store: &Store, needle: &str) -> Result<()> {
    let device = super::resolve_device(store, needle)?;
    store.remove_device(&device.id)?;
    println!("Removed {}.", device.name);
    Ok(())
}
