pub mod node;
pub mod transfer;

use anyhow::{Context, Result};
use shrd_core::Device;
use shrd_services::Store;

/// Find an enrolled device by exact id, exact name, or id prefix.
pub fn resolve_device(store: &Store, needle: &str) -> Result<Device> {
    let devices = store.devices();
    devices
        .iter()
        .find(|d| d.id == needle || d.name == needle)
        .or_else(|| devices.iter().find(|d| d.id.starts_with(needle)))
        .cloned()
        .with_context(|| format!("no enrolled device matches '{needle}'"))
}
