//! shrd-core — wire format, data model, and configuration.
//! All other shrd crates depend on this one.

pub mod config;
pub mod device;
pub mod hash;
pub mod wire;

pub use config::{AppConfig, DEFAULT_PORT};
pub use device::{Device, DirEntry, DirListing, FileInfo, TransferProgress};
pub use wire::{Message, WireError, PROTOCOL_VERSION};
