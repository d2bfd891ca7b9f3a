//! Application configuration and default paths.
//!
//! Config file location: `<per-user config dir>/shrd/config.json`,
//! e.g. ~/.config/shrd on Linux. The store crate owns reading and
//! writing; this module only defines the shape and the defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default TCP port for the protocol server.
pub const DEFAULT_PORT: u16 = 52637;

/// The local node's identity and defaults.
///
/// `device_id` is generated on first run and never rotated.
/// `encryption_key` is an opaque symmetric key blob reserved for a
/// future encrypted-transport version; nothing reads it yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device_id: String,
    pub device_name: String,
    pub port: u16,
    pub downloads_dir: String,
    pub auto_accept: bool,
    pub encryption_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: local_hostname(),
            port: DEFAULT_PORT,
            downloads_dir: default_downloads_dir().to_string_lossy().into_owned(),
            auto_accept: false,
            encryption_key: generate_key(),
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "shrd".to_string())
}

/// 32 random bytes, hex-encoded. Fills the reserved key slot.
fn generate_key() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Per-user config directory for this application.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home().join(".config"))
        .join("shrd")
}

/// Default destination for received files.
pub fn default_downloads_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| home().join("Downloads"))
        .join("shrd")
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}
