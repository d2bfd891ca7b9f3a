//! Persistence store — the device registry and app config on disk.
//!
//! The store is the sole owner of `config.json` and `devices.json`.
//! Discovery, liveness, and the transfer client hold a shared handle and
//! mutate only through the update operations here; every mutation is
//! written through to disk atomically (temp file + rename), so a reader
//! observes either the pre-update or the post-update file, never a torn
//! state.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};

use shrd_core::{config, AppConfig, Device};

const CONFIG_FILE: &str = "config.json";
const DEVICES_FILE: &str = "devices.json";

pub struct Store {
    dir: PathBuf,
    config: RwLock<AppConfig>,
    devices: RwLock<HashMap<String, Device>>,
}

impl Store {
    /// Open the store in the default per-user config directory.
    pub fn open_default() -> Result<Store> {
        Self::open(config::default_config_dir())
    }

    /// Open the store in an explicit directory.
    ///
    /// Missing or unparseable files are replaced with defaults; the
    /// generated default config is written back immediately so the
    /// device identity survives the first run.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Store> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let config_path = dir.join(CONFIG_FILE);
        let config = match load_json::<AppConfig>(&config_path) {
            Some(config) => config,
            None => {
                let config = AppConfig::default();
                write_atomic(
                    &config_path,
                    &serde_json::to_string_pretty(&config)?,
                )?;
                tracing::info!(
                    device_id = %config.device_id,
                    path = %config_path.display(),
                    "generated fresh configuration"
                );
                config
            }
        };

        let devices = load_json::<Vec<Device>>(&dir.join(DEVICES_FILE))
            .unwrap_or_default()
            .into_iter()
            .map(|device| (device.id.clone(), device))
            .collect();

        Ok(Store {
            dir,
            config: RwLock::new(config),
            devices: RwLock::new(devices),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ── Config ────────────────────────────────────────────────────────────────

    pub fn config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn set_config(&self, config: AppConfig) -> Result<()> {
        let mut slot = self.config.write().unwrap();
        write_atomic(
            &self.dir.join(CONFIG_FILE),
            &serde_json::to_string_pretty(&config)?,
        )?;
        *slot = config;
        Ok(())
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> =
            self.devices.read().unwrap().values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        self.devices.read().unwrap().get(id).cloned()
    }

    pub fn add_device(&self, device: Device) -> Result<()> {
        self.update_device(device)
    }

    pub fn update_device(&self, device: Device) -> Result<()> {
        let mut devices = self.devices.write().unwrap();
        devices.insert(device.id.clone(), device);
        self.save_devices(&devices)
    }

    /// Returns true if the device was enrolled.
    pub fn remove_device(&self, id: &str) -> Result<bool> {
        let mut devices = self.devices.write().unwrap();
        let removed = devices.remove(id).is_some();
        if removed {
            self.save_devices(&devices)?;
        }
        Ok(removed)
    }

    fn save_devices(&self, devices: &HashMap<String, Device>) -> Result<()> {
        let mut list: Vec<&Device> = devices.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        write_atomic(
            &self.dir.join(DEVICES_FILE),
            &serde_json::to_string_pretty(&list)?,
        )
    }
}

/// ISO 8601 timestamp for `Device::last_seen` stamps.
pub fn now_iso() -> String {
    chrono::Local::now().to_rfc3339()
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read, using defaults");
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse, using defaults");
            None
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
