//! Core data model — enrolled devices and transfer metadata.
//!
//! Field names on these types are the persistence and wire contract:
//! `Device` is stored verbatim in devices.json, and `FileInfo` /
//! directory entries travel inside frame payloads. Renaming a field here
//! is a breaking change on disk and on the wire.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PORT;

/// An enrolled peer. Identity is `id` alone — `host` may legally change
/// when the peer moves networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Opaque 128-bit identifier (UUID string form). Immutable after
    /// first enrollment.
    pub id: String,
    /// Human-readable name, as advertised by the peer.
    pub name: String,
    /// IPv4 literal or hostname, updated on each successful contact.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// ISO 8601 timestamp of the last successful contact.
    #[serde(default)]
    pub last_seen: Option<String>,
    /// Live-derived flag. Written by the liveness monitor (and by the
    /// discovery add path, which only flips offline → online).
    #[serde(default)]
    pub is_online: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Transfer metadata for a single file.
///
/// `path` is a server-side absolute path, meaningful only within the
/// sender's filesystem. `checksum` is a hex SHA-256 digest when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub path: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub path: String,
}

/// A remote directory listing, returned verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirListing {
    pub path: String,
    pub parent: String,
    pub entries: Vec<DirEntry>,
}

/// Progress event for an in-flight transfer, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub file_name: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Display name of the peer on the other end.
    pub device_name: String,
    /// true = we are sending, false = we are receiving.
    pub is_upload: bool,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_round_trips_with_exact_keys() {
        let device = Device {
            id: "4f6c5a2e-8d1b-4c3a-9e7f-0a1b2c3d4e5f".into(),
            name: "laptop".into(),
            host: "192.168.1.20".into(),
            port: 52637,
            last_seen: Some("2026-07-30T18:21:07".into()),
            is_online: true,
        };

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["id"], device.id.as_str());
        assert_eq!(json["host"], "192.168.1.20");
        assert_eq!(json["is_online"], true);

        let back: Device = serde_json::from_value(json).unwrap();
        assert_eq!(back, device);
    }

    #[test]
    fn device_defaults_fill_missing_fields() {
        // A minimal record from an older devices.json still loads.
        let device: Device = serde_json::from_str(
            r#"{"id": "abc", "name": "nas", "host": "10.0.0.2"}"#,
        )
        .unwrap();
        assert_eq!(device.port, DEFAULT_PORT);
        assert_eq!(device.last_seen, None);
        assert!(!device.is_online);
    }

    #[test]
    fn file_info_checksum_is_optional() {
        let info: FileInfo = serde_json::from_str(
            r#"{"name": "a.txt", "size": 3, "path": "/tmp/a.txt"}"#,
        )
        .unwrap();
        assert_eq!(info.checksum, None);
        assert!(!info.is_dir);
    }

    #[test]
    fn percent_handles_empty_files() {
        let progress = TransferProgress {
            file_name: "empty".into(),
            bytes_transferred: 0,
            total_bytes: 0,
            device_name: "peer".into(),
            is_upload: false,
        };
        assert_eq!(progress.percent(), 100.0);

        let halfway = TransferProgress {
            bytes_transferred: 50,
            total_bytes: 100,
            ..progress
        };
        assert_eq!(halfway.percent(), 50.0);
    }
}
