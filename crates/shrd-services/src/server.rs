//! Protocol server — accept loop, per-session dispatch, and the inbound
//! request handlers.
//!
//! A session opens with HELLO/HELLO_ACK and then carries any number of
//! consecutive requests until the peer closes, errs, or idles out. A
//! session-level failure closes that session and nothing else; the
//! daemon keeps accepting. Only a failure to bind the listening port is
//! returned to the caller.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use shrd_core::wire::{self, Identity, Message, WireError};
use shrd_core::{hash, Device, DirEntry, DirListing, FileInfo, TransferProgress};

use crate::events::{AcceptPolicy, Event, EventBus};
use crate::store::Store;

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Server {
    store: Arc<Store>,
    events: EventBus,
    policy: Arc<dyn AcceptPolicy>,
}

impl Server {
    pub fn new(store: Arc<Store>, events: EventBus, policy: Arc<dyn AcceptPolicy>) -> Self {
        Self {
            store,
            events,
            policy,
        }
    }

    /// Bind the configured port and start accepting sessions.
    ///
    /// Returns the bound address (the configured port may be 0 in
    /// tests). Each session runs in its own task; the accept loop stops
    /// at the first shutdown signal.
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<SocketAddr> {
        let port = self.store.config().port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind 0.0.0.0:{port}"))?;
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "transfer server listening");

        let server = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("transfer server shutting down");
                        return;
                    }
                    accepted = listener.accept() => {
                        let (stream, peer_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                tracing::warn!(error = %e, "accept failed");
                                continue;
                            }
                        };
                        let session_server = server.clone();
                        tokio::spawn(async move {
                            if let Err(e) = session_server.handle_session(stream, peer_addr).await {
                                tracing::debug!(%peer_addr, error = %e, "session ended");
                            }
                        });
                    }
                }
            }
        });

        Ok(addr)
    }

    async fn handle_session(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // The first frame must be HELLO, within the handshake window.
        let hello = timeout(HELLO_TIMEOUT, wire::read_message(&mut reader))
            .await
            .context("handshake timed out")??;
        let peer = match hello {
            Some(Message::Hello(identity)) => identity,
            Some(other) => bail!("session opened with tag {} instead of HELLO", other.type_tag()),
            None => return Ok(()), // connected and left; a probe, not a session
        };

        let config = self.store.config();
        wire::write_message(
            &mut writer,
            &Message::HelloAck(Identity {
                device_id: config.device_id,
                device_name: config.device_name,
            }),
        )
        .await?;
        tracing::debug!(%peer_addr, peer = %peer.device_name, "session established");

        loop {
            let frame = match timeout(IDLE_TIMEOUT, wire::read_frame(&mut reader))
                .await
                .context("session idle timeout")??
            {
                Some(frame) => frame,
                None => break, // peer closed cleanly
            };

            let message = match Message::from_frame(&frame) {
                Ok(message) => message,
                Err(WireError::UnknownType(tag)) => {
                    tracing::debug!(%peer_addr, tag, "ignoring unknown message type");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match message {
                Message::Ping => {
                    wire::write_message(&mut writer, &Message::Pong).await?;
                }
                Message::FileOffer { file } => {
                    self.handle_file_offer(&mut reader, &mut writer, &peer, peer_addr, file)
                        .await?;
                }
                Message::ListDirRequest { path } => {
                    self.handle_list_dir(&mut writer, &path).await?;
                }
                Message::FileDownloadRequest { path } => {
                    self.handle_download(&mut writer, &peer, &path).await?;
                }
                other => {
                    tracing::debug!(
                        %peer_addr,
                        tag = other.type_tag(),
                        "ignoring message outside its sequence"
                    );
                }
            }
        }

        let _ = timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
        Ok(())
    }

    // ── Inbound file offer ────────────────────────────────────────────────────

    async fn handle_file_offer(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        peer: &Identity,
        peer_addr: SocketAddr,
        file: FileInfo,
    ) -> Result<()> {
        let config = self.store.config();

        let accept = config.auto_accept || {
            let from = Device {
                id: peer.device_id.clone(),
                name: peer.device_name.clone(),
                host: peer_addr.ip().to_string(),
                port: 0,
                last_seen: None,
                is_online: true,
            };
            self.policy.accept(&from, &file)
        };

        if !accept {
            tracing::info!(peer = %peer.device_name, file = %file.name, "file offer declined");
            wire::write_message(
                writer,
                &Message::FileReject {
                    reason: "user declined".into(),
                },
            )
            .await?;
            return Ok(());
        }

        wire::write_message(writer, &Message::FileAccept).await?;

        let downloads = PathBuf::from(&config.downloads_dir);
        tokio::fs::create_dir_all(&downloads).await?;
        let dest = unique_destination(&downloads, &file.name);

        let events = self.events.clone();
        let peer_name = peer.device_name.clone();
        let progress_name = file.name.clone();
        let received = wire::receive_file(reader, &dest, file.size, |received, total| {
            events.emit(Event::TransferProgress(TransferProgress {
                file_name: progress_name.clone(),
                bytes_transferred: received,
                total_bytes: total,
                device_name: peer_name.clone(),
                is_upload: false,
            }));
        })
        .await?;

        if let Some(expected) = &file.checksum {
            if &received != expected {
                tracing::warn!(
                    peer = %peer.device_name,
                    file = %file.name,
                    expected = %expected,
                    got = %received,
                    "checksum mismatch, discarding file"
                );
                wire::write_message(
                    writer,
                    &Message::FileError {
                        error: "checksum mismatch".into(),
                    },
                )
                .await?;
                let _ = tokio::fs::remove_file(&dest).await;
                return Ok(());
            }
        }

        let dest_str = dest.to_string_lossy().into_owned();
        wire::write_message(
            writer,
            &Message::FileComplete {
                path: dest_str.clone(),
            },
        )
        .await?;
        tracing::info!(peer = %peer.device_name, file = %file.name, dest = %dest_str, "file received");
        self.events.emit(Event::TransferComplete {
            path: dest_str,
            success: true,
        });
        Ok(())
    }

    // ── Directory listing ─────────────────────────────────────────────────────

    async fn handle_list_dir(&self, writer: &mut OwnedWriteHalf, path: &str) -> Result<()> {
        let requested = if path.is_empty() {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
        } else {
            PathBuf::from(path)
        };

        match list_directory(&requested).await {
            Ok(listing) => {
                wire::write_message(writer, &Message::ListDirResponse(listing)).await?;
            }
            Err(e) => {
                wire::write_message(
                    writer,
                    &Message::Error {
                        error: e.to_string(),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    // ── Outbound download stream ──────────────────────────────────────────────

    async fn handle_download(
        &self,
        writer: &mut OwnedWriteHalf,
        peer: &Identity,
        path: &str,
    ) -> Result<()> {
        let file_path = PathBuf::from(path);
        let metadata = match tokio::fs::metadata(&file_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                wire::write_message(
                    writer,
                    &Message::Error {
                        error: "file not found".into(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let checksum = hash::checksum_file(&file_path).await?;
        let info = FileInfo {
            name: name.clone(),
            size: metadata.len(),
            path: path.to_string(),
            checksum: Some(checksum),
            is_dir: false,
        };
        wire::write_message(writer, &Message::FileDownloadStart { file: info }).await?;

        let events = self.events.clone();
        let peer_name = peer.device_name.clone();
        wire::send_file(writer, &file_path, |sent, total| {
            events.emit(Event::TransferProgress(TransferProgress {
                file_name: name.clone(),
                bytes_transferred: sent,
                total_bytes: total,
                device_name: peer_name.clone(),
                is_upload: true,
            }));
        })
        .await?;
        Ok(())
    }
}

/// First free of `<dir>/<name>`, `<dir>/<stem>_1<ext>`, `<dir>/<stem>_2<ext>`, …
/// Nothing already on disk is ever overwritten.
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let mut dest = dir.join(name);
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let ext = Path::new(name).extension().and_then(|s| s.to_str());

    let mut counter = 1;
    while dest.exists() {
        let candidate = match ext {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        dest = dir.join(candidate);
        counter += 1;
    }
    dest
}

/// Enumerate a directory, skipping entries we cannot stat.
async fn list_directory(path: &Path) -> Result<DirListing> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| anyhow::anyhow!("directory not found"))?;
    if !metadata.is_dir() {
        bail!("directory not found");
    }

    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let entry_meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(_) => continue, // permission denied and friends: skip
        };
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry_meta.is_dir(),
            size: if entry_meta.is_file() { entry_meta.len() } else { 0 },
            path: entry.path().to_string_lossy().into_owned(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(DirListing {
        path: path.to_string_lossy().into_owned(),
        parent: path
            .parent()
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned(),
        entries,
    })
}
