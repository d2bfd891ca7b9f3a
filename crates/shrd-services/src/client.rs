//! Transfer client — send, download, list, and ping against a peer.
//!
//! Every operation opens one session through the connection manager,
//! performs one request/response or one offer sequence, and closes the
//! session through the safe-close path whether it succeeded or not.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::timeout;

use shrd_core::wire::{self, Message};
use shrd_core::{hash, Device, DirListing, FileInfo, TransferProgress};

use crate::connect::Connector;
use crate::events::{Event, EventBus};
use crate::store::Store;

const OFFER_REPLY_TIMEOUT: Duration = Duration::from_secs(60);
const COMPLETE_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TransferClient {
    store: Arc<Store>,
    connector: Connector,
    events: EventBus,
}

impl TransferClient {
    pub fn new(store: Arc<Store>, events: EventBus) -> Self {
        let connector = Connector::new(Arc::clone(&store), events.clone());
        Self {
            store,
            connector,
            events,
        }
    }

    /// Offer a local file to a peer and stream it once accepted.
    pub async fn send_file(&self, device: &Device, path: &Path) -> Result<()> {
        let mut session = self.connector.connect(device).await?;
        let result = self.offer_and_stream(&mut session, device, path).await;
        session.close().await;
        result
    }

    async fn offer_and_stream(
        &self,
        session: &mut crate::connect::Session,
        device: &Device,
        path: &Path,
    ) -> Result<()> {
        let name = file_name(path)?;
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?
            .len();
        let checksum = hash::checksum_file(path).await?;

        let info = FileInfo {
            name: name.clone(),
            size,
            path: path.to_string_lossy().into_owned(),
            checksum: Some(checksum),
            is_dir: false,
        };
        wire::write_message(&mut session.writer, &Message::FileOffer { file: info }).await?;

        let reply = timeout(OFFER_REPLY_TIMEOUT, wire::read_message(&mut session.reader))
            .await
            .context("no reply to file offer")??;
        match reply {
            Some(Message::FileAccept) => {}
            Some(Message::FileReject { reason }) => {
                tracing::info!(device = %device.name, reason = %reason, "file offer rejected");
                bail!("{} rejected the file: {}", device.name, reason);
            }
            Some(other) => bail!("unexpected reply to file offer (tag {})", other.type_tag()),
            None => bail!("peer closed before answering the offer"),
        }

        let events = self.events.clone();
        let device_name = device.name.clone();
        let file_name_for_progress = name.clone();
        wire::send_file(&mut session.writer, path, |sent, total| {
            events.emit(Event::TransferProgress(TransferProgress {
                file_name: file_name_for_progress.clone(),
                bytes_transferred: sent,
                total_bytes: total,
                device_name: device_name.clone(),
                is_upload: true,
            }));
        })
        .await?;

        let completion = timeout(COMPLETE_TIMEOUT, wire::read_message(&mut session.reader))
            .await
            .context("no completion acknowledgement")??;
        match completion {
            Some(Message::FileComplete { path: remote_path }) => {
                tracing::info!(
                    device = %device.name,
                    file = %name,
                    remote_path = %remote_path,
                    "file delivered"
                );
                Ok(())
            }
            Some(Message::FileError { error }) => {
                bail!("{} reported a transfer error: {}", device.name, error)
            }
            Some(other) => bail!("unexpected completion reply (tag {})", other.type_tag()),
            None => bail!("peer closed before confirming completion"),
        }
    }

    /// Pull a file from a peer by its remote absolute path. Returns the
    /// local destination path.
    pub async fn download(&self, device: &Device, remote_path: &str) -> Result<PathBuf> {
        let mut session = self.connector.connect(device).await?;
        let result = self.request_and_receive(&mut session, device, remote_path).await;
        session.close().await;
        result
    }

    async fn request_and_receive(
        &self,
        session: &mut crate::connect::Session,
        device: &Device,
        remote_path: &str,
    ) -> Result<PathBuf> {
        wire::write_message(
            &mut session.writer,
            &Message::FileDownloadRequest {
                path: remote_path.to_string(),
            },
        )
        .await?;

        let reply = timeout(RESPONSE_TIMEOUT, wire::read_message(&mut session.reader))
            .await
            .context("no reply to download request")??;
        let file = match reply {
            Some(Message::FileDownloadStart { file }) => file,
            Some(Message::Error { error }) => {
                bail!("{} refused the download: {}", device.name, error)
            }
            Some(other) => bail!("unexpected download reply (tag {})", other.type_tag()),
            None => bail!("peer closed before starting the download"),
        };

        let dest = PathBuf::from(self.store.config().downloads_dir).join(&file.name);

        let events = self.events.clone();
        let device_name = device.name.clone();
        let progress_name = file.name.clone();
        let received = wire::receive_file(
            &mut session.reader,
            &dest,
            file.size,
            |received, total| {
                events.emit(Event::TransferProgress(TransferProgress {
                    file_name: progress_name.clone(),
                    bytes_transferred: received,
                    total_bytes: total,
                    device_name: device_name.clone(),
                    is_upload: false,
                }));
            },
        )
        .await;

        let received = match received {
            Ok(checksum) => checksum,
            Err(e) => {
                // A half-written file is worse than no file.
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(e).context("transfer interrupted");
            }
        };

        if let Some(expected) = &file.checksum {
            if &received != expected {
                let _ = tokio::fs::remove_file(&dest).await;
                bail!(
                    "checksum mismatch for {} (expected {}, got {})",
                    file.name,
                    expected,
                    received
                );
            }
        }

        tracing::info!(device = %device.name, file = %file.name, dest = %dest.display(), "download complete");
        Ok(dest)
    }

    /// List a remote directory. An empty `path` means the peer's home
    /// directory. Entries are returned verbatim.
    pub async fn list(&self, device: &Device, path: &str) -> Result<DirListing> {
        let mut session = self.connector.connect(device).await?;
        let result = async {
            wire::write_message(
                &mut session.writer,
                &Message::ListDirRequest {
                    path: path.to_string(),
                },
            )
            .await?;

            let reply = timeout(RESPONSE_TIMEOUT, wire::read_message(&mut session.reader))
                .await
                .context("no reply to listing request")??;
            match reply {
                Some(Message::ListDirResponse(listing)) => Ok(listing),
                Some(Message::Error { error }) => {
                    bail!("{} refused the listing: {}", device.name, error)
                }
                Some(other) => bail!("unexpected listing reply (tag {})", other.type_tag()),
                None => bail!("peer closed before answering the listing"),
            }
        }
        .await;
        session.close().await;
        result
    }

    /// One-shot reachability check through a full handshake.
    pub async fn ping(&self, device: &Device) -> bool {
        self.connector.ping(device).await
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
