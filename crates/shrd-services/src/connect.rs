//! Outbound connection management — connect-with-retry, the
//! HELLO/HELLO_ACK handshake, liveness probes, and safe teardown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use shrd_core::wire::{self, Identity, Message};
use shrd_core::Device;

use crate::events::{Event, EventBus};
use crate::store::Store;

pub const MAX_CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BASE_DELAY: f64 = 0.5;
const RETRY_JITTER: f64 = 0.5;
const RETRY_MAX_DELAY: f64 = 5.0;
const PING_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One TCP connection with one completed handshake.
///
/// The session owns its halves exclusively; exactly one writer exists,
/// which is what keeps FILE_CHUNK headers and bodies adjacent on the
/// stream.
pub struct Session {
    pub reader: OwnedReadHalf,
    pub writer: OwnedWriteHalf,
    /// Identity the peer presented in HELLO_ACK.
    pub peer: Identity,
}

impl Session {
    /// Teardown that never fails: bounded shutdown, errors swallowed.
    pub async fn close(mut self) {
        let _ = timeout(CLOSE_TIMEOUT, self.writer.shutdown()).await;
    }
}

/// `min(base × 2^(attempt−1) + uniform[0, jitter), max)` seconds.
pub fn backoff(attempt: u32, base: f64, jitter: f64, max: f64) -> Duration {
    let exp = base * f64::powi(2.0, attempt as i32 - 1);
    let jittered = exp + rand::thread_rng().gen_range(0.0..jitter);
    Duration::from_secs_f64(jittered.min(max))
}

/// Bare TCP reachability check — no handshake, closed immediately.
pub async fn probe(host: &str, port: u16, probe_timeout: Duration) -> bool {
    matches!(
        timeout(probe_timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// The single entry point for outbound sessions.
pub struct Connector {
    store: Arc<Store>,
    events: EventBus,
}

impl Connector {
    pub fn new(store: Arc<Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    fn identity(&self) -> Identity {
        let config = self.store.config();
        Identity {
            device_id: config.device_id,
            device_name: config.device_name,
        }
    }

    /// Connect and handshake, retrying with jittered exponential backoff.
    /// Returns a live post-handshake session, or the last error after
    /// every attempt is exhausted.
    pub async fn connect(&self, device: &Device) -> Result<Session> {
        let mut last_error = None;

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match self
                .try_handshake(device, CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT)
                .await
            {
                Ok(session) => return Ok(session),
                Err(e) => {
                    tracing::debug!(
                        device = %device.name,
                        attempt,
                        max = MAX_CONNECT_ATTEMPTS,
                        error = %e,
                        "connection attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < MAX_CONNECT_ATTEMPTS {
                        self.events.emit(Event::ConnectionRetry {
                            device_name: device.name.clone(),
                            attempt,
                            max: MAX_CONNECT_ATTEMPTS,
                        });
                        tokio::time::sleep(backoff(
                            attempt,
                            RETRY_BASE_DELAY,
                            RETRY_JITTER,
                            RETRY_MAX_DELAY,
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no connection attempt ran")))
            .with_context(|| {
                format!(
                    "failed to connect to {} after {} attempts",
                    device.name, MAX_CONNECT_ATTEMPTS
                )
            })
    }

    /// Liveness-style check through a full handshake: 5 s timeouts, one
    /// attempt, no retry.
    pub async fn ping(&self, device: &Device) -> bool {
        match self.try_handshake(device, PING_TIMEOUT, PING_TIMEOUT).await {
            Ok(session) => {
                session.close().await;
                true
            }
            Err(e) => {
                tracing::trace!(device = %device.name, error = %e, "ping failed");
                false
            }
        }
    }

    async fn try_handshake(
        &self,
        device: &Device,
        connect_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Result<Session> {
        let stream = timeout(
            connect_timeout,
            TcpStream::connect((device.host.as_str(), device.port)),
        )
        .await
        .context("connect timed out")?
        .context("connect failed")?;

        let (mut reader, mut writer) = stream.into_split();
        wire::write_message(&mut writer, &Message::Hello(self.identity())).await?;

        let reply = timeout(handshake_timeout, wire::read_message(&mut reader))
            .await
            .context("handshake timed out")??;

        match reply {
            Some(Message::HelloAck(peer)) => Ok(Session {
                reader,
                writer,
                peer,
            }),
            Some(other) => {
                let _ = timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
                bail!("unexpected handshake reply (tag {})", other.type_tag())
            }
            None => bail!("peer closed during handshake"),
        }
    }
}
