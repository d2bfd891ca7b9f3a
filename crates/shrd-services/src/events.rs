//! The core's event surface.
//!
//! Events flow out of the core over a single channel, one typed variant
//! per event. The UI (or the daemon's log consumer) owns the receiving
//! end; a detached receiver just means nobody is listening, never an
//! error inside the core.
//!
//! The one inbound decision — accept or reject a file offer — is a trait
//! seam injected at server construction.

use shrd_core::{Device, FileInfo, TransferProgress};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Event {
    /// A never-before-seen peer appeared on the network and was
    /// enrolled. Fired at most once per identifier per process lifetime.
    NewDevice(Device),
    /// An enrolled device changed between online and offline.
    DeviceStatus { device_id: String, online: bool },
    TransferProgress(TransferProgress),
    /// An inbound transfer finished (or failed verification).
    TransferComplete { path: String, success: bool },
    /// An outbound connection attempt failed and will be retried.
    ConnectionRetry {
        device_name: String,
        attempt: u32,
        max: u32,
    },
    /// A background reconnect probe is about to run for an offline peer.
    ReconnectAttempt { device_id: String, attempt: u32 },
}

/// Cloneable sending side of the event channel.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventBus {
    pub fn channel() -> (EventBus, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventBus { tx }, rx)
    }

    /// A bus nobody listens to. Handy for one-shot tools and tests.
    pub fn discard() -> EventBus {
        Self::channel().0
    }

    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Decision seam for inbound file offers.
///
/// Consulted only when `auto_accept` is off. `from` carries the identity
/// the peer presented in its handshake plus the address it connected
/// from; its port is 0 because the peer's listening port is not part of
/// the session.
pub trait AcceptPolicy: Send + Sync {
    fn accept(&self, from: &Device, file: &FileInfo) -> bool;
}

/// Accepts every offer.
pub struct AcceptAll;

impl AcceptPolicy for AcceptAll {
    fn accept(&self, _from: &Device, _file: &FileInfo) -> bool {
        true
    }
}

/// Rejects every offer. The default when no UI is attached: with
/// `auto_accept` off, unattended nodes should not take files.
pub struct RejectAll;

impl AcceptPolicy for RejectAll {
    fn accept(&self, _from: &Device, _file: &FileInfo) -> bool {
        false
    }
}
