//! shrd integration harness.
//!
//! Every scenario runs real nodes in-process over loopback TCP: a full
//! protocol server per node, the real client, and per-node scratch
//! directories. No network setup is required.

#![allow(dead_code)]

mod liveness;
mod transfer;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use shrd_core::Device;
use shrd_services::events::RejectAll;
use shrd_services::{AcceptPolicy, Event, EventBus, Server, Store, TransferClient};

/// One in-process node: store, event channel, and a running server
/// bound to an OS-assigned loopback port.
pub struct TestNode {
    pub dir: tempfile::TempDir,
    pub store: Arc<Store>,
    pub bus: EventBus,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub addr: std::net::SocketAddr,
    pub shutdown: broadcast::Sender<()>,
}

pub async fn spawn_node(auto_accept: bool, policy: Arc<dyn AcceptPolicy>) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());

    let mut config = store.config();
    config.port = 0; // let the OS pick
    config.auto_accept = auto_accept;
    config.downloads_dir = dir
        .path()
        .join("downloads")
        .to_string_lossy()
        .into_owned();
    store.set_config(config).unwrap();

    let (bus, events) = EventBus::channel();
    let (shutdown, _) = broadcast::channel(1);
    let server = Server::new(Arc::clone(&store), bus.clone(), policy);
    let addr = server.start(shutdown.subscribe()).await.unwrap();

    TestNode {
        dir,
        store,
        bus,
        events,
        addr,
        shutdown,
    }
}

/// A node that auto-accepts inbound files.
pub async fn accepting_node() -> TestNode {
    spawn_node(true, Arc::new(RejectAll)).await
}

/// A node with auto-accept off and a rejecting decision hook.
pub async fn rejecting_node() -> TestNode {
    spawn_node(false, Arc::new(RejectAll)).await
}

impl TestNode {
    /// This node's server, seen from a peer's registry.
    pub fn as_device(&self, name: &str) -> Device {
        Device {
            id: format!("{name}-id"),
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            last_seen: None,
            is_online: true,
        }
    }

    pub fn client(&self) -> TransferClient {
        TransferClient::new(Arc::clone(&self.store), self.bus.clone())
    }

    pub fn downloads(&self) -> PathBuf {
        PathBuf::from(self.store.config().downloads_dir)
    }

    /// Drain every event delivered so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
