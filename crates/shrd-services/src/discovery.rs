//! mDNS discovery — advertise the local node and browse for peers.
//!
//! Quiet by design: known devices are updated silently, and the
//! new-device event fires at most once per identifier per process
//! lifetime. A service-removal callback is treated as a suspicion, not a
//! verdict — the device is probed before anything flips offline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashSet;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::broadcast;

use shrd_core::{hash, AppConfig, Device};

use crate::events::{Event, EventBus};
use crate::liveness::Monitor;
use crate::store::{now_iso, Store};

pub const SERVICE_TYPE: &str = "_2bshrd._tcp.local.";

/// Grace period between a removal callback and the verification probes.
const REMOVAL_GRACE: Duration = Duration::from_secs(1);

pub struct Discovery {
    store: Arc<Store>,
    events: EventBus,
    monitor: Monitor,
    /// Identifiers that already produced a new-device event, seeded with
    /// the persisted registry. Probes and mDNS callbacks may race, so
    /// membership is checked and inserted in one step.
    seen: DashSet<String>,
}

impl Discovery {
    pub fn new(store: Arc<Store>, events: EventBus, monitor: Monitor) -> Self {
        Self {
            store,
            events,
            monitor,
            seen: DashSet::new(),
        }
    }

    /// Register the advertisement and run the browse loop until
    /// shutdown. Returns early with an error if mDNS is unavailable;
    /// the rest of the daemon (liveness included) keeps working without
    /// it.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let daemon = ServiceDaemon::new().context("mDNS daemon unavailable")?;
        let fullname = self.advertise(&daemon)?;
        let browser = daemon
            .browse(SERVICE_TYPE)
            .context("mDNS browse unavailable")?;

        for device in self.store.devices() {
            self.seen.insert(device.id);
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = daemon.unregister(&fullname);
                    let _ = daemon.shutdown();
                    tracing::info!("discovery shutting down");
                    return Ok(());
                }
                event = browser.recv_async() => {
                    match event {
                        Ok(ServiceEvent::ServiceResolved(info)) => self.handle_resolved(&info),
                        Ok(ServiceEvent::ServiceRemoved(_, name)) => {
                            let store = Arc::clone(&self.store);
                            let monitor = self.monitor.clone();
                            tokio::spawn(handle_removed(store, monitor, name));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "mDNS browse channel closed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn advertise(&self, daemon: &ServiceDaemon) -> Result<String> {
        let config = self.store.config();
        let ip = primary_ipv4();
        let pairing = hash::pairing_code(&config.device_id, &ip, config.port);

        let properties = [
            ("device_id", config.device_id.as_str()),
            ("device_name", config.device_name.as_str()),
            ("pairing_code", pairing.as_str()),
        ];
        let host = format!("{}.local.", config.device_name.replace(' ', "-"));
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &config.device_name,
            &host,
            ip.as_str(),
            config.port,
            &properties[..],
        )
        .context("invalid service registration")?;
        let fullname = info.get_fullname().to_string();
        daemon
            .register(info)
            .context("failed to register mDNS service")?;
        tracing::info!(
            instance = %fullname,
            %ip,
            port = config.port,
            pairing = %pairing,
            "advertising on the local network"
        );
        Ok(fullname)
    }

    fn handle_resolved(&self, info: &ServiceInfo) {
        let Some(device_id) = info.get_property_val_str("device_id") else {
            return;
        };
        let device_name = info
            .get_property_val_str("device_name")
            .unwrap_or("unknown")
            .to_string();

        // Our own advertisement comes back through the browser too.
        if device_id == self.store.config().device_id {
            return;
        }

        let addresses = info.get_addresses();
        let Some(addr) = addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addresses.iter().next())
        else {
            return;
        };
        let host = addr.to_string();
        let port = info.get_port();

        match self.store.device(device_id) {
            Some(mut existing) => {
                // Known device: silent update, event only on a change.
                if existing.host != host || !existing.is_online {
                    existing.host = host;
                    existing.is_online = true;
                    existing.last_seen = Some(now_iso());
                    if let Err(e) = self.store.update_device(existing) {
                        tracing::warn!(device_id, error = %e, "failed to persist rediscovery");
                    }
                    self.events.emit(Event::DeviceStatus {
                        device_id: device_id.to_string(),
                        online: true,
                    });
                }
            }
            None => {
                if self.seen.insert(device_id.to_string()) {
                    let device = Device {
                        id: device_id.to_string(),
                        name: device_name,
                        host,
                        port,
                        last_seen: Some(now_iso()),
                        is_online: true,
                    };
                    if let Err(e) = self.store.add_device(device.clone()) {
                        tracing::warn!(device_id, error = %e, "failed to enroll device");
                    }
                    tracing::info!(
                        device = %device.name,
                        host = %device.host,
                        port = device.port,
                        "discovered new device"
                    );
                    self.events.emit(Event::NewDevice(device));
                }
            }
        }
    }
}

/// Removal callbacks only name the service instance, so match enrolled
/// devices by name containment, wait out the blip window, and let the
/// liveness monitor confirm before anything goes offline.
async fn handle_removed(store: Arc<Store>, monitor: Monitor, service_name: String) {
    tokio::time::sleep(REMOVAL_GRACE).await;
    for device in store.devices() {
        if service_name.contains(&device.name) {
            tracing::debug!(device = %device.name, "service removed, verifying");
            monitor.verify_suspected_offline(&device.id).await;
            break;
        }
    }
}

/// Primary egress IPv4: connect a UDP socket toward a public address and
/// read the local end. No packets are sent. Falls back to loopback when
/// there is no route at all.
pub fn primary_ipv4() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// The pairing code this node currently shows, as derived from its
/// identity, primary IP, and port.
pub fn local_pairing_code(config: &AppConfig) -> String {
    hash::pairing_code(&config.device_id, &primary_ipv4(), config.port)
}
