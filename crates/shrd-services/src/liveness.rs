//! Liveness monitor — adaptive health polling, offline hysteresis, and
//! backoff-driven reconnection.
//!
//! The monitor is the sole writer of `Device::is_online`, with one
//! exception: the discovery add-service path may flip a device back
//! online when it re-resolves. A single failed probe round never takes
//! a device offline; two consecutive failed rounds do.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tokio::time::sleep;

use shrd_core::Device;

use crate::connect::{backoff, probe};
use crate::events::{Event, EventBus};
use crate::store::{now_iso, Store};

/// Timing knobs. `Default` is the production cadence; tests compress the
/// intervals without touching the transition logic.
#[derive(Debug, Clone)]
pub struct LivenessTuning {
    /// Sweep interval while every enrolled device is online.
    pub interval_all_online: Duration,
    /// Sweep interval while any device is offline.
    pub interval_any_offline: Duration,
    /// Delay before the first sweep after startup.
    pub initial_delay: Duration,
    pub probe_timeout: Duration,
    /// Probe attempts per round per device.
    pub probe_attempts: u32,
    pub probe_retry_pause: Duration,
    /// Consecutive failed rounds before a device goes offline.
    pub offline_threshold: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: f64,
    pub reconnect_max_delay: f64,
    /// Probe timeout for the mDNS-removal verification path.
    pub removal_probe_timeout: Duration,
    pub removal_probe_pause: Duration,
}

impl Default for LivenessTuning {
    fn default() -> Self {
        Self {
            interval_all_online: Duration::from_secs(10),
            interval_any_offline: Duration::from_secs(5),
            initial_delay: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(3),
            probe_attempts: 2,
            probe_retry_pause: Duration::from_millis(500),
            offline_threshold: 2,
            max_reconnect_attempts: 5,
            reconnect_base_delay: 1.0,
            reconnect_max_delay: 30.0,
            removal_probe_timeout: Duration::from_secs(2),
            removal_probe_pause: Duration::from_millis(500),
        }
    }
}

/// Cheap-to-clone handle: clones share the same counters, so the loop,
/// spawned reconnect tasks, and the discovery verification path all see
/// one set of books.
#[derive(Clone)]
pub struct Monitor {
    store: Arc<Store>,
    events: EventBus,
    tuning: Arc<LivenessTuning>,
    /// Consecutive failed probe rounds, per device id.
    failures: Arc<DashMap<String, u32>>,
    /// Current reconnect attempt, per device id.
    reconnect_attempts: Arc<DashMap<String, u32>>,
    /// Devices with a reconnect task in flight.
    pending_reconnects: Arc<DashSet<String>>,
    /// Kept to mint receivers for the loop and spawned reconnect tasks.
    shutdown: broadcast::Sender<()>,
}

impl Monitor {
    pub fn new(store: Arc<Store>, events: EventBus, shutdown: broadcast::Sender<()>) -> Self {
        Self::with_tuning(store, events, shutdown, LivenessTuning::default())
    }

    pub fn with_tuning(
        store: Arc<Store>,
        events: EventBus,
        shutdown: broadcast::Sender<()>,
        tuning: LivenessTuning,
    ) -> Self {
        Self {
            store,
            events,
            tuning: Arc::new(tuning),
            failures: Arc::new(DashMap::new()),
            reconnect_attempts: Arc::new(DashMap::new()),
            pending_reconnects: Arc::new(DashSet::new()),
            shutdown,
        }
    }

    /// Background loop: an early first sweep, then adaptive-interval
    /// rounds until shutdown.
    pub async fn run(self) {
        let mut shutdown = self.shutdown.subscribe();

        tokio::select! {
            _ = shutdown.recv() => return,
            _ = sleep(self.tuning.initial_delay) => {}
        }
        tracing::debug!("running initial device sweep");
        self.sweep().await;

        loop {
            let any_offline = self.store.devices().iter().any(|d| !d.is_online);
            let interval = if any_offline {
                self.tuning.interval_any_offline
            } else {
                self.tuning.interval_all_online
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("liveness monitor shutting down");
                    return;
                }
                _ = sleep(interval) => {}
            }
            self.sweep().await;
        }
    }

    /// Probe every enrolled device concurrently. A device failing its
    /// probe affects only its own bookkeeping, never the round.
    pub async fn sweep(&self) {
        let devices = self.store.devices();
        if devices.is_empty() {
            return;
        }
        futures::future::join_all(
            devices
                .into_iter()
                .map(|device| self.check_device(device)),
        )
        .await;
    }

    async fn check_device(&self, device: Device) {
        let mut online = false;
        for attempt in 0..self.tuning.probe_attempts {
            online = probe(&device.host, device.port, self.tuning.probe_timeout).await;
            if online {
                break;
            }
            if attempt + 1 < self.tuning.probe_attempts {
                sleep(self.tuning.probe_retry_pause).await;
            }
        }

        if online {
            self.note_reachable(&device.id);
        } else {
            let failures = {
                let mut entry = self.failures.entry(device.id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            tracing::trace!(device = %device.name, failures, "probe round failed");
            if failures >= self.tuning.offline_threshold {
                self.take_offline(&device.id);
            }
        }
    }

    /// Reset counters; if the device was offline, flip it online, stamp
    /// last-seen, persist, and emit the status transition.
    fn note_reachable(&self, device_id: &str) {
        self.failures.insert(device_id.to_string(), 0);
        self.reconnect_attempts.insert(device_id.to_string(), 0);
        self.pending_reconnects.remove(device_id);

        let Some(mut device) = self.store.device(device_id) else {
            return;
        };
        if device.is_online {
            return;
        }
        device.is_online = true;
        device.last_seen = Some(now_iso());
        if let Err(e) = self.store.update_device(device.clone()) {
            tracing::warn!(device = %device.name, error = %e, "failed to persist online flip");
        }
        tracing::info!(device = %device.name, "device is back online");
        self.events.emit(Event::DeviceStatus {
            device_id: device_id.to_string(),
            online: true,
        });
    }

    /// Offline transition: persist, emit, and start a reconnect task if
    /// none is already pending for this device.
    fn take_offline(&self, device_id: &str) {
        let Some(mut device) = self.store.device(device_id) else {
            return;
        };
        if !device.is_online {
            return;
        }
        device.is_online = false;
        if let Err(e) = self.store.update_device(device.clone()) {
            tracing::warn!(device = %device.name, error = %e, "failed to persist offline flip");
        }
        tracing::info!(device = %device.name, "device went offline");
        self.events.emit(Event::DeviceStatus {
            device_id: device_id.to_string(),
            online: false,
        });
        self.schedule_reconnect(device);
    }

    fn schedule_reconnect(&self, device: Device) {
        if !self.pending_reconnects.insert(device.id.clone()) {
            return; // a task is already working on this device
        }
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.reconnect_with_backoff(device).await;
        });
    }

    async fn reconnect_with_backoff(self, device: Device) {
        let mut shutdown = self.shutdown.subscribe();

        for attempt in 1..=self.tuning.max_reconnect_attempts {
            self.reconnect_attempts.insert(device.id.clone(), attempt);

            let delay = backoff(
                attempt,
                self.tuning.reconnect_base_delay,
                1.0,
                self.tuning.reconnect_max_delay,
            );
            tracing::info!(
                device = %device.name,
                attempt,
                max = self.tuning.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect probe"
            );
            self.events.emit(Event::ReconnectAttempt {
                device_id: device.id.clone(),
                attempt,
            });

            tokio::select! {
                _ = shutdown.recv() => return,
                _ = sleep(delay) => {}
            }

            // Re-read the record: the host may have moved, or the user
            // may have removed the device while we slept.
            let Some(current) = self.store.device(&device.id) else {
                self.pending_reconnects.remove(&device.id);
                return;
            };
            if probe(&current.host, current.port, self.tuning.probe_timeout).await {
                tracing::info!(device = %current.name, "reconnected");
                self.note_reachable(&device.id);
                return;
            }
        }

        self.pending_reconnects.remove(&device.id);
        tracing::warn!(
            device = %device.name,
            attempts = self.tuning.max_reconnect_attempts,
            "reconnect attempts exhausted, leaving device offline"
        );
    }

    /// Externally callable: reset all bookkeeping for a device and probe
    /// it right now. Returns whether the device answered.
    pub async fn force_reconnect(&self, device_id: &str) -> bool {
        self.failures.insert(device_id.to_string(), 0);
        self.reconnect_attempts.insert(device_id.to_string(), 0);
        self.pending_reconnects.remove(device_id);

        let Some(device) = self.store.device(device_id) else {
            return false;
        };
        let online = probe(&device.host, device.port, self.tuning.probe_timeout).await;
        if online {
            self.note_reachable(device_id);
        }
        online
    }

    /// Verification path for an mDNS service-removal callback: the
    /// device is only suspected offline, so probe twice before believing
    /// it. Confirmed unreachability fast-tracks the failure counter to
    /// the threshold and starts reconnection.
    pub async fn verify_suspected_offline(&self, device_id: &str) {
        let Some(device) = self.store.device(device_id) else {
            return;
        };

        let mut online = probe(
            &device.host,
            device.port,
            self.tuning.removal_probe_timeout,
        )
        .await;
        if !online {
            sleep(self.tuning.removal_probe_pause).await;
            online = probe(
                &device.host,
                device.port,
                self.tuning.removal_probe_timeout,
            )
            .await;
        }

        if !online && device.is_online {
            tracing::info!(device = %device.name, "departure confirmed by probe");
            self.failures
                .insert(device.id.clone(), self.tuning.offline_threshold);
            self.take_offline(&device.id);
        }
    }
}
