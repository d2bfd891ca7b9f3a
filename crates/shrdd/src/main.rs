//! shrdd — the shrd peer-to-peer file-sharing daemon.
//!
//! Runs the protocol server, mDNS advertisement/browse, and the
//! liveness monitor over one shared device registry. Core events are
//! logged; a GUI would consume the same channel instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use shrd_services::events::RejectAll;
use shrd_services::{Discovery, Event, EventBus, Monitor, Server, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug shrdd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Optional first argument: an alternate config directory, mainly for
    // running several nodes on one machine.
    let store = Arc::new(match std::env::args().nth(1) {
        Some(dir) => Store::open(dir)?,
        None => Store::open_default()?,
    });

    let config = store.config();
    tracing::info!(
        device_id = %config.device_id,
        device_name = %config.device_name,
        port = config.port,
        "shrdd starting"
    );

    let (events, mut event_rx) = EventBus::channel();
    let (shutdown_tx, _) = broadcast::channel(8);

    // Without a UI attached, unattended nodes only take files when
    // auto_accept is configured.
    let server = Server::new(Arc::clone(&store), events.clone(), Arc::new(RejectAll));
    server.start(shutdown_tx.subscribe()).await?;

    let monitor = Monitor::new(Arc::clone(&store), events.clone(), shutdown_tx.clone());
    tokio::spawn(monitor.clone().run());

    let discovery = Discovery::new(Arc::clone(&store), events.clone(), monitor);
    let discovery_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = discovery.run(discovery_shutdown).await {
            tracing::warn!(error = %e, "discovery unavailable, running without mDNS");
        }
    });

    let event_log = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(event);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(());
    // Give the loops a moment to observe the signal before the runtime
    // drops them.
    tokio::time::sleep(Duration::from_millis(200)).await;
    event_log.abort();
    Ok(())
}

fn log_event(event: Event) {
    match event {
        Event::NewDevice(device) => {
            tracing::info!(device = %device.name, host = %device.host, "new device enrolled");
        }
        Event::DeviceStatus { device_id, online } => {
            tracing::info!(%device_id, online, "device status changed");
        }
        Event::TransferProgress(progress) => {
            tracing::debug!(
                file = %progress.file_name,
                device = %progress.device_name,
                percent = progress.percent() as u32,
                upload = progress.is_upload,
                "transfer progress"
            );
        }
        Event::TransferComplete { path, success } => {
            tracing::info!(%path, success, "transfer finished");
        }
        Event::ConnectionRetry {
            device_name,
            attempt,
            max,
        } => {
            tracing::info!(device = %device_name, attempt, max, "retrying connection");
        }
        Event::ReconnectAttempt { device_id, attempt } => {
            tracing::debug!(%device_id, attempt, "reconnect probe scheduled");
        }
    }
}
