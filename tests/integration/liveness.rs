use crate::*;

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use shrd_services::{LivenessTuning, Monitor};

fn quick_tuning() -> LivenessTuning {
    LivenessTuning {
        interval_all_online: Duration::from_millis(60),
        interval_any_offline: Duration::from_millis(30),
        initial_delay: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(400),
        probe_attempts: 2,
        probe_retry_pause: Duration::from_millis(10),
        offline_threshold: 2,
        max_reconnect_attempts: 5,
        reconnect_base_delay: 0.02,
        reconnect_max_delay: 0.08,
        removal_probe_timeout: Duration::from_millis(400),
        removal_probe_pause: Duration::from_millis(10),
    }
}

/// Keep accepting (and dropping) connections until told to stop.
fn accept_loop(listener: TcpListener) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    })
}

/// The flap-then-recover scenario: a reachable device loses its port,
/// survives one failed round, flips offline on the second, and a
/// reconnect probe flips it back online exactly once after the port
/// returns.
#[tokio::test]
async fn flap_then_recover_transitions_exactly_once_each_way() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let (bus, mut events) = EventBus::channel();
    let (shutdown, _) = broadcast::channel(1);
    let monitor = Monitor::with_tuning(
        Arc::clone(&store),
        bus,
        shutdown.clone(),
        quick_tuning(),
    );

    // A live listener, enrolled as an online device.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = accept_loop(listener);
    store
        .add_device(Device {
            id: "flappy-id".into(),
            name: "flappy".into(),
            host: "127.0.0.1".into(),
            port,
            last_seen: None,
            is_online: true,
        })
        .unwrap();

    // Healthy round: nothing changes.
    monitor.sweep().await;
    assert!(store.device("flappy-id").unwrap().is_online);

    // The peer goes away.
    accept.abort();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // One failed round is a blip, not an outage.
    monitor.sweep().await;
    assert!(
        store.device("flappy-id").unwrap().is_online,
        "a single failed round must not flip the device"
    );

    // The second failed round confirms the outage and starts reconnects.
    monitor.sweep().await;
    assert!(!store.device("flappy-id").unwrap().is_online);

    // The peer comes back on the same port.
    let revived = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let _accept = accept_loop(revived);

    // A pending reconnect probe should flip it online shortly.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !store.device("flappy-id").unwrap().is_online {
        assert!(
            tokio::time::Instant::now() < deadline,
            "device never came back online"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(store.device("flappy-id").unwrap().last_seen.is_some());

    // Exactly one offline and one online transition were announced.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut offline = 0;
    let mut online = 0;
    while let Ok(event) = events.try_recv() {
        if let Event::DeviceStatus { online: is_online, .. } = event {
            if is_online {
                online += 1;
            } else {
                offline += 1;
            }
        }
    }
    assert_eq!(offline, 1, "one offline transition");
    assert_eq!(online, 1, "one online transition");
}

/// The monitor's background loop performs the initial sweep on its own.
#[tokio::test]
async fn background_loop_runs_the_initial_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let (bus, mut events) = EventBus::channel();
    let (shutdown, _) = broadcast::channel(1);
    let monitor = Monitor::with_tuning(
        Arc::clone(&store),
        bus,
        shutdown.clone(),
        quick_tuning(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _accept = accept_loop(listener);
    store
        .add_device(Device {
            id: "sleepy-id".into(),
            name: "sleepy".into(),
            host: "127.0.0.1".into(),
            port,
            last_seen: None,
            is_online: false,
        })
        .unwrap();

    let run = tokio::spawn(monitor.clone().run());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !store.device("sleepy-id").unwrap().is_online {
        assert!(
            tokio::time::Instant::now() < deadline,
            "initial sweep never marked the device online"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(matches!(
        events.recv().await,
        Some(Event::DeviceStatus { online: true, .. })
    ));

    // Cooperative cancellation at the next suspension point.
    shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("monitor loop must stop on shutdown")
        .unwrap();
}
