//! Hub boundary tests: validation, conflicts and emitted events

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use lanwatch::{
    AlertSeverity, AlertType, DeviceStatus, MapPosition,
    actors::messages::MonitorEvent,
    hub::{Hub, HubError},
    storage::{DeviceUpdate, MemoryBackend, NewAlert, NewDevice, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn hub_with(prober: Arc<ScriptedProber>) -> (Hub, Arc<MemoryBackend>) {
    let storage = Arc::new(MemoryBackend::new());
    let hub = Hub::new(storage.clone(), prober, Arc::new(StaticResolver::default()));
    (hub, storage)
}

#[tokio::test]
async fn test_add_device_rejects_duplicate_ip() {
    let (hub, _storage) = hub_with(Arc::new(ScriptedProber::new()));

    let device = hub
        .add_device(NewDevice::manual("nas", ip("10.0.0.5")))
        .await
        .unwrap();
    assert!(device.is_manual);
    assert_eq!(device.heart_count, 10);
    assert_eq!(device.status, DeviceStatus::Unknown);

    let err = hub
        .add_device(NewDevice::manual("other", ip("10.0.0.5")))
        .await
        .unwrap_err();
    assert_matches!(&err, HubError::DuplicateDevice(addr) if *addr == ip("10.0.0.5"));
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_concurrent_adds_of_one_ip() {
    let (hub, storage) = hub_with(Arc::new(ScriptedProber::new()));

    let results = futures::future::join_all(
        (0..5).map(|i| hub.add_device(NewDevice::manual(format!("nas-{i}"), ip("10.0.0.5")))),
    )
    .await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(HubError::is_conflict)
    );
    assert_eq!(storage.find_all_devices(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_and_delete_device() {
    let (hub, storage) = hub_with(Arc::new(ScriptedProber::new()));
    let mut events = hub.subscribe();
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let update = DeviceUpdate {
        name: Some("storage".to_string()),
        map_position: Some(Some(MapPosition {
            x: 10.0,
            y: 20.0,
            region: None,
        })),
        ..DeviceUpdate::default()
    };
    let updated = hub.update_device(&device.id, update).await.unwrap();
    assert_eq!(updated.name, "storage");
    assert_matches!(events.try_recv(), Ok(MonitorEvent::DeviceUpdated(d)) if d.name == "storage");

    assert_matches!(
        hub.update_device("missing", DeviceUpdate::default()).await,
        Err(HubError::NotFound(_))
    );

    hub.delete_device(&device.id).await.unwrap();
    assert_matches!(
        hub.delete_device(&device.id).await,
        Err(HubError::NotFound(_))
    );
}

#[tokio::test]
async fn test_device_name_and_position_are_bounded() {
    let (hub, storage) = hub_with(Arc::new(ScriptedProber::new()));

    let err = hub
        .add_device(NewDevice::manual("x".repeat(101), ip("10.0.0.5")))
        .await
        .unwrap_err();
    assert_matches!(&err, HubError::InvalidDevice(e) if e.field == "name");
    assert!(err.is_client_error());

    let mut off_map = NewDevice::manual("nas", ip("10.0.0.5"));
    off_map.map_position = Some(MapPosition {
        x: 50.0,
        y: 120.0,
        region: None,
    });
    assert_matches!(
        hub.add_device(off_map).await,
        Err(HubError::InvalidDevice(e)) if e.field == "mapPosition.y"
    );
    assert!(storage.find_all_devices(None).await.unwrap().is_empty());

    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;
    let rename = DeviceUpdate {
        name: Some(String::new()),
        ..DeviceUpdate::default()
    };
    assert_matches!(
        hub.update_device(&device.id, rename).await,
        Err(HubError::InvalidDevice(e)) if e.field == "name"
    );
    let stored = storage.find_device_by_id(&device.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "nas");
}

#[tokio::test]
async fn test_abort_without_scan_is_client_error() {
    let (hub, _storage) = hub_with(Arc::new(ScriptedProber::new()));

    let err = hub.abort_scan().unwrap_err();
    assert_matches!(err, HubError::NoActiveScan);
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_trigger_scan_conflicts_while_running() {
    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_millis(20)));
    let (hub, storage) = hub_with(prober);
    storage
        .save_config(&config_with_subnets(&["10.0.0.0/27"]))
        .await
        .unwrap();
    let hub = Arc::new(hub);

    let running = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.trigger_scan().await })
    };
    while !hub.is_scanning() {
        tokio::task::yield_now().await;
    }

    assert_matches!(hub.trigger_scan().await, Err(HubError::ScanInProgress));
    hub.abort_scan().unwrap();

    running.await.unwrap().unwrap();
    assert!(!hub.is_scanning());
}

#[tokio::test]
async fn test_trigger_scan_reports_bad_range() {
    let (hub, storage) = hub_with(Arc::new(ScriptedProber::new()));

    let mut config = config_with_subnets(&["10.0.0.0/29"]);
    config.subnets[0].range = "10.0.0.0/40".to_string();
    storage.save_config(&config).await.unwrap();

    let err = hub.trigger_scan().await.unwrap_err();
    assert_matches!(err, HubError::InvalidRange(_));
}

#[tokio::test]
async fn test_ping_device() {
    let prober = Arc::new(ScriptedProber::new());
    prober.script(ip("10.0.0.5"), vec![lossy(12.5, 25.0)]);
    let (hub, storage) = hub_with(prober.clone());
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let report = hub.ping_device(&device.id).await.unwrap();
    assert_eq!(report.device, "nas");
    assert!(report.result.alive);
    assert_eq!(report.result.avg_latency_ms, Some(12.5));

    // on-demand pings are not recorded
    assert!(storage.latest_metric(&device.id).await.unwrap().is_none());

    assert_matches!(hub.ping_device("missing").await, Err(HubError::NotFound(_)));
}

#[tokio::test]
async fn test_acknowledge_alerts() {
    let (hub, storage) = hub_with(Arc::new(ScriptedProber::new()));
    let mut events = hub.subscribe();

    let mut ids = Vec::new();
    for message in ["first", "second", "third"] {
        let alert = storage
            .create_alert(NewAlert::new(
                None,
                AlertType::DeviceDown,
                AlertSeverity::Critical,
                message,
            ))
            .await
            .unwrap();
        ids.push(alert.id);
    }

    let alert = hub.acknowledge_alert(&ids[0]).await.unwrap();
    assert!(alert.acknowledged);
    assert_matches!(
        events.try_recv(),
        Ok(MonitorEvent::AlertAcknowledged { alert_id: Some(id), count: 1 }) if id == ids[0]
    );

    assert_eq!(hub.acknowledge_all_alerts().await.unwrap(), 2);
    assert_matches!(
        events.try_recv(),
        Ok(MonitorEvent::AlertAcknowledged {
            alert_id: None,
            count: 2
        })
    );
    assert_eq!(storage.unacknowledged_alert_count().await.unwrap(), 0);

    assert_matches!(
        hub.acknowledge_alert("missing").await,
        Err(HubError::NotFound(_))
    );
}

#[tokio::test]
async fn test_update_config_validates_before_saving() {
    let (hub, _storage) = hub_with(Arc::new(ScriptedProber::new()));

    let mut config = hub.config().await.unwrap();
    config.pings_per_check = 0;
    assert_matches!(
        hub.update_config(config).await,
        Err(HubError::InvalidConfig(e)) if e.field == "pingsPerCheck"
    );
    assert_eq!(hub.config().await.unwrap().pings_per_check, 4);

    let mut config = hub.config().await.unwrap();
    config.pings_per_check = 2;
    hub.update_config(config.clone()).await.unwrap();
    assert_eq!(hub.config().await.unwrap(), config);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_shutdown() {
    let prober = Arc::new(ScriptedProber::new());
    prober.answer(ip("10.0.0.2"), 1.0);
    let (hub, storage) = hub_with(prober.clone());
    storage
        .save_config(&config_with_subnets(&["10.0.0.0/29"]))
        .await
        .unwrap();
    let mut events = hub.subscribe();

    hub.start().await.unwrap();
    assert!(hub.is_health_monitor_running().await);

    // the initial scan finds the host
    let discovered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(MonitorEvent::DeviceDiscovered(device)) = events.recv().await {
                return device;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(discovered.ip, ip("10.0.0.2"));

    // the next health cycle picks it up
    tokio::time::sleep(Duration::from_secs(31)).await;
    let device = storage
        .find_device_by_id(&discovered.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Online);

    assert!(hub.stop_health_monitor().await);
    assert!(!hub.is_health_monitor_running().await);
    hub.start_health_monitor().await.unwrap();
    assert!(hub.is_health_monitor_running().await);

    hub.shutdown().await;
    assert!(!hub.is_health_monitor_running().await);
    assert!(!hub.is_scanning());
}
