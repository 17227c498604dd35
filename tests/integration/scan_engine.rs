//! Discovery scan tests
//!
//! - Responding hosts become devices, known hosts are left alone
//! - Range expansion, disabled subnets and malformed ranges
//! - Bounded concurrency, single-flight and cooperative abort
//! - Progress and completion events

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use lanwatch::{
    AlertType, DeviceStatus,
    actors::messages::{MonitorEvent, ScanResult},
    net::RangeError,
    storage::{AlertQuery, MemoryBackend, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_scan_discovers_responding_hosts() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());
    prober.answer(ip("10.0.0.1"), 1.0);
    prober.answer(ip("10.0.0.5"), 3.0);
    let resolver = StaticResolver::default().with(ip("10.0.0.1"), "router.lan");

    let (scanner, mut events) = scanner(storage.clone(), prober.clone(), resolver);
    let result = scanner
        .scan(&config_with_subnets(&["10.0.0.0/29"]))
        .await
        .unwrap();

    assert_eq!(result.devices_found, 2);
    assert_eq!(result.new_devices, 2);
    assert!(!result.aborted);
    assert_eq!(prober.calls(), 6);

    let devices = storage.find_all_devices(None).await.unwrap();
    let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["10.0.0.5", "router.lan"]);

    let router = &devices[1];
    assert_eq!(router.hostname.as_deref(), Some("router.lan"));
    assert_eq!(router.status, DeviceStatus::Unknown);
    assert_eq!(router.heart_count, 10);
    assert!(!router.is_manual);

    let discovered = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, MonitorEvent::DeviceDiscovered(_)))
        .count();
    assert_eq!(discovered, 2);

    // discovery alerts are off by default
    assert!(
        storage
            .find_alerts(AlertQuery::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_rescan_does_not_duplicate_devices() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());
    prober.answer(ip("10.0.0.2"), 1.0);
    let config = config_with_subnets(&["10.0.0.0/29"]);

    let (scanner, _events) = scanner(storage.clone(), prober, StaticResolver::default());
    scanner.scan(&config).await.unwrap();
    let second = scanner.scan(&config).await.unwrap();

    assert_eq!(second.devices_found, 1);
    assert_eq!(second.new_devices, 0);
    assert_eq!(storage.find_all_devices(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_known_device_is_left_untouched() {
    let storage = Arc::new(MemoryBackend::new());
    let existing = add_device(storage.as_ref(), "printer", "10.0.0.3").await;

    let prober = Arc::new(ScriptedProber::new());
    prober.answer(ip("10.0.0.3"), 1.0);
    let resolver = StaticResolver::default().with(ip("10.0.0.3"), "brother.lan");

    let (scanner, _events) = scanner(storage.clone(), prober, resolver);
    let result = scanner
        .scan(&config_with_subnets(&["10.0.0.0/29"]))
        .await
        .unwrap();

    assert_eq!(result.devices_found, 1);
    assert_eq!(result.new_devices, 0);

    let device = storage.find_device_by_id(&existing.id).await.unwrap().unwrap();
    assert_eq!(device, existing);
}

#[tokio::test]
async fn test_slash_30_probes_two_hosts() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());

    let (scanner, _events) = scanner(storage, prober.clone(), StaticResolver::default());
    let result = scanner
        .scan(&config_with_subnets(&["192.168.5.0/30"]))
        .await
        .unwrap();

    assert_eq!(prober.calls(), 2);
    assert_eq!(result.devices_found, 0);
}

#[tokio::test]
async fn test_disabled_subnets_are_skipped() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());

    let mut config = config_with_subnets(&["10.0.0.0/29", "10.1.0.0/24"]);
    config.subnets[1].enabled = false;

    let (scanner, _events) = scanner(storage, prober.clone(), StaticResolver::default());
    scanner.scan(&config).await.unwrap();

    assert_eq!(prober.calls(), 6);
}

#[tokio::test]
async fn test_malformed_range_fails_before_probing() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());

    let (scanner, _events) = scanner(storage, prober.clone(), StaticResolver::default());
    let err = scanner
        .scan(&config_with_subnets(&["10.0.0.0/29", "10.0.1.0"]))
        .await
        .unwrap_err();

    assert_matches!(err, RangeError::MissingPrefix(_));
    assert_eq!(prober.calls(), 0);
    assert!(!scanner.is_scanning());
}

#[tokio::test]
async fn test_probe_concurrency_is_bounded() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_millis(5)));

    let mut config = config_with_subnets(&["10.0.0.0/26"]);
    config.scan.max_concurrent_scan_pings = 4;

    let (scanner, _events) = scanner(storage, prober.clone(), StaticResolver::default());
    scanner.scan(&config).await.unwrap();

    assert_eq!(prober.calls(), 62);
    assert!(
        prober.peak_concurrency() <= 4,
        "at most 4 probes in flight, saw {}",
        prober.peak_concurrency()
    );
}

#[tokio::test]
async fn test_second_scan_returns_empty_result() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_millis(20)));
    prober.answer(ip("10.0.0.9"), 1.0);
    let config = config_with_subnets(&["10.0.0.0/27"]);

    let (scanner, _events) = scanner(storage, prober, StaticResolver::default());

    let running = {
        let scanner = scanner.clone();
        let config = config.clone();
        tokio::spawn(async move { scanner.scan(&config).await })
    };
    while !scanner.is_scanning() {
        tokio::task::yield_now().await;
    }

    let second = scanner.scan(&config).await.unwrap();
    assert_eq!(second, ScanResult::default());

    let first = running.await.unwrap().unwrap();
    assert_eq!(first.devices_found, 1);
    assert!(!scanner.is_scanning());
}

#[tokio::test]
async fn test_abort_stops_between_chunks() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_millis(20)));

    let mut config = config_with_subnets(&["10.8.0.0/22"]);
    config.scan.scan_chunk_size = 32;
    config.scan.max_concurrent_scan_pings = 32;

    let (scanner, mut events) = scanner(storage, prober.clone(), StaticResolver::default());
    assert!(!scanner.abort(), "nothing to abort yet");

    let running = {
        let scanner = scanner.clone();
        tokio::spawn(async move { scanner.scan(&config).await })
    };

    // wait for the first progress report, then pull the plug
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("scan made no progress")
            .unwrap();
        if matches!(event, MonitorEvent::ScanProgress(_)) {
            break;
        }
    }
    assert!(scanner.abort());

    let result = running.await.unwrap().unwrap();
    assert!(result.aborted);

    let probed = prober.calls();
    assert!(probed < 1022, "scan should stop early, probed {probed}");
    assert_eq!(probed % 32, 0, "dispatched chunks run to completion");

    assert!(!scanner.is_scanning());
    assert!(!scanner.abort());

    let remaining = drain(&mut events);

    // the last progress report shows the partial sweep
    let last_progress = remaining
        .iter()
        .rev()
        .find_map(|event| match event {
            MonitorEvent::ScanProgress(progress) => Some(progress.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_progress.total, 1022);
    assert_eq!(last_progress.scanned, probed);
    assert!(last_progress.scanned < last_progress.total);

    let complete = remaining
        .into_iter()
        .rev()
        .find_map(|event| match event {
            MonitorEvent::ScanComplete(result) => Some(result),
            _ => None,
        })
        .unwrap();
    assert!(complete.aborted);
}

#[tokio::test]
async fn test_progress_events() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());
    prober.answer(ip("10.0.0.7"), 1.0);

    let (scanner, mut events) = scanner(storage, prober, StaticResolver::default());
    scanner
        .scan(&config_with_subnets(&["10.0.0.0/27"]))
        .await
        .unwrap();

    let events = drain(&mut events);
    let progress: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            MonitorEvent::ScanProgress(progress) => Some(progress.clone()),
            _ => None,
        })
        .collect();

    assert!(progress.windows(2).all(|w| w[0].scanned <= w[1].scanned));
    assert!(progress.iter().all(|p| p.total == 30));
    assert!(progress.iter().any(|p| p.found == 1));

    let last = progress.last().unwrap();
    assert_eq!(last.scanned, 30);
    assert_eq!(last.found, 1);
    assert_eq!(last.estimated_remaining_ms, 0);

    assert_matches!(events.last(), Some(MonitorEvent::ScanComplete(result)) if result.devices_found == 1);
}

#[tokio::test]
async fn test_discovery_alert_when_enabled() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());
    prober.answer(ip("10.0.0.4"), 1.0);

    let mut config = config_with_subnets(&["10.0.0.0/29"]);
    config.scan.alert_on_discovery = true;

    let (scanner, _events) = scanner(storage.clone(), prober, StaticResolver::default());
    scanner.scan(&config).await.unwrap();

    let alerts = storage.find_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::NewDeviceDiscovered);
    assert_eq!(alerts[0].metadata["ip"], "10.0.0.4");
}
