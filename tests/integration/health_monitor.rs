//! Health monitor tests
//!
//! - Status transitions across consecutive cycles
//! - Metric samples, alerts and events per cycle
//! - Per-device failure isolation and bounded probe concurrency
//! - Schedule start/stop and non-overlapping cycles

use std::sync::Arc;
use std::time::Duration;

use lanwatch::{
    AlertType, DeviceStatus,
    actors::{health::HealthMonitor, messages::MonitorEvent},
    config::DashboardConfig,
    storage::{AlertQuery, MemoryBackend, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

async fn alert_count(storage: &dyn StorageBackend, alert_type: AlertType) -> usize {
    storage
        .find_alerts(AlertQuery::default())
        .await
        .unwrap()
        .iter()
        .filter(|alert| alert.alert_type == alert_type)
        .count()
}

#[tokio::test]
async fn test_consecutive_failures_take_device_offline() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let prober = Arc::new(ScriptedProber::new());
    prober.script(
        device.ip,
        vec![alive(10.0), dead(), dead(), dead(), dead(), alive(10.0)],
    );
    let (checker, _events) = checker(storage.clone(), prober);
    let config = DashboardConfig::default();

    let mut statuses = Vec::new();
    let mut failures = Vec::new();
    for _ in 0..6 {
        checker.run_cycle(&config).await.unwrap();
        let current = storage.find_device_by_id(&device.id).await.unwrap().unwrap();
        statuses.push(current.status);
        failures.push(current.consecutive_failures);
    }

    assert_eq!(
        statuses,
        vec![
            DeviceStatus::Online,
            DeviceStatus::Online,
            DeviceStatus::Online,
            DeviceStatus::Offline,
            DeviceStatus::Offline,
            DeviceStatus::Online,
        ]
    );
    assert_eq!(failures, vec![0, 1, 2, 3, 4, 0]);

    // device_down fires on the transition only
    assert_eq!(alert_count(storage.as_ref(), AlertType::DeviceDown).await, 1);
    assert_eq!(
        alert_count(storage.as_ref(), AlertType::DeviceRecovered).await,
        1
    );
}

#[tokio::test]
async fn test_last_seen_only_advances_on_answers() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;
    assert_eq!(device.last_seen, None);

    let prober = Arc::new(ScriptedProber::new());
    prober.script(device.ip, vec![alive(10.0), dead()]);
    let (checker, _events) = checker(storage.clone(), prober);
    let config = DashboardConfig::default();

    checker.run_cycle(&config).await.unwrap();
    let seen = storage
        .find_device_by_id(&device.id)
        .await
        .unwrap()
        .unwrap()
        .last_seen;
    assert!(seen.is_some());

    checker.run_cycle(&config).await.unwrap();
    let after_failure = storage.find_device_by_id(&device.id).await.unwrap().unwrap();
    assert_eq!(after_failure.last_seen, seen);
    assert_eq!(after_failure.heart_count, 0);
}

#[tokio::test]
async fn test_unknown_device_stays_unknown_until_threshold() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "camera", "10.0.0.8").await;

    let prober = Arc::new(ScriptedProber::new());
    let (checker, _events) = checker(storage.clone(), prober);
    let config = DashboardConfig::default();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        checker.run_cycle(&config).await.unwrap();
        statuses.push(
            storage
                .find_device_by_id(&device.id)
                .await
                .unwrap()
                .unwrap()
                .status,
        );
    }

    assert_eq!(
        statuses,
        vec![
            DeviceStatus::Unknown,
            DeviceStatus::Unknown,
            DeviceStatus::Offline
        ]
    );
    assert_eq!(alert_count(storage.as_ref(), AlertType::DeviceDown).await, 1);
}

#[tokio::test]
async fn test_slow_device_is_degraded_with_fewer_hearts() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let prober = Arc::new(ScriptedProber::new());
    prober.answer(device.ip, 300.0);
    let (checker, _events) = checker(storage.clone(), prober);

    let report = checker.run_cycle(&DashboardConfig::default()).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.status_changes, 1);
    assert_eq!(report.alerts, 1);

    let current = storage.find_device_by_id(&device.id).await.unwrap().unwrap();
    assert_eq!(current.status, DeviceStatus::Degraded);
    assert_eq!(current.heart_count, 8);
    assert_eq!(current.latency, Some(300.0));

    let alerts = storage.find_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts[0].alert_type, AlertType::HighLatency);
    assert_eq!(alerts[0].device_id.as_deref(), Some(device.id.as_str()));
}

#[tokio::test]
async fn test_cycle_records_samples_and_events() {
    let storage = Arc::new(MemoryBackend::new());
    let router = add_device(storage.as_ref(), "router", "10.0.0.1").await;
    let nas = add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let prober = Arc::new(ScriptedProber::new());
    prober.answer(router.ip, 2.0);
    prober.script(nas.ip, vec![lossy(20.0, 50.0)]);
    let (checker, mut events) = checker(storage.clone(), prober);

    let config = DashboardConfig::default();
    checker.run_cycle(&config).await.unwrap();

    let sample = storage.latest_metric(&router.id).await.unwrap().unwrap();
    assert_eq!(sample.ping_total_count, config.pings_per_check);
    assert_eq!(sample.ping_success_count, config.pings_per_check);
    assert_eq!(sample.latency, Some(2.0));

    let sample = storage.latest_metric(&nas.id).await.unwrap().unwrap();
    assert_eq!(sample.ping_success_count, 2);
    assert_eq!(sample.packet_loss, 50.0);

    let events = drain(&mut events);
    let updated = events
        .iter()
        .filter(|event| matches!(event, MonitorEvent::DeviceUpdated(_)))
        .count();
    let changed = events
        .iter()
        .filter(|event| matches!(event, MonitorEvent::DeviceStatusChanged { .. }))
        .count();
    assert_eq!(updated, 2);
    assert_eq!(changed, 2);

    match events.last() {
        Some(MonitorEvent::MetricsBatch(samples)) => assert_eq!(samples.len(), 2),
        other => panic!("expected a metrics batch last, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failing_device_does_not_stop_the_cycle() {
    let storage = Arc::new(FailingBackend::new());
    let healthy = add_device(storage.as_ref(), "healthy", "10.0.0.1").await;
    let broken = add_device(storage.as_ref(), "broken", "10.0.0.2").await;
    let other = add_device(storage.as_ref(), "other", "10.0.0.3").await;
    storage.fail_health_writes_for(&broken.id);

    let prober = Arc::new(ScriptedProber::new());
    for device in [&healthy, &broken, &other] {
        prober.answer(device.ip, 5.0);
    }
    let (checker, _events) = checker(storage.clone(), prober);

    let report = checker.run_cycle(&DashboardConfig::default()).await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failed, 1);

    for device in [&healthy, &other] {
        let current = storage.find_device_by_id(&device.id).await.unwrap().unwrap();
        assert_eq!(current.status, DeviceStatus::Online);
    }
    let current = storage.find_device_by_id(&broken.id).await.unwrap().unwrap();
    assert_eq!(current.status, DeviceStatus::Unknown);
}

#[tokio::test]
async fn test_probe_concurrency_is_bounded() {
    let storage = Arc::new(MemoryBackend::new());
    for i in 1..=20 {
        add_device(storage.as_ref(), &format!("host-{i:02}"), &format!("10.0.0.{i}")).await;
    }

    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_millis(5)));
    let (checker, _events) = checker(storage, prober.clone());

    let mut config = DashboardConfig::default();
    config.max_concurrent_pings = 3;
    let report = checker.run_cycle(&config).await.unwrap();

    assert_eq!(report.checked, 20);
    assert_eq!(prober.calls(), 20);
    assert!(prober.peak_concurrency() <= 3);
}

#[tokio::test]
async fn test_empty_inventory_is_a_no_op() {
    let storage = Arc::new(MemoryBackend::new());
    let prober = Arc::new(ScriptedProber::new());
    let (checker, mut events) = checker(storage, prober.clone());

    let report = checker.run_cycle(&DashboardConfig::default()).await.unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(prober.calls(), 0);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_schedule_start_and_stop() {
    let storage = Arc::new(MemoryBackend::new());
    add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let prober = Arc::new(ScriptedProber::new());
    let (checker, _events) = checker(storage.clone(), prober.clone());
    let monitor = HealthMonitor::new(checker, storage.clone());

    let config = storage.get_config().await.unwrap();
    assert_eq!(config.health_check_interval_seconds, 30);

    assert!(!monitor.is_running().await);
    monitor.start(config).await;
    assert!(monitor.is_running().await);

    // first cycle runs right away
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(prober.calls(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(prober.calls(), 2);

    assert!(monitor.stop().await);
    assert!(!monitor.stop().await);
    assert!(!monitor.is_running().await);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(prober.calls(), 2);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycles_never_overlap() {
    let storage = Arc::new(MemoryBackend::new());
    add_device(storage.as_ref(), "slow", "10.0.0.5").await;

    // each probe outlasts the 30s interval
    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_secs(45)));
    let (checker, _events) = checker(storage.clone(), prober.clone());
    let monitor = HealthMonitor::new(checker, storage.clone());

    monitor.start(storage.get_config().await.unwrap()).await;
    tokio::time::sleep(Duration::from_secs(200)).await;

    assert!(prober.calls() >= 2);
    assert_eq!(prober.peak_concurrency(), 1);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_check_now_waits_for_stopped_cycle() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "slow", "10.0.0.5").await;

    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_secs(45)));
    let (checker, _events) = checker(storage.clone(), prober.clone());
    let monitor = Arc::new(HealthMonitor::new(checker, storage.clone()));

    monitor.start(storage.get_config().await.unwrap()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // the scheduled cycle is still probing when the schedule stops
    assert!(monitor.stop().await);
    let manual = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.check_now().await })
    };
    tokio::time::sleep(Duration::from_secs(100)).await;

    let report = manual.await.unwrap().unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(prober.calls(), 2);
    assert_eq!(prober.peak_concurrency(), 1);

    let stored = storage.find_device_by_id(&device.id).await.unwrap().unwrap();
    assert_eq!(stored.consecutive_failures, 2);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_replaces_schedule() {
    let storage = Arc::new(MemoryBackend::new());
    add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let prober = Arc::new(ScriptedProber::new());
    let (checker, _events) = checker(storage.clone(), prober.clone());
    let monitor = HealthMonitor::new(checker, storage.clone());
    let config = storage.get_config().await.unwrap();

    monitor.start(config.clone()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    monitor.start(config).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // one immediate cycle per start, no duplicate schedule afterwards
    assert_eq!(prober.calls(), 2);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(prober.calls(), 3);

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_check_now_without_schedule() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;

    let prober = Arc::new(ScriptedProber::new());
    prober.answer(device.ip, 1.0);
    let (checker, _events) = checker(storage.clone(), prober);
    let monitor = HealthMonitor::new(checker, storage.clone());

    let report = monitor.check_now().await.unwrap();
    assert_eq!(report.checked, 1);
    assert!(!monitor.is_running().await);
}
