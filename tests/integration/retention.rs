//! Metrics retention tests

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lanwatch::{
    actors::retention::{MetricsRetention, RetentionHandle},
    storage::{MemoryBackend, NewMetricSample, QueryRange, StorageBackend},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

async fn sample_days_ago(storage: &dyn StorageBackend, device_id: &str, days: i64) {
    storage
        .create_metric_sample(
            NewMetricSample::new(device_id, Some(1.0), 0.0, 4, 4)
                .at(Utc::now() - chrono::Duration::days(days)),
        )
        .await
        .unwrap();
}

async fn sample_count(storage: &dyn StorageBackend, device_id: &str) -> usize {
    storage
        .query_metrics(QueryRange {
            device_id: device_id.to_string(),
            start: Utc::now() - chrono::Duration::days(365),
            end: Utc::now() + chrono::Duration::days(1),
            limit: None,
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_purge_uses_stored_retention_window() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;
    for days in [1, 5, 10, 45] {
        sample_days_ago(storage.as_ref(), &device.id, days).await;
    }

    let retention = MetricsRetention::new(storage.clone());

    // default window is 30 days
    assert_eq!(retention.purge_configured().await.unwrap(), 1);

    let mut config = storage.get_config().await.unwrap();
    config.metrics_retention_days = 7;
    storage.save_config(&config).await.unwrap();

    assert_eq!(retention.purge_configured().await.unwrap(), 1);
    assert_eq!(sample_count(storage.as_ref(), &device.id).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_actor_purges_at_startup_and_hourly() {
    let storage = Arc::new(MemoryBackend::new());
    let device = add_device(storage.as_ref(), "nas", "10.0.0.5").await;
    sample_days_ago(storage.as_ref(), &device.id, 40).await;
    sample_days_ago(storage.as_ref(), &device.id, 2).await;

    let (handle, join) = RetentionHandle::spawn(storage.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sample_count(storage.as_ref(), &device.id).await, 1);

    // aged out while the actor was idle
    sample_days_ago(storage.as_ref(), &device.id, 31).await;
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(sample_count(storage.as_ref(), &device.id).await, 1);

    sample_days_ago(storage.as_ref(), &device.id, 90).await;
    assert_eq!(handle.purge_now().await.unwrap(), 1);
    assert_eq!(handle.purge_now().await.unwrap(), 0);

    handle.shutdown().await;
    join.await.unwrap();
    assert!(handle.purge_now().await.is_err());
}
