//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    AlertQuery, DeviceUpdate, HealthUpdate, MetricsSummary, NewAlert, NewDevice, NewMetricSample,
};
use crate::config::DashboardConfig;
use crate::{Alert, Device, DeviceStatus, MetricSample};

/// Query parameters for fetching samples of one device within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    pub device_id: String,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Repository for devices, alerts, metric samples and the configuration
///
/// Every method is atomic on its own. Multi-row writes
/// (`create_metric_sample_batch`, `delete_device`) run in a transaction.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the scan engine, the health
/// monitor and the retention actor share one instance.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Implementations convert
/// backend-specific errors to `StorageError` variants.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Devices
    // ========================================================================

    /// All devices ordered by name, optionally restricted to one status
    async fn find_all_devices(&self, status: Option<DeviceStatus>) -> StorageResult<Vec<Device>>;

    async fn find_device_by_id(&self, id: &str) -> StorageResult<Option<Device>>;

    async fn find_device_by_ip(&self, ip: IpAddr) -> StorageResult<Option<Device>>;

    /// Insert a device. Fails with `StorageError::Conflict` if its ip is taken.
    async fn create_device(&self, device: NewDevice) -> StorageResult<Device>;

    /// Apply a user edit. Fails with `StorageError::NotFound` for unknown ids.
    async fn update_device(&self, id: &str, update: DeviceUpdate) -> StorageResult<Device>;

    /// Write the health-owned fields of a device
    ///
    /// `last_seen` advances only when the update reflects an answered probe.
    /// Fails with `StorageError::NotFound` for unknown ids.
    async fn update_device_health(&self, id: &str, update: HealthUpdate) -> StorageResult<()>;

    /// Delete a device together with its samples. Its alerts stay, detached.
    ///
    /// Returns whether a device was removed.
    async fn delete_device(&self, id: &str) -> StorageResult<bool>;

    /// Current failure counter of a device (0 for unknown ids)
    async fn get_consecutive_failures(&self, id: &str) -> StorageResult<u32>;

    // ========================================================================
    // Alerts
    // ========================================================================

    async fn create_alert(&self, alert: NewAlert) -> StorageResult<Alert>;

    /// Alerts matching the query, newest first
    async fn find_alerts(&self, query: AlertQuery) -> StorageResult<Vec<Alert>>;

    /// Mark one alert acknowledged. Fails with `StorageError::NotFound` for unknown ids.
    ///
    /// Acknowledging twice keeps the first acknowledgement time.
    async fn acknowledge_alert(&self, id: &str) -> StorageResult<Alert>;

    /// Acknowledge every open alert, returning how many were affected
    async fn acknowledge_all_alerts(&self) -> StorageResult<usize>;

    async fn unacknowledged_alert_count(&self) -> StorageResult<usize>;

    // ========================================================================
    // Metric samples
    // ========================================================================

    async fn create_metric_sample(&self, sample: NewMetricSample) -> StorageResult<MetricSample>;

    /// Insert several samples in one transaction
    async fn create_metric_sample_batch(
        &self,
        samples: Vec<NewMetricSample>,
    ) -> StorageResult<Vec<MetricSample>>;

    /// Samples of one device within the range, oldest first
    async fn query_metrics(&self, query: QueryRange) -> StorageResult<Vec<MetricSample>>;

    async fn latest_metric(&self, device_id: &str) -> StorageResult<Option<MetricSample>>;

    /// Averages over all samples newer than `since`
    async fn metrics_summary(&self, since: DateTime<Utc>) -> StorageResult<MetricsSummary>;

    /// Delete every sample with `timestamp < before`
    ///
    /// Samples exactly at `before` are kept. Returns the number deleted.
    async fn purge_metrics_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Configuration
    // ========================================================================

    /// The stored configuration, or the defaults if none was saved yet
    async fn get_config(&self) -> StorageResult<DashboardConfig>;

    async fn save_config(&self, config: &DashboardConfig) -> StorageResult<()>;

    // ========================================================================
    // Upkeep
    // ========================================================================

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
