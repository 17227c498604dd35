//! In-memory storage backend (no persistence)
//!
//! Keeps every table in plain collections behind a single `RwLock`.
//! It's useful for:
//! - Testing without database dependencies
//! - Throwaway runs (`--memory`)
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Linear scans**: fine for a home network, not for large fleets

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertQuery, DeviceUpdate, HealthUpdate, MetricsSummary, NewAlert, NewDevice, NewMetricSample,
};
use crate::config::DashboardConfig;
use crate::{Alert, Device, DeviceStatus, MetricSample};

#[derive(Default)]
struct MemoryState {
    devices: HashMap<String, Device>,

    /// Insertion order
    alerts: Vec<Alert>,

    metrics: Vec<MetricSample>,
    config: Option<DashboardConfig>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn find_all_devices(&self, status: Option<DeviceStatus>) -> StorageResult<Vec<Device>> {
        let state = self.state.read().await;
        let mut devices: Vec<Device> = state
            .devices
            .values()
            .filter(|device| status.is_none_or(|status| device.status == status))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    async fn find_device_by_id(&self, id: &str) -> StorageResult<Option<Device>> {
        Ok(self.state.read().await.devices.get(id).cloned())
    }

    async fn find_device_by_ip(&self, ip: IpAddr) -> StorageResult<Option<Device>> {
        let state = self.state.read().await;
        Ok(state.devices.values().find(|device| device.ip == ip).cloned())
    }

    async fn create_device(&self, device: NewDevice) -> StorageResult<Device> {
        let mut state = self.state.write().await;
        if state.devices.values().any(|existing| existing.ip == device.ip) {
            return Err(StorageError::Conflict(format!(
                "a device with ip {} already exists",
                device.ip
            )));
        }

        let device = device.into_device(Utc::now());
        debug!("in-memory backend: created device {} ({})", device.id, device.ip);
        state.devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn update_device(&self, id: &str, update: DeviceUpdate) -> StorageResult<Device> {
        let mut state = self.state.write().await;
        let device = state
            .devices
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("device {id}")))?;
        update.apply(device);
        Ok(device.clone())
    }

    async fn update_device_health(&self, id: &str, update: HealthUpdate) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let device = state
            .devices
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("device {id}")))?;
        update.apply(device, Utc::now());
        Ok(())
    }

    async fn delete_device(&self, id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if state.devices.remove(id).is_none() {
            return Ok(false);
        }

        state.metrics.retain(|sample| sample.device_id != id);
        for alert in &mut state.alerts {
            if alert.device_id.as_deref() == Some(id) {
                alert.device_id = None;
            }
        }
        Ok(true)
    }

    async fn get_consecutive_failures(&self, id: &str) -> StorageResult<u32> {
        let state = self.state.read().await;
        Ok(state
            .devices
            .get(id)
            .map_or(0, |device| device.consecutive_failures))
    }

    async fn create_alert(&self, alert: NewAlert) -> StorageResult<Alert> {
        let alert = alert.into_alert(Utc::now());
        self.state.write().await.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn find_alerts(&self, query: AlertQuery) -> StorageResult<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .iter()
            .rev()
            .filter(|alert| query.matches(alert))
            .cloned()
            .collect();
        // stable, so equal timestamps stay newest-inserted first
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(alerts
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn acknowledge_alert(&self, id: &str) -> StorageResult<Alert> {
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .iter_mut()
            .find(|alert| alert.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("alert {id}")))?;

        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(Utc::now());
        }
        Ok(alert.clone())
    }

    async fn acknowledge_all_alerts(&self) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut count = 0;
        for alert in state.alerts.iter_mut().filter(|alert| !alert.acknowledged) {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn unacknowledged_alert_count(&self) -> StorageResult<usize> {
        let state = self.state.read().await;
        Ok(state.alerts.iter().filter(|alert| !alert.acknowledged).count())
    }

    async fn create_metric_sample(&self, sample: NewMetricSample) -> StorageResult<MetricSample> {
        let mut state = self.state.write().await;
        if !state.devices.contains_key(&sample.device_id) {
            return Err(StorageError::NotFound(format!("device {}", sample.device_id)));
        }

        let sample = sample.into_sample();
        state.metrics.push(sample.clone());
        Ok(sample)
    }

    async fn create_metric_sample_batch(
        &self,
        samples: Vec<NewMetricSample>,
    ) -> StorageResult<Vec<MetricSample>> {
        let mut state = self.state.write().await;
        // all or nothing, like the transactional backends
        if let Some(orphan) = samples
            .iter()
            .find(|sample| !state.devices.contains_key(&sample.device_id))
        {
            return Err(StorageError::NotFound(format!("device {}", orphan.device_id)));
        }

        let samples: Vec<MetricSample> = samples.into_iter().map(NewMetricSample::into_sample).collect();
        state.metrics.extend(samples.iter().cloned());
        Ok(samples)
    }

    async fn query_metrics(&self, query: QueryRange) -> StorageResult<Vec<MetricSample>> {
        debug!("querying in-memory samples for {}", query.device_id);

        let state = self.state.read().await;
        let mut samples: Vec<MetricSample> = state
            .metrics
            .iter()
            .filter(|sample| {
                sample.device_id == query.device_id
                    && sample.timestamp >= query.start
                    && sample.timestamp <= query.end
            })
            .cloned()
            .collect();
        samples.sort_by_key(|sample| sample.timestamp);
        samples.truncate(query.limit.unwrap_or(usize::MAX));
        Ok(samples)
    }

    async fn latest_metric(&self, device_id: &str) -> StorageResult<Option<MetricSample>> {
        let state = self.state.read().await;
        Ok(state
            .metrics
            .iter()
            .filter(|sample| sample.device_id == device_id)
            .max_by_key(|sample| sample.timestamp)
            .cloned())
    }

    async fn metrics_summary(&self, since: DateTime<Utc>) -> StorageResult<MetricsSummary> {
        let state = self.state.read().await;
        let recent: Vec<&MetricSample> = state
            .metrics
            .iter()
            .filter(|sample| sample.timestamp > since)
            .collect();

        let mut devices: Vec<&str> = recent.iter().map(|sample| sample.device_id.as_str()).collect();
        devices.sort_unstable();
        devices.dedup();

        let latencies: Vec<f64> = recent.iter().filter_map(|sample| sample.latency).collect();
        let avg_latency =
            (!latencies.is_empty()).then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);
        let avg_packet_loss = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|sample| sample.packet_loss).sum::<f64>() / recent.len() as f64
        };

        Ok(MetricsSummary {
            total_devices: devices.len(),
            avg_latency,
            avg_packet_loss,
        })
    }

    async fn purge_metrics_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let count = state.metrics.len();
        state.metrics.retain(|sample| sample.timestamp >= before);
        Ok(count - state.metrics.len())
    }

    async fn get_config(&self) -> StorageResult<DashboardConfig> {
        Ok(self.state.read().await.config.clone().unwrap_or_default())
    }

    async fn save_config(&self, config: &DashboardConfig) -> StorageResult<()> {
        self.state.write().await.config = Some(config.clone());
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
