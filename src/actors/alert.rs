//! Alert engine - turns health transitions into persisted alerts
//!
//! Evaluation is a pure function of its inputs ([`evaluate_conditions`]);
//! [`AlertEngine`] persists whatever it returns and publishes each alert.
//!
//! ```text
//! prev != offline, new == offline        → critical device_down
//! prev == offline, new == online         → info     device_recovered
//! new != offline, latency >= critical    → critical high_latency
//!               , latency >= warning     → warning  high_latency
//! new != offline, loss >= critical       → critical packet_loss
//!               , loss >= warning        → warning  packet_loss
//! ```
//!
//! `device_down` fires on the transition only, never again while the device
//! stays offline. An offline device raises no latency or loss alerts.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::AlertThresholds;
use crate::storage::{NewAlert, StorageBackend};
use crate::{Alert, AlertSeverity, AlertType, Device, DeviceStatus};

use super::messages::{MonitorEvent, publish};

/// Alerts warranted by one health-check result
pub fn evaluate_conditions(
    device: &Device,
    previous: DeviceStatus,
    current: DeviceStatus,
    latency: Option<f64>,
    packet_loss: f64,
    thresholds: &AlertThresholds,
) -> Vec<NewAlert> {
    let mut alerts = Vec::new();
    let device_id = Some(device.id.clone());

    if current == DeviceStatus::Offline {
        if previous != DeviceStatus::Offline {
            alerts.push(
                NewAlert::new(
                    device_id,
                    AlertType::DeviceDown,
                    AlertSeverity::Critical,
                    format!("{} ({}) is down", device.name, device.ip),
                )
                .with_metadata("ip", device.ip.to_string())
                .with_metadata("previousStatus", previous.as_str())
                .with_metadata("threshold", thresholds.offline_after_failed_pings),
            );
        }
        return alerts;
    }

    if previous == DeviceStatus::Offline && current == DeviceStatus::Online {
        alerts.push(
            NewAlert::new(
                device_id.clone(),
                AlertType::DeviceRecovered,
                AlertSeverity::Info,
                format!("{} ({}) has recovered", device.name, device.ip),
            )
            .with_metadata("ip", device.ip.to_string()),
        );
    }

    if let Some(latency) = latency {
        let breach = if latency >= thresholds.latency_critical_ms {
            Some((AlertSeverity::Critical, thresholds.latency_critical_ms))
        } else if latency >= thresholds.latency_warning_ms {
            Some((AlertSeverity::Warning, thresholds.latency_warning_ms))
        } else {
            None
        };

        if let Some((severity, threshold)) = breach {
            alerts.push(
                NewAlert::new(
                    device_id.clone(),
                    AlertType::HighLatency,
                    severity,
                    format!(
                        "{} latency is {}ms (threshold {}ms)",
                        device.name,
                        latency.round(),
                        threshold
                    ),
                )
                .with_metadata("latency", latency)
                .with_metadata("threshold", threshold),
            );
        }
    }

    let breach = if packet_loss >= thresholds.packet_loss_critical_pct {
        Some((AlertSeverity::Critical, thresholds.packet_loss_critical_pct))
    } else if packet_loss >= thresholds.packet_loss_warning_pct {
        Some((AlertSeverity::Warning, thresholds.packet_loss_warning_pct))
    } else {
        None
    };

    if let Some((severity, threshold)) = breach {
        alerts.push(
            NewAlert::new(
                device_id,
                AlertType::PacketLoss,
                severity,
                format!(
                    "{} is losing {}% of packets (threshold {}%)",
                    device.name, packet_loss, threshold
                ),
            )
            .with_metadata("packetLoss", packet_loss)
            .with_metadata("threshold", threshold),
        );
    }

    alerts
}

/// Persists and publishes alerts
#[derive(Clone)]
pub struct AlertEngine {
    storage: Arc<dyn StorageBackend>,
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl AlertEngine {
    pub fn new(storage: Arc<dyn StorageBackend>, event_tx: broadcast::Sender<MonitorEvent>) -> Self {
        Self { storage, event_tx }
    }

    /// Evaluate one health-check result and record the resulting alerts
    ///
    /// A failed write is logged and skipped; the remaining alerts are still recorded.
    pub async fn evaluate(
        &self,
        device: &Device,
        previous: DeviceStatus,
        current: DeviceStatus,
        latency: Option<f64>,
        packet_loss: f64,
        thresholds: &AlertThresholds,
    ) -> Vec<Alert> {
        let mut created = Vec::new();
        for alert in evaluate_conditions(device, previous, current, latency, packet_loss, thresholds)
        {
            if let Some(alert) = self.record(alert).await {
                created.push(alert);
            }
        }
        created
    }

    /// Record an info alert for a device found by a scan
    pub async fn device_discovered(&self, device: &Device) -> Option<Alert> {
        let alert = NewAlert::new(
            Some(device.id.clone()),
            AlertType::NewDeviceDiscovered,
            AlertSeverity::Info,
            format!("New device discovered: {} ({})", device.name, device.ip),
        )
        .with_metadata("ip", device.ip.to_string())
        .with_metadata("hostname", device.hostname.clone());

        self.record(alert).await
    }

    async fn record(&self, alert: NewAlert) -> Option<Alert> {
        let alert = match self.storage.create_alert(alert).await {
            Ok(alert) => alert,
            Err(e) => {
                error!("failed to store alert: {e}");
                return None;
            }
        };

        match alert.severity {
            AlertSeverity::Critical => warn!("ALERT: {}", alert.message),
            _ => info!("ALERT: {}", alert.message),
        }
        publish(&self.event_tx, MonitorEvent::AlertCreated(alert.clone()));
        Some(alert)
    }
}
