//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: [`MonitorEvent`]s broadcast to any number of subscribers
//! 3. **Immutability**: All events are cloneable for multi-subscriber patterns

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::trace;

use crate::{Alert, Device, DeviceStatus, MetricSample};

/// Snapshot of a running scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub scanned: usize,
    pub total: usize,

    /// The most recently probed address
    pub current_ip: Option<Ipv4Addr>,

    /// Responding hosts so far, known or new
    pub found: usize,

    pub elapsed_ms: u64,

    /// Remaining time at the current throughput
    pub estimated_remaining_ms: u64,
}

/// Outcome of one scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    /// Responding hosts, known or new
    pub devices_found: usize,
    pub new_devices: usize,
    pub duration_ms: u64,

    /// The scan stopped early after `abort()`
    pub aborted: bool,
}

/// Outcome of one health-check cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Devices whose check completed
    pub checked: usize,

    /// Devices whose check failed to persist or panicked
    pub failed: usize,

    pub status_changes: usize,
    pub alerts: usize,
}

/// Events published by the engines for the push channel
///
/// The broadcast channel may lag or drop messages for slow subscribers. That
/// is acceptable: device state is always recoverable from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    ScanProgress(ScanProgress),
    ScanComplete(ScanResult),
    DeviceDiscovered(Device),
    DeviceUpdated(Device),
    #[serde(rename_all = "camelCase")]
    DeviceStatusChanged {
        device_id: String,
        name: String,
        previous: DeviceStatus,
        current: DeviceStatus,
    },
    MetricsBatch(Vec<MetricSample>),
    AlertCreated(Alert),

    /// `alert_id` is `None` when every open alert was acknowledged at once
    #[serde(rename_all = "camelCase")]
    AlertAcknowledged {
        alert_id: Option<String>,
        count: usize,
    },
}

/// Publish an event. Having no subscriber is not an error.
pub fn publish(tx: &broadcast::Sender<MonitorEvent>, event: MonitorEvent) {
    match tx.send(event) {
        Ok(num_receivers) => trace!("published event to {num_receivers} receivers"),
        Err(_) => trace!("no receivers for event (this is OK)"),
    }
}

/// Commands that can be sent to the scan schedule actor
#[derive(Debug)]
pub enum ScanCommand {
    /// Run a scan immediately, bypassing the interval timer
    ScanNow {
        respond_to: oneshot::Sender<anyhow::Result<ScanResult>>,
    },

    /// Gracefully shut down. An in-flight scan is not interrupted.
    Shutdown,
}

/// Commands that can be sent to the health monitor actor
#[derive(Debug)]
pub enum HealthCommand {
    /// Run a cycle immediately
    CheckNow {
        respond_to: oneshot::Sender<anyhow::Result<CycleReport>>,
    },

    /// Gracefully shut down after the in-flight cycle
    Shutdown,
}

/// Commands that can be sent to the retention actor
#[derive(Debug)]
pub enum RetentionCommand {
    /// Purge now and report how many samples were deleted
    PurgeNow {
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    Shutdown,
}
