//! Write models and query parameters for the storage backends
//!
//! The read models ([`Device`], [`Alert`], [`MetricSample`]) live in the crate
//! root. The types here describe what callers hand to a backend: new rows,
//! partial edits and filters.
//!
//! ## Layout
//!
//! - devices: typed columns, `tags` stored as a JSON array
//! - alerts: typed columns, `metadata` stored as a JSON object
//! - metrics: typed columns only (insert-only, purged by age)
//! - config: single row holding the `DashboardConfig` JSON document

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Alert, AlertSeverity, AlertType, Device, DeviceStatus, MapPosition, MetricSample};

/// Health score of a device that has not been checked yet
pub const FULL_HEART_COUNT: u8 = 10;

/// Longest accepted device name, in characters
pub const MAX_DEVICE_NAME_LEN: usize = 100;

/// A device field outside its allowed bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDevice {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidDevice {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for InvalidDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid device: {} {}", self.field, self.reason)
    }
}

impl std::error::Error for InvalidDevice {}

fn check_name(name: &str) -> Result<(), InvalidDevice> {
    let len = name.chars().count();
    if len == 0 || len > MAX_DEVICE_NAME_LEN {
        return Err(InvalidDevice::new(
            "name",
            format!("must be 1 to {MAX_DEVICE_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

/// Map coordinates are percentages of the map size
fn check_position(position: &MapPosition) -> Result<(), InvalidDevice> {
    for (field, value) in [("mapPosition.x", position.x), ("mapPosition.y", position.y)] {
        if !(0.0..=100.0).contains(&value) {
            return Err(InvalidDevice::new(field, "must be between 0 and 100"));
        }
    }
    Ok(())
}

/// A device about to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub name: String,
    pub ip: IpAddr,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub map_position: Option<MapPosition>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub is_manual: bool,
}

impl NewDevice {
    /// A device entered by a user
    pub fn manual(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            mac: None,
            hostname: None,
            map_position: None,
            tags: BTreeSet::new(),
            is_manual: true,
        }
    }

    /// Check the user-supplied fields
    pub fn validate(&self) -> Result<(), InvalidDevice> {
        check_name(&self.name)?;
        if let Some(position) = &self.map_position {
            check_position(position)?;
        }
        Ok(())
    }

    /// A device found by a scan, named after its hostname when it has one
    pub fn discovered(ip: IpAddr, hostname: Option<String>) -> Self {
        Self {
            name: hostname.clone().unwrap_or_else(|| ip.to_string()),
            ip,
            mac: None,
            hostname,
            map_position: None,
            tags: BTreeSet::new(),
            is_manual: false,
        }
    }

    /// Materialize the row with a fresh id
    pub fn into_device(self, now: DateTime<Utc>) -> Device {
        Device {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            ip: self.ip,
            mac: self.mac,
            hostname: self.hostname,
            status: DeviceStatus::Unknown,
            latency: None,
            packet_loss: None,
            heart_count: FULL_HEART_COUNT,
            consecutive_failures: 0,
            last_seen: None,
            first_discovered: now,
            map_position: self.map_position,
            tags: self.tags,
            is_manual: self.is_manual,
        }
    }
}

/// A user edit of a device. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceUpdate {
    pub name: Option<String>,

    /// `Some(None)` removes the device from the map
    #[serde(
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub map_position: Option<Option<MapPosition>>,

    pub tags: Option<BTreeSet<String>>,
    pub is_manual: Option<bool>,
}

/// Tells an explicit `null` (`Some(None)`) apart from a missing field (`None`)
fn present_or_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl DeviceUpdate {
    /// Check the fields the edit touches
    pub fn validate(&self) -> Result<(), InvalidDevice> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(Some(position)) = &self.map_position {
            check_position(position)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.map_position.is_none()
            && self.tags.is_none()
            && self.is_manual.is_none()
    }

    pub fn apply(&self, device: &mut Device) {
        if let Some(name) = &self.name {
            device.name = name.clone();
        }
        if let Some(position) = &self.map_position {
            device.map_position = position.clone();
        }
        if let Some(tags) = &self.tags {
            device.tags = tags.clone();
        }
        if let Some(is_manual) = self.is_manual {
            device.is_manual = is_manual;
        }
    }
}

/// The fields the health monitor owns
#[derive(Debug, Clone, PartialEq)]
pub struct HealthUpdate {
    pub status: DeviceStatus,
    pub latency: Option<f64>,
    pub packet_loss: Option<f64>,
    pub heart_count: u8,
    pub consecutive_failures: u32,
}

impl HealthUpdate {
    /// Whether the probe behind this update got an answer
    ///
    /// Any answer resets the failure counter, so a zero counter on a reachable
    /// status means the device was seen in this cycle.
    pub fn was_seen(&self) -> bool {
        self.status.is_reachable() && self.consecutive_failures == 0
    }

    pub fn apply(&self, device: &mut Device, now: DateTime<Utc>) {
        device.status = self.status;
        device.latency = self.latency;
        device.packet_loss = self.packet_loss;
        device.heart_count = self.heart_count;
        device.consecutive_failures = self.consecutive_failures;
        if self.was_seen() {
            device.last_seen = Some(now);
        }
    }
}

/// An alert about to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub device_id: Option<String>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub metadata: Map<String, Value>,
}

impl NewAlert {
    pub fn new(
        device_id: Option<String>,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            alert_type,
            severity,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn into_alert(self, now: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            device_id: self.device_id,
            alert_type: self.alert_type,
            severity: self.severity,
            message: self.message,
            timestamp: now,
            acknowledged: false,
            acknowledged_at: None,
            metadata: self.metadata,
        }
    }
}

/// One health-check reading about to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetricSample {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub latency: Option<f64>,
    pub packet_loss: f64,
    pub ping_success_count: u32,
    pub ping_total_count: u32,
}

impl NewMetricSample {
    /// A sample taken now
    pub fn new(
        device_id: impl Into<String>,
        latency: Option<f64>,
        packet_loss: f64,
        ping_success_count: u32,
        ping_total_count: u32,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Utc::now(),
            latency,
            packet_loss,
            ping_success_count,
            ping_total_count,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn into_sample(self) -> MetricSample {
        MetricSample {
            id: Uuid::new_v4().to_string(),
            device_id: self.device_id,
            timestamp: self.timestamp,
            latency: self.latency,
            packet_loss: self.packet_loss,
            ping_success_count: self.ping_success_count,
            ping_total_count: self.ping_total_count,
        }
    }
}

/// Filter for listing alerts (newest first)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertQuery {
    pub severity: Option<AlertSeverity>,
    pub acknowledged: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AlertQuery {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.severity.is_none_or(|severity| alert.severity == severity)
            && self
                .acknowledged
                .is_none_or(|acknowledged| alert.acknowledged == acknowledged)
    }
}

/// Fleet-wide averages over recent samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    /// Distinct devices with at least one sample in the window
    pub total_devices: usize,
    pub avg_latency: Option<f64>,
    pub avg_packet_loss: f64,
}
