pub mod actors;
pub mod config;
pub mod hub;
pub mod net;
pub mod storage;
pub mod util;

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status of a device as derived by the health monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Degraded,
    Offline,
    #[default]
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Degraded => "degraded",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unknown => "unknown",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "online" => Some(DeviceStatus::Online),
            "degraded" => Some(DeviceStatus::Degraded),
            "offline" => Some(DeviceStatus::Offline),
            "unknown" => Some(DeviceStatus::Unknown),
            _ => None,
        }
    }

    /// Whether the device answered its last probe
    pub fn is_reachable(&self) -> bool {
        matches!(self, DeviceStatus::Online | DeviceStatus::Degraded)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a device on the dashboard map (percent coordinates)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A host known to the monitor, either discovered by a scan or added by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub status: DeviceStatus,

    /// Average round-trip time of the last check (ms)
    pub latency: Option<f64>,

    /// Packet loss of the last check (0-100)
    pub packet_loss: Option<f64>,

    /// Health score 0-10
    pub heart_count: u8,

    pub consecutive_failures: u32,
    pub last_seen: Option<DateTime<Utc>>,
    pub first_discovered: DateTime<Utc>,
    pub map_position: Option<MapPosition>,
    pub tags: BTreeSet<String>,
    pub is_manual: bool,
}

/// One health-check reading for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub id: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub latency: Option<f64>,
    pub packet_loss: f64,
    pub ping_success_count: u32,
    pub ping_total_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    DeviceDown,
    DeviceRecovered,
    HighLatency,
    PacketLoss,
    NewDeviceDiscovered,
    ThresholdBreach,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::DeviceDown => "device_down",
            AlertType::DeviceRecovered => "device_recovered",
            AlertType::HighLatency => "high_latency",
            AlertType::PacketLoss => "packet_loss",
            AlertType::NewDeviceDiscovered => "new_device_discovered",
            AlertType::ThresholdBreach => "threshold_breach",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "device_down" => Some(AlertType::DeviceDown),
            "device_recovered" => Some(AlertType::DeviceRecovered),
            "high_latency" => Some(AlertType::HighLatency),
            "packet_loss" => Some(AlertType::PacketLoss),
            "new_device_discovered" => Some(AlertType::NewDeviceDiscovered),
            "threshold_breach" => Some(AlertType::ThresholdBreach),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "info" => Some(AlertSeverity::Info),
            "warning" => Some(AlertSeverity::Warning),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted alert. Only the acknowledgement fields ever change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub device_id: Option<String>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
