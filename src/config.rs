use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::net::range::SubnetRange;

/// One address range to sweep during discovery scans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// CIDR-style range, e.g. `192.168.1.0/24`
    #[serde(alias = "cidr")]
    pub range: String,
    pub label: String,
    pub enabled: bool,
}

/// Thresholds shared by status evaluation, heart scoring and alerting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertThresholds {
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub packet_loss_warning_pct: f64,
    pub packet_loss_critical_pct: f64,
    pub offline_after_failed_pings: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            latency_warning_ms: 100.0,
            latency_critical_ms: 500.0,
            packet_loss_warning_pct: 5.0,
            packet_loss_critical_pct: 25.0,
            offline_after_failed_pings: 3,
        }
    }
}

/// Discovery sweep settings. These are tuned for speed, not accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub max_concurrent_scan_pings: usize,
    pub scan_ping_timeout_ms: u64,
    pub scan_pings_per_host: u32,
    pub scan_chunk_size: usize,

    /// Record an info alert for every newly discovered device
    pub alert_on_discovery: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scan_pings: 200,
            scan_ping_timeout_ms: 1500,
            scan_pings_per_host: 1,
            scan_chunk_size: 512,
            alert_on_discovery: false,
        }
    }
}

impl ScanConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_ping_timeout_ms)
    }
}

/// The persisted monitoring configuration singleton
///
/// Missing fields fall back to their defaults, so a partially stored
/// document still yields a complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub subnets: Vec<SubnetConfig>,
    pub scan_interval_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub alert_thresholds: AlertThresholds,
    pub pings_per_check: u32,
    pub ping_timeout_ms: u64,
    pub max_concurrent_pings: usize,
    pub metrics_retention_days: u32,
    pub scan: ScanConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            subnets: vec![SubnetConfig {
                range: "192.168.1.0/24".to_string(),
                label: "Default LAN".to_string(),
                enabled: true,
            }],
            scan_interval_seconds: 600,
            health_check_interval_seconds: 30,
            alert_thresholds: AlertThresholds::default(),
            pings_per_check: 4,
            ping_timeout_ms: 5000,
            max_concurrent_pings: 50,
            metrics_retention_days: 30,
            scan: ScanConfig::default(),
        }
    }
}

impl DashboardConfig {
    pub fn enabled_subnets(&self) -> impl Iterator<Item = &SubnetConfig> {
        self.subnets.iter().filter(|subnet| subnet.enabled)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Check every field against the bounds the monitor is designed for
    pub fn validate(&self) -> Result<(), ConfigError> {
        for subnet in &self.subnets {
            SubnetRange::parse(&subnet.range)
                .map_err(|e| ConfigError::new("subnets", e.to_string()))?;
            if subnet.label.trim().is_empty() {
                return Err(ConfigError::new("subnets", "label must not be empty"));
            }
        }

        ensure_min("scanIntervalSeconds", self.scan_interval_seconds, 10)?;
        ensure_min("healthCheckIntervalSeconds", self.health_check_interval_seconds, 5)?;
        ensure_range("pingsPerCheck", self.pings_per_check as u64, 1, 20)?;
        ensure_range("pingTimeoutMs", self.ping_timeout_ms, 500, 30_000)?;
        ensure_range("maxConcurrentPings", self.max_concurrent_pings as u64, 1, 500)?;
        ensure_min("metricsRetentionDays", self.metrics_retention_days as u64, 1)?;

        let thresholds = &self.alert_thresholds;
        if thresholds.latency_warning_ms <= 0.0 || thresholds.latency_critical_ms <= 0.0 {
            return Err(ConfigError::new(
                "alertThresholds",
                "latency thresholds must be positive",
            ));
        }
        for (field, value) in [
            ("alertThresholds.packetLossWarningPct", thresholds.packet_loss_warning_pct),
            ("alertThresholds.packetLossCriticalPct", thresholds.packet_loss_critical_pct),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::new(field, "must be between 0 and 100"));
            }
        }
        ensure_min(
            "alertThresholds.offlineAfterFailedPings",
            thresholds.offline_after_failed_pings as u64,
            1,
        )?;

        let scan = &self.scan;
        ensure_range("scan.maxConcurrentScanPings", scan.max_concurrent_scan_pings as u64, 1, 500)?;
        ensure_range("scan.scanPingTimeoutMs", scan.scan_ping_timeout_ms, 200, 10_000)?;
        ensure_range("scan.scanPingsPerHost", scan.scan_pings_per_host as u64, 1, 5)?;
        ensure_range("scan.scanChunkSize", scan.scan_chunk_size as u64, 32, 4096)?;

        Ok(())
    }
}

fn ensure_min(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::new(field, format!("must be at least {min}")));
    }
    Ok(())
}

fn ensure_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if !(min..=max).contains(&value) {
        return Err(ConfigError::new(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(())
}

/// A configuration field outside its allowed bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {} {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<DashboardConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
