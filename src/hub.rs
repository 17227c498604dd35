//! The hub ties storage, the engines and the event channel together
//!
//! It is the boundary an API or push-channel layer talks to: every
//! operation validates its input, goes through the repository and publishes
//! the resulting events.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actors::alert::AlertEngine;
use crate::actors::health::{HealthChecker, HealthMonitor};
use crate::actors::messages::{CycleReport, MonitorEvent, ScanResult, publish};
use crate::actors::retention::{MetricsRetention, RetentionHandle};
use crate::actors::scanner::{NetworkScanner, ScanScheduleHandle};
use crate::config::{ConfigError, DashboardConfig};
use crate::net::{HostnameResolver, ProbeResult, Prober, RangeError};
use crate::storage::{DeviceUpdate, InvalidDevice, NewDevice, StorageBackend, StorageError};
use crate::{Alert, Device};

/// Buffered events per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 1024;

const ON_DEMAND_PING_COUNT: u32 = 4;
const ON_DEMAND_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures surfaced to callers of the hub
#[derive(Debug)]
pub enum HubError {
    /// A scan is already running
    ScanInProgress,

    /// Abort was requested while no scan runs
    NoActiveScan,

    /// Another device already uses this address
    DuplicateDevice(IpAddr),

    /// The referenced device or alert does not exist
    NotFound(String),

    /// A configured subnet is malformed
    InvalidRange(RangeError),

    InvalidConfig(ConfigError),

    /// A device name or map position is out of bounds
    InvalidDevice(InvalidDevice),

    Storage(StorageError),
}

impl HubError {
    /// The request conflicts with the current state
    pub fn is_conflict(&self) -> bool {
        matches!(self, HubError::ScanInProgress | HubError::DuplicateDevice(_))
    }

    /// The caller sent something that can never succeed as is
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HubError::NoActiveScan
                | HubError::NotFound(_)
                | HubError::InvalidRange(_)
                | HubError::InvalidConfig(_)
                | HubError::InvalidDevice(_)
        )
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::ScanInProgress => write!(f, "scan already in progress"),
            HubError::NoActiveScan => write!(f, "no scan in progress"),
            HubError::DuplicateDevice(ip) => write!(f, "a device with ip {ip} already exists"),
            HubError::NotFound(what) => write!(f, "{what} not found"),
            HubError::InvalidRange(err) => write!(f, "{err}"),
            HubError::InvalidConfig(err) => write!(f, "{err}"),
            HubError::InvalidDevice(err) => write!(f, "{err}"),
            HubError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::InvalidRange(err) => Some(err),
            HubError::InvalidConfig(err) => Some(err),
            HubError::InvalidDevice(err) => Some(err),
            HubError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for HubError {
    fn from(err: StorageError) -> Self {
        HubError::Storage(err)
    }
}

impl From<RangeError> for HubError {
    fn from(err: RangeError) -> Self {
        HubError::InvalidRange(err)
    }
}

impl From<ConfigError> for HubError {
    fn from(err: ConfigError) -> Self {
        HubError::InvalidConfig(err)
    }
}

impl From<InvalidDevice> for HubError {
    fn from(err: InvalidDevice) -> Self {
        HubError::InvalidDevice(err)
    }
}

pub type HubResult<T> = Result<T, HubError>;

/// Result of an on-demand ping of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReport {
    pub device: String,
    pub ip: IpAddr,
    #[serde(flatten)]
    pub result: ProbeResult,
}

struct Schedules {
    scan: (ScanScheduleHandle, JoinHandle<()>),
    retention: (RetentionHandle, JoinHandle<()>),
}

pub struct Hub {
    storage: Arc<dyn StorageBackend>,
    prober: Arc<dyn Prober>,
    event_tx: broadcast::Sender<MonitorEvent>,
    scanner: NetworkScanner,
    health: HealthMonitor,
    schedules: Mutex<Option<Schedules>>,
}

impl Hub {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        prober: Arc<dyn Prober>,
        resolver: Arc<dyn HostnameResolver>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let alerts = AlertEngine::new(storage.clone(), event_tx.clone());

        let scanner = NetworkScanner::new(
            storage.clone(),
            prober.clone(),
            resolver,
            alerts.clone(),
            event_tx.clone(),
        );
        let checker = HealthChecker::new(
            storage.clone(),
            prober.clone(),
            alerts,
            event_tx.clone(),
        );
        let health = HealthMonitor::new(checker, storage.clone());

        Self {
            storage,
            prober,
            event_tx,
            scanner,
            health,
            schedules: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Start the health, scan and retention schedules
    ///
    /// Health checks begin immediately, followed by the initial scan; metrics
    /// are purged once at startup and then hourly. Does nothing if already started.
    pub async fn start(&self) -> HubResult<()> {
        let mut schedules = self.schedules.lock().await;
        if schedules.is_some() {
            debug!("hub already started");
            return Ok(());
        }

        let config = self.storage.get_config().await?;
        info!(
            "starting monitoring ({} subnet(s), health every {}s, scan every {}s)",
            config.enabled_subnets().count(),
            config.health_check_interval_seconds,
            config.scan_interval_seconds
        );

        self.health.start(config.clone()).await;
        *schedules = Some(Schedules {
            scan: ScanScheduleHandle::spawn(self.scanner.clone(), self.storage.clone(), config),
            retention: RetentionHandle::spawn(self.storage.clone()),
        });

        Ok(())
    }

    /// Stop every schedule and wait for in-flight work
    ///
    /// A running scan stops after its current chunk.
    pub async fn shutdown(&self) {
        info!("shutting down monitoring");
        self.scanner.abort();

        if let Some(Schedules { scan, retention }) = self.schedules.lock().await.take() {
            scan.0.shutdown().await;
            retention.0.shutdown().await;
            for join in [scan.1, retention.1] {
                if let Err(e) = join.await {
                    error!("schedule task failed: {e}");
                }
            }
        }

        self.health.shutdown().await;
    }

    /// Run a scan now with the stored configuration
    pub async fn trigger_scan(&self) -> HubResult<ScanResult> {
        if self.scanner.is_scanning() {
            return Err(HubError::ScanInProgress);
        }
        let config = self.storage.get_config().await?;
        Ok(self.scanner.scan(&config).await?)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn abort_scan(&self) -> HubResult<()> {
        if self.scanner.abort() {
            Ok(())
        } else {
            Err(HubError::NoActiveScan)
        }
    }

    /// (Re)start periodic health checks with the stored configuration
    pub async fn start_health_monitor(&self) -> HubResult<()> {
        let config = self.storage.get_config().await?;
        self.health.start(config).await;
        Ok(())
    }

    /// Returns whether the health monitor was running
    pub async fn stop_health_monitor(&self) -> bool {
        self.health.stop().await
    }

    pub async fn is_health_monitor_running(&self) -> bool {
        self.health.is_running().await
    }

    pub async fn check_now(&self) -> anyhow::Result<CycleReport> {
        self.health.check_now().await
    }

    /// Purge samples outside the retention window now
    pub async fn purge_metrics(&self) -> anyhow::Result<usize> {
        let handle = self
            .schedules
            .lock()
            .await
            .as_ref()
            .map(|schedules| schedules.retention.0.clone());

        match handle {
            Some(handle) => handle.purge_now().await,
            None => {
                MetricsRetention::new(self.storage.clone())
                    .purge_configured()
                    .await
            }
        }
    }

    /// Add a device by hand. It starts with full hearts and unknown status.
    pub async fn add_device(&self, device: NewDevice) -> HubResult<Device> {
        device.validate()?;
        let ip = device.ip;
        if self.storage.find_device_by_ip(ip).await?.is_some() {
            return Err(HubError::DuplicateDevice(ip));
        }

        match self.storage.create_device(device).await {
            Ok(device) => {
                info!("added device {} ({})", device.name, device.ip);
                Ok(device)
            }
            Err(StorageError::Conflict(_)) => Err(HubError::DuplicateDevice(ip)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_device(&self, id: &str, update: DeviceUpdate) -> HubResult<Device> {
        update.validate()?;
        let device = self
            .storage
            .update_device(id, update)
            .await
            .map_err(|e| not_found(e, "device"))?;

        publish(&self.event_tx, MonitorEvent::DeviceUpdated(device.clone()));
        Ok(device)
    }

    /// Delete a device with its samples. Its alerts are kept.
    pub async fn delete_device(&self, id: &str) -> HubResult<()> {
        if !self.storage.delete_device(id).await? {
            return Err(HubError::NotFound("device".to_string()));
        }
        info!("deleted device {id}");
        Ok(())
    }

    /// Probe one device with the steady-state settings, without recording anything
    pub async fn ping_device(&self, id: &str) -> HubResult<PingReport> {
        let device = self
            .storage
            .find_device_by_id(id)
            .await?
            .ok_or_else(|| HubError::NotFound("device".to_string()))?;

        let result = self
            .prober
            .probe(device.ip, ON_DEMAND_PING_TIMEOUT, ON_DEMAND_PING_COUNT)
            .await;

        Ok(PingReport {
            device: device.name,
            ip: device.ip,
            result,
        })
    }

    pub async fn acknowledge_alert(&self, id: &str) -> HubResult<Alert> {
        let alert = self
            .storage
            .acknowledge_alert(id)
            .await
            .map_err(|e| not_found(e, "alert"))?;

        publish(
            &self.event_tx,
            MonitorEvent::AlertAcknowledged {
                alert_id: Some(alert.id.clone()),
                count: 1,
            },
        );
        Ok(alert)
    }

    /// Acknowledge every open alert, returning how many were open
    pub async fn acknowledge_all_alerts(&self) -> HubResult<usize> {
        let count = self.storage.acknowledge_all_alerts().await?;
        publish(
            &self.event_tx,
            MonitorEvent::AlertAcknowledged {
                alert_id: None,
                count,
            },
        );
        Ok(count)
    }

    pub async fn config(&self) -> HubResult<DashboardConfig> {
        Ok(self.storage.get_config().await?)
    }

    /// Validate and persist a new configuration
    ///
    /// Running schedules pick it up at the start of their next cycle.
    pub async fn update_config(&self, config: DashboardConfig) -> HubResult<DashboardConfig> {
        if let Err(e) = config.validate() {
            warn!("rejected configuration: {e}");
            return Err(e.into());
        }
        self.storage.save_config(&config).await?;
        info!("configuration updated");
        Ok(config)
    }
}

fn not_found(err: StorageError, what: &str) -> HubError {
    match err {
        StorageError::NotFound(_) => HubError::NotFound(what.to_string()),
        other => HubError::Storage(other),
    }
}
