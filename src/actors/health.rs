//! Health monitor - periodic re-check of every known device
//!
//! ## Status State Machine
//!
//! ```text
//! answered, loss < warning, latency < warning (or none)  → online,   failures = 0
//! answered, otherwise                                    → degraded, failures = 0
//! no answer, failures + 1 >= offlineAfterFailedPings     → offline
//! no answer, below the threshold                         → status held (unknown stays unknown)
//! ```
//!
//! Transient failures never downgrade a device; only consecutive ones do.
//!
//! ## Scheduling
//!
//! [`HealthMonitorActor`] runs each cycle inline in its loop with
//! `MissedTickBehavior::Skip`, so a cycle that outruns the interval makes the
//! schedule skip ticks instead of starting a second, overlapping cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore, broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AlertThresholds, DashboardConfig};
use crate::net::{ProbeResult, Prober};
use crate::storage::{HealthUpdate, NewMetricSample, StorageBackend, StorageResult};
use crate::{Device, DeviceStatus, MetricSample};

use super::alert::AlertEngine;
use super::messages::{CycleReport, HealthCommand, MonitorEvent, publish};

/// Highest heart count a device can have
pub const MAX_HEARTS: u8 = 10;

/// Result of feeding one probe into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub status: DeviceStatus,
    pub consecutive_failures: u32,
}

/// Next status of a device given its previous status, the probe and its failure counter
pub fn evaluate_status(
    previous: DeviceStatus,
    probe: &ProbeResult,
    consecutive_failures: u32,
    thresholds: &AlertThresholds,
) -> StatusTransition {
    if probe.alive {
        let healthy = probe.packet_loss_pct < thresholds.packet_loss_warning_pct
            && probe
                .avg_latency_ms
                .is_none_or(|latency| latency < thresholds.latency_warning_ms);

        return StatusTransition {
            status: if healthy {
                DeviceStatus::Online
            } else {
                DeviceStatus::Degraded
            },
            consecutive_failures: 0,
        };
    }

    let failures = consecutive_failures.saturating_add(1);
    let status = if failures >= thresholds.offline_after_failed_pings {
        DeviceStatus::Offline
    } else {
        previous
    };

    StatusTransition {
        status,
        consecutive_failures: failures,
    }
}

/// 1-5 score of a metric: 5 below `warning`, 1 at or above `critical`, linear in between
fn sub_score(value: f64, warning: f64, critical: f64) -> u8 {
    if value >= critical {
        1
    } else if value < warning {
        5
    } else {
        let ratio = (value - warning) / (critical - warning);
        (5.0 - ratio * 4.0).round().max(1.0) as u8
    }
}

/// Health score 0-10: latency and loss sub-scores summed, 0 when the device did not answer
pub fn heart_count(
    latency: Option<f64>,
    packet_loss: f64,
    alive: bool,
    thresholds: &AlertThresholds,
) -> u8 {
    if !alive {
        return 0;
    }

    let latency_hearts = latency.map_or(5, |latency| {
        sub_score(
            latency,
            thresholds.latency_warning_ms,
            thresholds.latency_critical_ms,
        )
    });
    let loss_hearts = sub_score(
        packet_loss,
        thresholds.packet_loss_warning_pct,
        thresholds.packet_loss_critical_pct,
    );

    (latency_hearts + loss_hearts).clamp(1, MAX_HEARTS)
}

/// What one device check produced
struct DeviceOutcome {
    sample: Option<MetricSample>,
    status_changed: bool,
    alerts: usize,
}

/// Runs health-check cycles
#[derive(Clone)]
pub struct HealthChecker {
    storage: Arc<dyn StorageBackend>,
    prober: Arc<dyn Prober>,
    alerts: AlertEngine,
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl HealthChecker {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        prober: Arc<dyn Prober>,
        alerts: AlertEngine,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            storage,
            prober,
            alerts,
            event_tx,
        }
    }

    /// Check every known device once
    ///
    /// Devices are checked independently with at most `max_concurrent_pings`
    /// probes in flight. A failing device is counted in the report and does not
    /// affect the others.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self, config: &DashboardConfig) -> Result<CycleReport> {
        let devices = self
            .storage
            .find_all_devices(None)
            .await
            .context("failed to load devices")?;

        if devices.is_empty() {
            debug!("no devices to check");
            return Ok(CycleReport::default());
        }

        debug!("checking {} devices", devices.len());

        let config = Arc::new(config.clone());
        let permits = Arc::new(Semaphore::new(config.max_concurrent_pings.max(1)));
        let mut tasks = JoinSet::new();

        for device in devices {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .context("probe semaphore closed")?;
            let checker = self.clone();
            let config = config.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let device_id = device.id.clone();
                (device_id, checker.check_device(device, &config).await)
            });
        }

        let mut report = CycleReport::default();
        let mut samples = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => {
                    report.checked += 1;
                    report.alerts += outcome.alerts;
                    if outcome.status_changed {
                        report.status_changes += 1;
                    }
                    samples.extend(outcome.sample);
                }
                Ok((device_id, Err(e))) => {
                    warn!("health check of device {device_id} failed: {e}");
                    report.failed += 1;
                }
                Err(e) => {
                    error!("health check task failed: {e}");
                    report.failed += 1;
                }
            }
        }

        if !samples.is_empty() {
            publish(&self.event_tx, MonitorEvent::MetricsBatch(samples));
        }

        debug!(
            "cycle complete: {} checked, {} failed, {} status changes, {} alerts",
            report.checked, report.failed, report.status_changes, report.alerts
        );
        Ok(report)
    }

    async fn check_device(
        &self,
        device: Device,
        config: &DashboardConfig,
    ) -> StorageResult<DeviceOutcome> {
        let thresholds = &config.alert_thresholds;
        let previous = device.status;

        let probe = self
            .prober
            .probe(device.ip, config.ping_timeout(), config.pings_per_check)
            .await;

        let failures = self.storage.get_consecutive_failures(&device.id).await?;
        let transition = evaluate_status(previous, &probe, failures, thresholds);

        let update = HealthUpdate {
            status: transition.status,
            latency: probe.avg_latency_ms,
            packet_loss: Some(probe.packet_loss_pct),
            heart_count: heart_count(
                probe.avg_latency_ms,
                probe.packet_loss_pct,
                probe.alive,
                thresholds,
            ),
            consecutive_failures: transition.consecutive_failures,
        };
        self.storage
            .update_device_health(&device.id, update.clone())
            .await?;

        let sample = NewMetricSample::new(
            &device.id,
            probe.avg_latency_ms,
            probe.packet_loss_pct,
            probe.success_count(config.pings_per_check),
            config.pings_per_check,
        );
        let sample = match self.storage.create_metric_sample(sample).await {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("failed to store sample for {}: {e}", device.ip);
                None
            }
        };

        let mut updated = device;
        update.apply(&mut updated, Utc::now());

        let alerts = self
            .alerts
            .evaluate(
                &updated,
                previous,
                transition.status,
                probe.avg_latency_ms,
                probe.packet_loss_pct,
                thresholds,
            )
            .await;

        let status_changed = previous != transition.status;
        if status_changed {
            info!(
                "{} ({}) changed status: {} -> {}",
                updated.name, updated.ip, previous, transition.status
            );
        }

        publish(&self.event_tx, MonitorEvent::DeviceUpdated(updated.clone()));
        if status_changed {
            publish(
                &self.event_tx,
                MonitorEvent::DeviceStatusChanged {
                    device_id: updated.id.clone(),
                    name: updated.name.clone(),
                    previous,
                    current: transition.status,
                },
            );
        }

        Ok(DeviceOutcome {
            sample,
            status_changed,
            alerts: alerts.len(),
        })
    }
}

/// Actor that runs health-check cycles on a fixed interval
///
/// The configuration is re-read from storage at every tick, so edits take
/// effect on the next cycle. If the interval changed, the timer is rebuilt.
pub struct HealthMonitorActor {
    checker: HealthChecker,
    storage: Arc<dyn StorageBackend>,

    /// Last configuration that could be loaded
    config: DashboardConfig,

    command_rx: mpsc::Receiver<HealthCommand>,
}

impl HealthMonitorActor {
    pub fn new(
        checker: HealthChecker,
        storage: Arc<dyn StorageBackend>,
        config: DashboardConfig,
        command_rx: mpsc::Receiver<HealthCommand>,
    ) -> Self {
        Self {
            checker,
            storage,
            config,
            command_rx,
        }
    }

    fn ticker(period: Duration, start: Instant) -> tokio::time::Interval {
        let mut ticker = interval_at(start, period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    async fn refresh_config(&mut self) {
        match self.storage.get_config().await {
            Ok(config) => self.config = config,
            Err(e) => warn!("failed to reload configuration, keeping the previous one: {e}"),
        }
    }

    async fn cycle(&mut self) -> Result<CycleReport> {
        self.refresh_config().await;
        self.checker.run_cycle(&self.config).await
    }

    #[instrument(skip(self), name = "health_monitor")]
    pub async fn run(mut self) {
        let mut period = self.config.health_check_interval();
        info!("health monitor starting (interval: {}s)", period.as_secs());

        // first cycle runs immediately
        let mut ticker = Self::ticker(period, Instant::now());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle().await {
                        error!("health check cycle failed: {e:#}");
                    }

                    let configured = self.config.health_check_interval();
                    if configured != period {
                        debug!("health check interval changed to {}s", configured.as_secs());
                        period = configured;
                        ticker = Self::ticker(period, Instant::now() + period);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(HealthCommand::CheckNow { respond_to }) => {
                            debug!("received CheckNow command");
                            let _ = respond_to.send(self.cycle().await);
                        }
                        Some(HealthCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        info!("health monitor stopped");
    }
}

/// Handle for controlling a HealthMonitorActor
#[derive(Clone)]
pub struct HealthMonitorHandle {
    sender: mpsc::Sender<HealthCommand>,
}

impl HealthMonitorHandle {
    /// Spawn a new health monitor actor, returning its handle and task
    pub fn spawn(
        checker: HealthChecker,
        storage: Arc<dyn StorageBackend>,
        config: DashboardConfig,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = HealthMonitorActor::new(checker, storage, config, cmd_rx);
        let join = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, join)
    }

    /// Run a cycle now, after any cycle already in flight
    pub async fn check_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(HealthCommand::Shutdown).await;
    }
}

#[derive(Default)]
struct MonitorState {
    active: Option<(HealthMonitorHandle, JoinHandle<()>)>,

    /// Stopped schedules that may still be finishing a cycle
    draining: Vec<JoinHandle<()>>,
}

/// Start/stop control over the health-check schedule
///
/// Safe to start and stop repeatedly. Starting while running replaces the
/// schedule, waiting for the old one's in-flight cycle first so two cycles
/// never overlap.
pub struct HealthMonitor {
    checker: HealthChecker,
    storage: Arc<dyn StorageBackend>,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    pub fn new(checker: HealthChecker, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            checker,
            storage,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub async fn start(&self, config: DashboardConfig) {
        let mut state = self.state.lock().await;

        if let Some((handle, join)) = state.active.take() {
            debug!("replacing running health monitor");
            handle.shutdown().await;
            state.draining.push(join);
        }
        for join in state.draining.drain(..) {
            if let Err(e) = join.await {
                error!("health monitor task failed: {e}");
            }
        }

        state.active = Some(HealthMonitorHandle::spawn(
            self.checker.clone(),
            self.storage.clone(),
            config,
        ));
    }

    /// Stop the schedule. An in-flight cycle is not interrupted.
    ///
    /// Returns whether a schedule was running.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.active.take() {
            Some((handle, join)) => {
                handle.shutdown().await;
                state.draining.push(join);
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Run a cycle now with the stored configuration
    ///
    /// Goes through the running schedule when there is one. Otherwise the
    /// cycle runs under the state lock after any stopped schedule has
    /// finished, so it overlaps neither a draining cycle, another manual
    /// cycle, nor a schedule started meanwhile.
    pub async fn check_now(&self) -> Result<CycleReport> {
        let mut state = self.state.lock().await;

        if let Some((handle, _)) = state.active.as_ref() {
            let handle = handle.clone();
            drop(state);
            return handle.check_now().await;
        }

        for join in state.draining.drain(..) {
            if let Err(e) = join.await {
                error!("health monitor task failed: {e}");
            }
        }

        let config = self.storage.get_config().await?;
        self.checker.run_cycle(&config).await
    }

    /// Stop the schedule and wait until every cycle has finished
    pub async fn shutdown(&self) {
        self.stop().await;
        let draining = std::mem::take(&mut self.state.lock().await.draining);
        for join in draining {
            if let Err(e) = join.await {
                error!("health monitor task failed: {e}");
            }
        }
    }
}
