//! Scan engine - discovery sweeps over the configured address ranges
//!
//! ## Message Flow
//!
//! ```text
//! enabled subnets → lazy address stream → chunks of scanChunkSize
//!     chunk → [probe × maxConcurrentScanPings] → responding & unknown → resolve → create device
//!                                              → ScanProgress (every 10th host or on answer)
//! abort() is honoured between chunks; the dispatched chunk always completes
//! ```
//!
//! Only one scan runs at a time per [`NetworkScanner`]. A second `scan()` while
//! one is running returns an empty result immediately.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::DashboardConfig;
use crate::net::{HostnameResolver, Prober, RangeError, SubnetRange};
use crate::storage::{NewDevice, StorageBackend, StorageError};
use crate::util::millis;

use super::alert::AlertEngine;
use super::messages::{MonitorEvent, ScanCommand, ScanProgress, ScanResult, publish};

/// Progress is reported after every this many probed hosts
const PROGRESS_EVERY: usize = 10;

/// Scans larger than this also log their progress once per chunk
const LOG_CHUNK_PROGRESS_ABOVE: usize = 1000;

/// Single-flight scan state
#[derive(Debug, Default)]
pub struct ScanState {
    scanning: AtomicBool,
    abort_requested: AtomicBool,
}

impl ScanState {
    /// Claim the scanner. `None` if a scan is already running.
    fn try_begin(&self) -> Option<ScanGuard<'_>> {
        self.scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.abort_requested.store(false, Ordering::Release);
        Some(ScanGuard { state: self })
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Ask the running scan to stop. Returns false if nothing is running.
    pub fn request_abort(&self) -> bool {
        if !self.is_scanning() {
            return false;
        }
        self.abort_requested.store(true, Ordering::Release);
        true
    }

    fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }
}

/// Releases the scanner when the scan ends, however it ends
struct ScanGuard<'a> {
    state: &'a ScanState,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.state.abort_requested.store(false, Ordering::Release);
        self.state.scanning.store(false, Ordering::Release);
    }
}

/// Remaining time if the current throughput holds
fn estimate_remaining(elapsed: Duration, scanned: usize, total: usize) -> u64 {
    if scanned == 0 {
        return 0;
    }
    let remaining = total.saturating_sub(scanned) as u128;
    u64::try_from(elapsed.as_millis() * remaining / scanned as u128).unwrap_or(u64::MAX)
}

/// Running totals of one scan
struct Sweep {
    started: Instant,
    total: usize,
    scanned: usize,
    found: usize,
    new_devices: usize,
    last_ip: Option<Ipv4Addr>,
}

impl Sweep {
    fn progress(&self) -> ScanProgress {
        let elapsed = self.started.elapsed();
        ScanProgress {
            scanned: self.scanned,
            total: self.total,
            current_ip: self.last_ip,
            found: self.found,
            elapsed_ms: millis(elapsed),
            estimated_remaining_ms: estimate_remaining(elapsed, self.scanned, self.total),
        }
    }
}

struct ScannerInner {
    storage: Arc<dyn StorageBackend>,
    prober: Arc<dyn Prober>,
    resolver: Arc<dyn HostnameResolver>,
    alerts: AlertEngine,
    event_tx: broadcast::Sender<MonitorEvent>,
    state: ScanState,
}

/// Discovers hosts on the configured ranges
#[derive(Clone)]
pub struct NetworkScanner {
    inner: Arc<ScannerInner>,
}

impl NetworkScanner {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        prober: Arc<dyn Prober>,
        resolver: Arc<dyn HostnameResolver>,
        alerts: AlertEngine,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                storage,
                prober,
                resolver,
                alerts,
                event_tx,
                state: ScanState::default(),
            }),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.state.is_scanning()
    }

    /// Request the running scan to stop after its current chunk
    ///
    /// Returns false if no scan is running.
    pub fn abort(&self) -> bool {
        let requested = self.inner.state.request_abort();
        if requested {
            info!("scan abort requested");
        }
        requested
    }

    /// Sweep every enabled subnet once
    ///
    /// Fails only on a malformed range, before any probe is sent.
    #[instrument(skip_all)]
    pub async fn scan(&self, config: &DashboardConfig) -> Result<ScanResult, RangeError> {
        let Some(_guard) = self.inner.state.try_begin() else {
            warn!("scan already in progress, skipping");
            return Ok(ScanResult::default());
        };

        let ranges = config
            .enabled_subnets()
            .map(|subnet| SubnetRange::parse(&subnet.range))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sweep = Sweep {
            started: Instant::now(),
            total: ranges.iter().map(SubnetRange::host_count).sum(),
            scanned: 0,
            found: 0,
            new_devices: 0,
            last_ip: None,
        };
        info!(
            "starting scan of {} hosts across {} subnet(s)",
            sweep.total,
            ranges.len()
        );

        let chunk_size = config.scan.scan_chunk_size.max(1);
        let mut addresses = ranges.into_iter().flat_map(|range| range.hosts());
        let mut aborted = false;

        loop {
            let chunk: Vec<Ipv4Addr> = addresses.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            if self.inner.state.abort_requested() {
                info!("scan aborted after {} of {} hosts", sweep.scanned, sweep.total);
                aborted = true;
                break;
            }

            self.scan_chunk(chunk, config, &mut sweep).await;

            if sweep.total > LOG_CHUNK_PROGRESS_ABOVE {
                info!(
                    "scan progress: {}% ({}/{}), {} found, {}s elapsed",
                    sweep.scanned * 100 / sweep.total,
                    sweep.scanned,
                    sweep.total,
                    sweep.found,
                    sweep.started.elapsed().as_secs()
                );
            }
        }

        publish(
            &self.inner.event_tx,
            MonitorEvent::ScanProgress(sweep.progress()),
        );

        let result = ScanResult {
            devices_found: sweep.found,
            new_devices: sweep.new_devices,
            duration_ms: millis(sweep.started.elapsed()),
            aborted,
        };
        info!(
            "scan complete: {} found, {} new, {}s",
            result.devices_found,
            result.new_devices,
            sweep.started.elapsed().as_secs()
        );
        publish(
            &self.inner.event_tx,
            MonitorEvent::ScanComplete(result.clone()),
        );

        Ok(result)
    }

    /// Probe one chunk with bounded concurrency and record new hosts
    async fn scan_chunk(&self, chunk: Vec<Ipv4Addr>, config: &DashboardConfig, sweep: &mut Sweep) {
        let permits = Arc::new(Semaphore::new(config.scan.max_concurrent_scan_pings.max(1)));
        let timeout = config.scan.ping_timeout();
        let count = config.scan.scan_pings_per_host;
        let alert_on_discovery = config.scan.alert_on_discovery;
        let mut tasks = JoinSet::new();

        for ip in chunk {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let scanner = self.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let probe = scanner.inner.prober.probe(IpAddr::V4(ip), timeout, count).await;
                let is_new = probe.alive && scanner.discover(ip, alert_on_discovery).await;
                (ip, probe.alive, is_new)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (ip, alive, is_new) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("scan task failed: {e}");
                    sweep.scanned += 1;
                    continue;
                }
            };

            sweep.scanned += 1;
            sweep.last_ip = Some(ip);
            if alive {
                sweep.found += 1;
            }
            if is_new {
                sweep.new_devices += 1;
            }

            if alive || sweep.scanned % PROGRESS_EVERY == 0 {
                publish(
                    &self.inner.event_tx,
                    MonitorEvent::ScanProgress(sweep.progress()),
                );
            }
        }
    }

    /// Record a responding host unless it is already known
    ///
    /// Returns whether a new device was created.
    async fn discover(&self, ip: Ipv4Addr, alert_on_discovery: bool) -> bool {
        let address = IpAddr::V4(ip);
        let inner = &self.inner;

        match inner.storage.find_device_by_ip(address).await {
            Ok(Some(_)) => {
                trace!("{ip} is already known");
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("failed to look up {ip}: {e}");
                return false;
            }
        }

        let hostname = inner.resolver.resolve(address).await;

        match inner
            .storage
            .create_device(NewDevice::discovered(address, hostname))
            .await
        {
            Ok(device) => {
                match &device.hostname {
                    Some(hostname) => info!("discovered {ip} ({hostname})"),
                    None => info!("discovered {ip}"),
                }
                publish(
                    &inner.event_tx,
                    MonitorEvent::DeviceDiscovered(device.clone()),
                );
                if alert_on_discovery {
                    inner.alerts.device_discovered(&device).await;
                }
                true
            }
            Err(StorageError::Conflict(_)) => {
                debug!("{ip} was recorded concurrently");
                false
            }
            Err(e) => {
                warn!("failed to record discovered device {ip}: {e}");
                false
            }
        }
    }
}

/// Actor that runs a scan at startup and then every `scanIntervalSeconds`
///
/// A tick that arrives while a scan is running (for example one triggered
/// by hand) is skipped.
pub struct ScanScheduleActor {
    scanner: NetworkScanner,
    storage: Arc<dyn StorageBackend>,
    config: DashboardConfig,
    command_rx: mpsc::Receiver<ScanCommand>,
}

impl ScanScheduleActor {
    pub fn new(
        scanner: NetworkScanner,
        storage: Arc<dyn StorageBackend>,
        config: DashboardConfig,
        command_rx: mpsc::Receiver<ScanCommand>,
    ) -> Self {
        Self {
            scanner,
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

    async fn scan(&mut self) -> Result<ScanResult> {
        match self.storage.get_config().await {
            Ok(config) => self.config = config,
            Err(e) => warn!("failed to reload configuration, keeping the previous one: {e}"),
        }
        Ok(self.scanner.scan(&self.config).await?)
    }

    #[instrument(skip(self), name = "scan_schedule")]
    pub async fn run(mut self) {
        let mut period = self.config.scan_interval();
        info!("scan schedule starting (interval: {}s)", period.as_secs());

        let mut ticker = Self::ticker(period, Instant::now());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.scanner.is_scanning() {
                        debug!("scan still running, skipping tick");
                        continue;
                    }
                    if let Err(e) = self.scan().await {
                        error!("scheduled scan failed: {e:#}");
                    }

                    let configured = self.config.scan_interval();
                    if configured != period {
                        debug!("scan interval changed to {}s", configured.as_secs());
                        period = configured;
                        ticker = Self::ticker(period, Instant::now() + period);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ScanCommand::ScanNow { respond_to }) => {
                            debug!("received ScanNow command");
                            let _ = respond_to.send(self.scan().await);
                        }
                        Some(ScanCommand::Shutdown) => {
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

        info!("scan schedule stopped");
    }
}

/// Handle for controlling a ScanScheduleActor
#[derive(Clone)]
pub struct ScanScheduleHandle {
    sender: mpsc::Sender<ScanCommand>,
}

impl ScanScheduleHandle {
    pub fn spawn(
        scanner: NetworkScanner,
        storage: Arc<dyn StorageBackend>,
        config: DashboardConfig,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = ScanScheduleActor::new(scanner, storage, config, cmd_rx);
        let join = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, join)
    }

    /// Scan now, after any scheduled scan in flight
    pub async fn scan_now(&self) -> Result<ScanResult> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScanCommand::ScanNow { respond_to: tx })
            .await
            .context("failed to send ScanNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(ScanCommand::Shutdown).await;
    }
}
