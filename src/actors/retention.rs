//! Metrics retention - periodic purge of old samples
//!
//! Purges once at spawn and then every [`PURGE_INTERVAL`]. The retention
//! window is read from the stored configuration before every purge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::storage::{StorageBackend, StorageResult};

use super::messages::RetentionCommand;

pub const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Deletes samples that have aged out of the retention window
#[derive(Clone)]
pub struct MetricsRetention {
    storage: Arc<dyn StorageBackend>,
}

impl MetricsRetention {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Oldest timestamp a sample may have and still be kept
    pub fn cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(retention_days))
    }

    /// Delete every sample strictly older than `now - retention_days`
    pub async fn purge(&self, retention_days: u32) -> StorageResult<usize> {
        let cutoff = Self::cutoff(Utc::now(), retention_days);
        debug!("purging samples recorded before {cutoff}");

        let purged = self.storage.purge_metrics_older_than(cutoff).await?;
        if purged > 0 {
            info!("purged {purged} metric samples older than {retention_days} days");
        } else {
            trace!("no metric samples to purge");
        }
        Ok(purged)
    }

    /// Purge using the stored retention window
    pub async fn purge_configured(&self) -> Result<usize> {
        let config = self
            .storage
            .get_config()
            .await
            .context("failed to load configuration")?;
        Ok(self.purge(config.metrics_retention_days).await?)
    }
}

pub struct RetentionActor {
    retention: MetricsRetention,
    period: Duration,
    command_rx: mpsc::Receiver<RetentionCommand>,
}

impl RetentionActor {
    pub fn new(
        retention: MetricsRetention,
        period: Duration,
        command_rx: mpsc::Receiver<RetentionCommand>,
    ) -> Self {
        Self {
            retention,
            period,
            command_rx,
        }
    }

    #[instrument(skip(self), name = "retention")]
    pub async fn run(mut self) {
        info!("metrics retention starting (every {}s)", self.period.as_secs());

        // first tick fires immediately: purge on startup
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.retention.purge_configured().await {
                        // retried on the next tick
                        error!("metrics purge failed: {e:#}");
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(RetentionCommand::PurgeNow { respond_to }) => {
                            debug!("received PurgeNow command");
                            let _ = respond_to.send(self.retention.purge_configured().await);
                        }
                        Some(RetentionCommand::Shutdown) => {
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

        info!("metrics retention stopped");
    }
}

/// Handle for controlling a RetentionActor
#[derive(Clone)]
pub struct RetentionHandle {
    sender: mpsc::Sender<RetentionCommand>,
}

impl RetentionHandle {
    pub fn spawn(storage: Arc<dyn StorageBackend>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_interval(storage, PURGE_INTERVAL)
    }

    pub fn spawn_with_interval(
        storage: Arc<dyn StorageBackend>,
        period: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = RetentionActor::new(MetricsRetention::new(storage), period, cmd_rx);
        let join = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, join)
    }

    /// Purge now and return how many samples were deleted
    pub async fn purge_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RetentionCommand::PurgeNow { respond_to: tx })
            .await
            .context("failed to send PurgeNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(RetentionCommand::Shutdown).await;
    }
}
