//! ICMP reachability probes
//!
//! The [`Prober`] trait is the seam between the engines and the network.
//! [`SystemPing`] drives the platform `ping` binary so no raw-socket
//! privileges are needed; tests plug in scripted probers instead.
//!
//! A probe never fails: any transport problem (missing binary, timeout,
//! unparsable output) is reported as an unreachable host with 100% loss.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{instrument, trace};

/// Matches the round-trip time of a single echo reply (`time=0.42 ms`, `time<1ms`)
static REPLY_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("reply time pattern is valid")
});

/// Slack on top of `timeout * count` before the ping child is killed
const PROCESS_GRACE: Duration = Duration::from_secs(1);

/// Outcome of probing one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub alive: bool,

    /// Mean round-trip time of the answered requests
    pub avg_latency_ms: Option<f64>,

    /// Share of the requests that got no reply (0-100)
    pub packet_loss_pct: f64,

    pub raw_output: String,
}

impl ProbeResult {
    /// A host that could not be reached at all
    pub fn unreachable(raw_output: impl Into<String>) -> Self {
        Self {
            alive: false,
            avg_latency_ms: None,
            packet_loss_pct: 100.0,
            raw_output: raw_output.into(),
        }
    }

    /// Build a result from the round-trip times of the replies to `count` requests
    pub fn from_round_trips(round_trips: &[f64], count: u32, raw_output: String) -> Self {
        let count = count.max(1);
        let replies = round_trips.len().min(count as usize);

        if replies == 0 {
            return Self::unreachable(raw_output);
        }

        let answered = &round_trips[..replies];
        let avg = answered.iter().sum::<f64>() / replies as f64;
        let lost = count as usize - replies;

        Self {
            alive: true,
            avg_latency_ms: Some(avg),
            packet_loss_pct: lost as f64 / count as f64 * 100.0,
            raw_output,
        }
    }

    /// Number of answered requests out of `count`
    pub fn success_count(&self, count: u32) -> u32 {
        let ratio = 1.0 - self.packet_loss_pct.clamp(0.0, 100.0) / 100.0;
        (count as f64 * ratio).round() as u32
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Send `count` echo requests to `host`, waiting up to `timeout` for each reply
    async fn probe(&self, host: IpAddr, timeout: Duration, count: u32) -> ProbeResult;
}

/// Probe through the operating system's `ping` command
#[derive(Debug, Clone)]
pub struct SystemPing {
    binary: String,
}

impl Default for SystemPing {
    fn default() -> Self {
        Self {
            binary: "ping".to_string(),
        }
    }
}

impl SystemPing {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    #[cfg(target_os = "windows")]
    fn arguments(host: IpAddr, timeout: Duration, count: u32) -> Vec<String> {
        vec![
            "-n".to_string(),
            count.to_string(),
            "-w".to_string(),
            timeout.as_millis().to_string(),
            host.to_string(),
        ]
    }

    #[cfg(target_os = "macos")]
    fn arguments(host: IpAddr, timeout: Duration, count: u32) -> Vec<String> {
        vec![
            "-n".to_string(),
            "-c".to_string(),
            count.to_string(),
            "-W".to_string(),
            timeout.as_millis().to_string(),
            host.to_string(),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn arguments(host: IpAddr, timeout: Duration, count: u32) -> Vec<String> {
        // -W takes whole seconds here
        let wait_secs = timeout.as_millis().div_ceil(1000).max(1);
        vec![
            "-n".to_string(),
            "-c".to_string(),
            count.to_string(),
            "-W".to_string(),
            wait_secs.to_string(),
            host.to_string(),
        ]
    }

    /// Parse the textual output of a ping run
    pub fn parse_output(output: &str, count: u32) -> ProbeResult {
        let round_trips: Vec<f64> = REPLY_TIME
            .captures_iter(output)
            .filter_map(|captures| captures.get(1)?.as_str().parse().ok())
            .collect();

        ProbeResult::from_round_trips(&round_trips, count, output.to_string())
    }
}

#[async_trait]
impl Prober for SystemPing {
    #[instrument(skip(self), level = "trace")]
    async fn probe(&self, host: IpAddr, timeout: Duration, count: u32) -> ProbeResult {
        let count = count.max(1);
        let deadline = timeout * count + PROCESS_GRACE;

        let mut command = Command::new(&self.binary);
        command
            .args(Self::arguments(host, timeout, count))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(deadline, command.output()).await {
            Ok(Ok(output)) => {
                let text = String::from_utf8_lossy(&output.stdout);
                let result = Self::parse_output(&text, count);
                trace!(
                    "{host}: alive={} avg={:?} loss={}%",
                    result.alive, result.avg_latency_ms, result.packet_loss_pct
                );
                result
            }
            Ok(Err(e)) => {
                trace!("{host}: failed to run {}: {e}", self.binary);
                ProbeResult::unreachable(format!("ping failed: {e}"))
            }
            Err(_) => {
                trace!("{host}: ping exceeded {deadline:?}");
                ProbeResult::unreachable("ping timed out")
            }
        }
    }
}
