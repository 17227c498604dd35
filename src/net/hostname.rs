//! Reverse DNS lookups for discovered hosts

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

/// Upper bound on a single reverse lookup
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// Resolve `ip` to a host name. Failures and timeouts yield `None`.
    async fn resolve(&self, ip: IpAddr) -> Option<String>;
}

/// Resolver backed by the system's reverse DNS
///
/// Each lookup is bounded by [`LOOKUP_TIMEOUT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

/// Normalise a PTR answer, rejecting answers that just echo the address back
fn clean_answer(ip: IpAddr, name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name == ip.to_string() {
        return None;
    }
    Some(name.to_string())
}

#[async_trait]
impl HostnameResolver for DnsResolver {
    async fn resolve(&self, ip: IpAddr) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));

        match tokio::time::timeout(LOOKUP_TIMEOUT, lookup).await {
            Ok(Ok(Ok(name))) => clean_answer(ip, &name),
            Ok(Ok(Err(e))) => {
                trace!("reverse lookup for {ip} failed: {e}");
                None
            }
            Ok(Err(e)) => {
                trace!("reverse lookup task for {ip} panicked: {e}");
                None
            }
            Err(_) => {
                trace!("reverse lookup for {ip} timed out");
                None
            }
        }
    }
}

/// Resolver that never resolves anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

#[async_trait]
impl HostnameResolver for NoResolver {
    async fn resolve(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}
