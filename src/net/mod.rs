//! Network primitives used by the scanner and the health monitor
//!
//! - [`range`]: CIDR expansion into host addresses
//! - [`ping`]: ICMP reachability probes
//! - [`hostname`]: time-boxed reverse DNS

pub mod hostname;
pub mod ping;
pub mod range;

pub use hostname::{DnsResolver, HostnameResolver, NoResolver};
pub use ping::{ProbeResult, Prober, SystemPing};
pub use range::{RangeError, SubnetRange, expand};
