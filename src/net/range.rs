//! CIDR-style address ranges
//!
//! A range such as `192.168.1.0/24` expands to every address strictly between
//! its network and broadcast addresses, in ascending order. Host bits in the
//! given address are ignored (`192.168.1.77/24` is the same range).
//! `/31` and `/32` therefore contain no scan candidates.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// Errors produced when parsing a malformed range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// No `/prefix` part
    MissingPrefix(String),

    /// Address part is not an IP address
    InvalidAddress(String),

    /// Prefix is not a number in 0..=32
    InvalidPrefix(String),

    /// Only IPv4 ranges can be swept
    UnsupportedFamily(String),
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::MissingPrefix(range) => write!(f, "range '{range}' has no prefix length"),
            RangeError::InvalidAddress(range) => write!(f, "range '{range}' has an invalid address"),
            RangeError::InvalidPrefix(range) => {
                write!(f, "range '{range}' has an invalid prefix length")
            }
            RangeError::UnsupportedFamily(range) => {
                write!(f, "range '{range}' is not an IPv4 range")
            }
        }
    }
}

impl std::error::Error for RangeError {}

/// A parsed IPv4 network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubnetRange {
    network: u32,
    prefix: u8,
}

impl SubnetRange {
    pub fn parse(range: &str) -> Result<Self, RangeError> {
        let trimmed = range.trim();
        let (address, prefix) = trimmed
            .split_once('/')
            .ok_or_else(|| RangeError::MissingPrefix(trimmed.to_string()))?;

        let address: IpAddr = address
            .parse()
            .map_err(|_| RangeError::InvalidAddress(trimmed.to_string()))?;
        let IpAddr::V4(address) = address else {
            return Err(RangeError::UnsupportedFamily(trimmed.to_string()));
        };

        let prefix = prefix
            .parse::<u8>()
            .ok()
            .filter(|prefix| *prefix <= 32)
            .ok_or_else(|| RangeError::InvalidPrefix(trimmed.to_string()))?;

        Ok(Self {
            network: u32::from(address) & Self::mask(prefix),
            prefix,
        })
    }

    fn mask(prefix: u8) -> u32 {
        match prefix {
            0 => 0,
            p => u32::MAX << (32 - p as u32),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !Self::mask(self.prefix))
    }

    /// Number of scan candidates (network and broadcast excluded)
    pub fn host_count(&self) -> usize {
        let span = u32::from(self.broadcast()) - self.network;
        span.saturating_sub(1) as usize
    }

    /// Lazily yields the scan candidates in ascending order
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let first = self.network as u64 + 1;
        let broadcast = u32::from(self.broadcast()) as u64;
        (first..broadcast).map(|address| Ipv4Addr::from(address as u32))
    }
}

impl FromStr for SubnetRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SubnetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

/// Expand a range into its host addresses
pub fn expand(range: &str) -> Result<Vec<Ipv4Addr>, RangeError> {
    Ok(SubnetRange::parse(range)?.hosts().collect())
}
