//! IPv4 scan range parsing and host enumeration

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Invalid network address in range '{0}'")]
    InvalidAddress(String),
    #[error("Invalid prefix length in range '{0}'")]
    InvalidPrefix(String),
}

/// An IPv4 network in CIDR notation (e.g. "192.168.1.0/24")
///
/// Host bits in the address are ignored, so "10.0.0.7/30" is the same
/// range as "10.0.0.4/30".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl ScanRange {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, RangeError> {
        if prefix_len > 32 {
            return Err(RangeError::InvalidPrefix(format!("{}/{}", address, prefix_len)));
        }
        let network = Ipv4Addr::from(u32::from(address) & mask(prefix_len));
        Ok(Self { network, prefix_len })
    }

    /// Broadcast address of the range
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask(self.prefix_len))
    }

    /// Usable host addresses
    ///
    /// Network and broadcast addresses are skipped, except for /31 and /32
    /// where every address is a host.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let network = u32::from(self.network);
        let broadcast = u32::from(self.broadcast());
        let (first, last) = if self.prefix_len >= 31 {
            (network, broadcast)
        } else {
            (network + 1, broadcast - 1)
        };
        (first..=last).map(Ipv4Addr::from)
    }

    /// Number of usable host addresses
    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - self.prefix_len as u32);
        if self.prefix_len >= 31 {
            size
        } else {
            size - 2
        }
    }
}

impl FromStr for ScanRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let address =
            Ipv4Addr::from_str(addr).map_err(|_| RangeError::InvalidAddress(s.to_string()))?;
        let prefix_len = match prefix {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| RangeError::InvalidPrefix(s.to_string()))?,
            None => 32,
        };
        if prefix_len > 32 {
            return Err(RangeError::InvalidPrefix(s.to_string()));
        }

        Self::new(address, prefix_len)
    }
}

impl std::fmt::Display for ScanRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= 32 {
        0xFFFFFFFF
    } else {
        !((1u32 << (32 - prefix_len)) - 1)
    }
}
