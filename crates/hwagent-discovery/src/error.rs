//! Discovery error types

use hwagent_core::RangeError;
use std::net::IpAddr;
use thiserror::Error;

/// Errors surfaced to callers of the scanner and connection manager
///
/// Per-host I/O failures never appear here; they are absorbed as
/// "unreachable" or "closed" inside the probe.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid scan range: {0}")]
    InvalidRange(#[from] RangeError),
    #[error("Device not found: {0}")]
    DeviceNotFound(IpAddr),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
