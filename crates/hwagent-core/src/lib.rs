//! hwagent Core - Device model, classification and registry
//!
//! This crate provides the I/O-free building blocks of the hardware agent:
//! - Device records and the closed set of device types
//! - IPv4 scan ranges
//! - Port-signature classification and connection protocol selection
//! - The registry that owns discovered/connected device state

pub mod classify;
pub mod device;
pub mod range;
pub mod registry;

pub use classify::{classify, connection_plan, derive_protocols, is_mac_allowed, Signatures};
pub use device::{Device, DeviceEventKind, DeviceMetadata, DeviceType, HostResult, Protocol};
pub use range::{RangeError, ScanRange};
pub use registry::{DeviceRegistry, MergeOutcome};
