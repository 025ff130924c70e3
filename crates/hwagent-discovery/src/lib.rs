//! hwagent Discovery - Network discovery and connection management
//!
//! This crate drives the hardware agent's network side:
//! - Host probing (ping, concurrent TCP port checks, reverse DNS, neighbor
//!   table and HTTP metadata) behind the [`NetworkProbe`] trait
//! - Range sweeps with bounded concurrency and a continuous scan loop
//! - Connection attempts with protocol fallback and a retry budget
//! - Lifecycle events for an observer callback and a broadcast stream

pub mod arp;
pub mod connection;
pub mod error;
pub mod events;
pub mod http;
pub mod mock;
pub mod probe;
pub mod scanner;
pub mod system;

pub use connection::{ConnectOutcome, ConnectionManager, ConnectionPolicy};
pub use error::{DiscoveryError, Result};
pub use events::{DeviceObserver, DiscoveryEvent, EventSink};
pub use probe::{probe_host, Liveness, NetworkProbe};
pub use scanner::{DiscoveryScanner, ScanState, ScannerConfig};
pub use system::{Capabilities, ProbeTimeouts, SystemProbe};
