//! Device types for tracking discovered network hardware

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Kind of hardware a host was classified as
///
/// Declaration order is significant: configured signatures are evaluated in
/// this order, so a host matching two tables always resolves the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    BarcodeScanner,
    NfcReader,
    QrScanner,
    Printer,
    Camera,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::BarcodeScanner => "barcode_scanner",
            DeviceType::NfcReader => "nfc_reader",
            DeviceType::QrScanner => "qr_scanner",
            DeviceType::Printer => "printer",
            DeviceType::Camera => "camera",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "barcode_scanner" => Ok(DeviceType::BarcodeScanner),
            "nfc_reader" => Ok(DeviceType::NfcReader),
            "qr_scanner" => Ok(DeviceType::QrScanner),
            "printer" => Ok(DeviceType::Printer),
            "camera" => Ok(DeviceType::Camera),
            "unknown" => Ok(DeviceType::Unknown),
            other => Err(format!("unknown device type '{}'", other)),
        }
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol a device appears to speak, derived from its open ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    /// Raw TCP (JetDirect-style port 9100)
    Raw,
    Ipp,
    Lpr,
    Rtsp,
}

/// Lifecycle transition reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceEventKind {
    Discovered,
    Connected,
    Disconnected,
}

impl std::fmt::Display for DeviceEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEventKind::Discovered => f.write_str("discovered"),
            DeviceEventKind::Connected => f.write_str("connected"),
            DeviceEventKind::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Metadata scraped from a device's HTTP interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// URL the metadata was fetched from
    pub source: String,
    /// Manufacturer name, if one was found
    pub manufacturer: Option<String>,
    /// Device type as advertised by the device itself (not used for classification)
    pub device_type_hint: Option<String>,
    /// Raw body: the JSON document, or the extracted keywords for text pages
    pub data: serde_json::Value,
}

/// Result of probing a single host
#[derive(Debug, Clone, PartialEq)]
pub struct HostResult {
    pub address: IpAddr,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    /// Sorted ascending, no duplicates
    pub open_ports: Vec<u16>,
    pub metadata: Option<DeviceMetadata>,
    /// Round trip of the liveness probe, absent when liveness was skipped
    pub latency: Option<std::time::Duration>,
}

/// A classified network device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Network address, the registry key
    pub address: IpAddr,
    pub hostname: Option<String>,
    /// Link-layer address, upper case
    pub mac: Option<String>,
    pub device_type: DeviceType,
    pub manufacturer: Option<String>,
    /// Sorted ascending, no duplicates
    pub open_ports: Vec<u16>,
    pub protocols: Vec<Protocol>,
    pub metadata: Option<DeviceMetadata>,
    /// Liveness round trip in milliseconds
    pub latency_ms: Option<f64>,
    pub is_connected: bool,
    /// Consecutive failed connection attempts
    pub connection_attempts: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Build a device record from a probe result and its classification
    pub fn from_host(host: HostResult, device_type: DeviceType) -> Self {
        let now = Utc::now();
        let open_ports = normalize_ports(host.open_ports);
        let protocols = crate::classify::derive_protocols(&open_ports);
        let manufacturer = host.metadata.as_ref().and_then(|m| m.manufacturer.clone());
        Self {
            address: host.address,
            hostname: host.hostname,
            mac: host.mac.map(|m| m.to_uppercase()),
            device_type,
            manufacturer,
            open_ports,
            protocols,
            metadata: host.metadata,
            latency_ms: host.latency.map(|d| d.as_micros() as f64 / 1000.0),
            is_connected: false,
            connection_attempts: 0,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Update the last seen timestamp
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Time since the device was last observed
    pub fn age(&self) -> Duration {
        Utc::now() - self.last_seen
    }

    /// Check if the device has not been seen for longer than `max_age`
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    /// Whether the retry budget is spent and auto-connect should leave the device alone
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.connection_attempts >= max_attempts
    }

    /// Hostname when known, otherwise the address
    pub fn display_name(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// Sort and deduplicate a port list
pub fn normalize_ports(mut ports: Vec<u16>) -> Vec<u16> {
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn host(ports: Vec<u16>) -> HostResult {
        HostResult {
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)),
            hostname: None,
            mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            open_ports: ports,
            metadata: None,
            latency: Some(std::time::Duration::from_millis(12)),
        }
    }

    #[test]
    fn test_device_from_host_normalizes_ports() {
        let device = Device::from_host(host(vec![9100, 631, 9100, 80]), DeviceType::Printer);
        assert_eq!(device.open_ports, vec![80, 631, 9100]);
        assert_eq!(
            device.protocols,
            vec![Protocol::Http, Protocol::Raw, Protocol::Ipp]
        );
        assert_eq!(device.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(device.latency_ms, Some(12.0));
        assert!(!device.is_connected);
        assert_eq!(device.connection_attempts, 0);
    }

    #[test]
    fn test_exhaustion_threshold() {
        let mut device = Device::from_host(host(vec![9100]), DeviceType::Printer);
        device.connection_attempts = 2;
        assert!(!device.is_exhausted(3));
        device.connection_attempts = 3;
        assert!(device.is_exhausted(3));
    }

    #[test]
    fn test_display_name_falls_back_to_address() {
        let mut device = Device::from_host(host(vec![9100]), DeviceType::Printer);
        assert_eq!(device.display_name(), "192.168.1.40");
        device.hostname = Some("lobby-printer".to_string());
        assert_eq!(device.display_name(), "lobby-printer");
    }

    #[test]
    fn test_staleness() {
        let mut device = Device::from_host(host(vec![9100]), DeviceType::Printer);
        assert!(!device.is_stale(Duration::seconds(300)));
        device.last_seen = Utc::now() - Duration::seconds(301);
        assert!(device.is_stale(Duration::seconds(300)));
    }

    #[test]
    fn test_device_type_serde_names() {
        let json = serde_json::to_string(&DeviceType::BarcodeScanner).unwrap();
        assert_eq!(json, "\"barcode_scanner\"");
        let parsed: DeviceType = serde_json::from_str("\"nfc_reader\"").unwrap();
        assert_eq!(parsed, DeviceType::NfcReader);
    }
}
