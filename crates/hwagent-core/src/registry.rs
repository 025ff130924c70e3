//! In-memory registry of discovered and connected devices
//!
//! The registry is the single owner of device lifecycle state. Records are
//! keyed by network address and are refreshed in place on repeat sightings so
//! that connection state and attempt counters survive across sweeps.

use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::classify::derive_protocols;
use crate::device::{normalize_ports, Device};

/// Result of merging a sighting into the registry
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// First sighting, record created
    New(Device),
    /// Existing record refreshed in place
    Refreshed(Device),
}

impl MergeOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, MergeOutcome::New(_))
    }
}

/// Discovered devices plus the subset currently connected
///
/// Invariant: every address in the connected set is present in the
/// discovered map and has `is_connected == true`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    discovered: BTreeMap<IpAddr, Device>,
    connected: BTreeSet<IpAddr>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.discovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty()
    }

    pub fn get(&self, address: &IpAddr) -> Option<&Device> {
        self.discovered.get(address)
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.discovered.contains_key(address)
    }

    /// All discovered devices, ordered by address
    pub fn discovered(&self) -> Vec<Device> {
        self.discovered.values().cloned().collect()
    }

    /// Connected devices, ordered by address
    pub fn connected(&self) -> Vec<Device> {
        self.connected
            .iter()
            .filter_map(|addr| self.discovered.get(addr))
            .cloned()
            .collect()
    }

    pub fn connected_addresses(&self) -> Vec<IpAddr> {
        self.connected.iter().copied().collect()
    }

    /// Insert a new device or refresh the existing record for its address
    ///
    /// A refresh updates `last_seen`, open ports, latency and any newly
    /// learned hostname, link-layer address or metadata. Classification,
    /// connection state and the attempt counter are left untouched.
    pub fn merge(&mut self, sighting: Device) -> MergeOutcome {
        match self.discovered.get_mut(&sighting.address) {
            Some(existing) => {
                existing.touch();
                existing.open_ports = normalize_ports(sighting.open_ports);
                existing.protocols = derive_protocols(&existing.open_ports);
                existing.latency_ms = sighting.latency_ms;
                if sighting.hostname.is_some() {
                    existing.hostname = sighting.hostname;
                }
                if sighting.mac.is_some() {
                    existing.mac = sighting.mac;
                }
                if sighting.metadata.is_some() {
                    existing.manufacturer = sighting.manufacturer.or(existing.manufacturer.take());
                    existing.metadata = sighting.metadata;
                }
                MergeOutcome::Refreshed(existing.clone())
            }
            None => {
                let mut device = sighting;
                device.open_ports = normalize_ports(device.open_ports);
                device.is_connected = false;
                device.connection_attempts = 0;
                self.discovered.insert(device.address, device.clone());
                MergeOutcome::New(device)
            }
        }
    }

    /// Move a device into the connected set and reset its attempt counter
    ///
    /// Returns `None` if the address is not in the registry.
    pub fn mark_connected(&mut self, address: &IpAddr) -> Option<Device> {
        let device = self.discovered.get_mut(address)?;
        device.is_connected = true;
        device.connection_attempts = 0;
        self.connected.insert(*address);
        Some(device.clone())
    }

    /// Move a device out of the connected set
    ///
    /// Returns the device only if it was connected; disconnecting a device
    /// that is not connected changes nothing.
    pub fn mark_disconnected(&mut self, address: &IpAddr) -> Option<Device> {
        if !self.connected.remove(address) {
            return None;
        }
        let device = self.discovered.get_mut(address)?;
        device.is_connected = false;
        Some(device.clone())
    }

    /// Count one failed connection attempt
    pub fn record_failure(&mut self, address: &IpAddr) -> Option<Device> {
        let device = self.discovered.get_mut(address)?;
        device.connection_attempts = device.connection_attempts.saturating_add(1);
        Some(device.clone())
    }

    /// Remove devices not seen for longer than `max_age`
    pub fn evict_stale(&mut self, max_age: Duration) -> Vec<Device> {
        let stale: Vec<IpAddr> = self
            .discovered
            .values()
            .filter(|d| d.is_stale(max_age))
            .map(|d| d.address)
            .collect();

        stale
            .into_iter()
            .filter_map(|addr| {
                self.connected.remove(&addr);
                self.discovered.remove(&addr)
            })
            .collect()
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.discovered.clear();
        self.connected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceMetadata, DeviceType, HostResult};
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn sighting(last: u8, ports: Vec<u16>) -> Device {
        Device::from_host(
            HostResult {
                address: addr(last),
                hostname: None,
                mac: None,
                open_ports: ports,
                metadata: None,
                latency: None,
            },
            DeviceType::Printer,
        )
    }

    #[test]
    fn test_merge_new_then_refresh() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.merge(sighting(1, vec![9100])).is_new());

        let outcome = registry.merge(sighting(1, vec![631, 9100]));
        assert!(!outcome.is_new());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&addr(1)).unwrap().open_ports, vec![631, 9100]);
    }

    #[test]
    fn test_refresh_preserves_connection_state() {
        let mut registry = DeviceRegistry::new();
        registry.merge(sighting(1, vec![9100]));
        registry.record_failure(&addr(1));
        registry.record_failure(&addr(1));
        registry.mark_connected(&addr(1));
        registry.record_failure(&addr(1));

        registry.merge(sighting(1, vec![9100]));
        let device = registry.get(&addr(1)).unwrap();
        assert!(device.is_connected);
        assert_eq!(device.connection_attempts, 1);
        assert_eq!(registry.connected().len(), 1);
    }

    #[test]
    fn test_refresh_keeps_known_hostname_and_learns_mac() {
        let mut registry = DeviceRegistry::new();
        let mut first = sighting(1, vec![9100]);
        first.hostname = Some("printer-1".to_string());
        registry.merge(first);

        let mut second = sighting(1, vec![9100]);
        second.mac = Some("AA:BB:CC:DD:EE:FF".to_string());
        second.metadata = Some(DeviceMetadata {
            source: "http://10.0.0.1:80/".to_string(),
            manufacturer: Some("Zebra".to_string()),
            ..Default::default()
        });
        second.manufacturer = Some("Zebra".to_string());
        registry.merge(second);

        let device = registry.get(&addr(1)).unwrap();
        assert_eq!(device.hostname.as_deref(), Some("printer-1"));
        assert_eq!(device.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(device.manufacturer.as_deref(), Some("Zebra"));
    }

    #[test]
    fn test_connect_resets_attempts() {
        let mut registry = DeviceRegistry::new();
        registry.merge(sighting(1, vec![9100]));
        registry.record_failure(&addr(1));
        registry.record_failure(&addr(1));
        assert_eq!(registry.get(&addr(1)).unwrap().connection_attempts, 2);

        let device = registry.mark_connected(&addr(1)).unwrap();
        assert!(device.is_connected);
        assert_eq!(device.connection_attempts, 0);
    }

    #[test]
    fn test_mark_connected_unknown_address() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.mark_connected(&addr(9)).is_none());
        assert!(registry.connected().is_empty());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut registry = DeviceRegistry::new();
        registry.merge(sighting(1, vec![9100]));
        assert!(registry.mark_disconnected(&addr(1)).is_none());

        registry.mark_connected(&addr(1));
        let device = registry.mark_disconnected(&addr(1)).unwrap();
        assert!(!device.is_connected);
        assert!(registry.mark_disconnected(&addr(1)).is_none());
        assert!(registry.connected().is_empty());
        assert!(registry.contains(&addr(1)));
    }

    #[test]
    fn test_evict_stale() {
        let mut registry = DeviceRegistry::new();
        registry.merge(sighting(1, vec![9100]));
        registry.merge(sighting(2, vec![9100]));
        registry.mark_connected(&addr(1));
        registry.discovered.get_mut(&addr(1)).unwrap().last_seen =
            Utc::now() - Duration::seconds(600);

        let evicted = registry.evict_stale(Duration::seconds(300));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].address, addr(1));
        assert!(!registry.contains(&addr(1)));
        assert!(registry.connected_addresses().is_empty());
        assert!(registry.contains(&addr(2)));
    }

    #[test]
    fn test_clear() {
        let mut registry = DeviceRegistry::new();
        registry.merge(sighting(1, vec![9100]));
        registry.mark_connected(&addr(1));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.connected().is_empty());
    }
}
