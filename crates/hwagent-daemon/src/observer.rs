//! Observer that reports device lifecycle transitions to the log

use anyhow::Result;
use hwagent_core::{Device, DeviceEventKind};
use hwagent_discovery::DeviceObserver;
use tracing::info;

/// Logs every discovered/connected/disconnected transition
pub struct LogObserver;

impl DeviceObserver for LogObserver {
    fn on_event(&self, device: &Device, event: DeviceEventKind) -> Result<()> {
        info!(
            event = %event,
            ip = %device.address,
            name = %device.display_name(),
            device_type = %device.device_type,
            mac = device.mac.as_deref().unwrap_or("-"),
            attempts = device.connection_attempts,
            "Device {}",
            event
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwagent_core::{DeviceType, HostResult};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_log_observer_never_fails() {
        let device = Device::from_host(
            HostResult {
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                hostname: Some("lobby-printer".to_string()),
                mac: None,
                open_ports: vec![9100],
                metadata: None,
                latency: None,
            },
            DeviceType::Printer,
        );
        for event in [
            DeviceEventKind::Discovered,
            DeviceEventKind::Connected,
            DeviceEventKind::Disconnected,
        ] {
            assert!(LogObserver.on_event(&device, event).is_ok());
        }
    }
}
