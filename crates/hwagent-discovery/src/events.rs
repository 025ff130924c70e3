//! Discovery events and observer dispatch

use hwagent_core::{Device, DeviceEventKind};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

/// Discovery event for real-time updates
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// New device entered the registry
    DeviceDiscovered(Device),
    /// Connection attempt succeeded
    DeviceConnected(Device),
    /// Device left the connected set
    DeviceDisconnected(Device),
    /// Device aged out of the registry
    DeviceEvicted(Device),
    /// Sweep started
    ScanStarted,
    /// Sweep completed
    ScanCompleted { found: usize, total: usize },
}

/// Callback invoked for every registry-visible lifecycle transition
///
/// Implementations must return quickly; they run inline on the scheduler.
/// Errors (and panics) are logged and otherwise ignored.
pub trait DeviceObserver: Send + Sync {
    fn on_event(&self, device: &Device, event: DeviceEventKind) -> anyhow::Result<()>;
}

impl<F> DeviceObserver for F
where
    F: Fn(&Device, DeviceEventKind) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, device: &Device, event: DeviceEventKind) -> anyhow::Result<()> {
        self(device, event)
    }
}

/// Fan-out point for the observer callback and the broadcast stream
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<DiscoveryEvent>,
    observer: Arc<RwLock<Option<Arc<dyn DeviceObserver>>>>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            tx,
            observer: Arc::new(RwLock::new(None)),
        }
    }

    /// Register the observer, replacing any previous one
    pub fn set_observer(&self, observer: Arc<dyn DeviceObserver>) {
        match self.observer.write() {
            Ok(mut slot) => *slot = Some(observer),
            Err(poisoned) => *poisoned.into_inner() = Some(observer),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.tx.subscribe()
    }

    /// Broadcast a non-device event
    pub fn send(&self, event: DiscoveryEvent) {
        let _ = self.tx.send(event);
    }

    /// Notify the observer and broadcast a device lifecycle transition
    pub fn device_event(&self, device: &Device, kind: DeviceEventKind) {
        let observer = match self.observer.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        if let Some(observer) = observer {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(device, kind))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(ip = %device.address, event = %kind, error = %e, "Device observer failed");
                }
                Err(_) => {
                    warn!(ip = %device.address, event = %kind, "Device observer panicked");
                }
            }
        }

        let event = match kind {
            DeviceEventKind::Discovered => DiscoveryEvent::DeviceDiscovered(device.clone()),
            DeviceEventKind::Connected => DiscoveryEvent::DeviceConnected(device.clone()),
            DeviceEventKind::Disconnected => DiscoveryEvent::DeviceDisconnected(device.clone()),
        };
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwagent_core::{DeviceType, HostResult};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    fn device() -> Device {
        Device::from_host(
            HostResult {
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                hostname: None,
                mac: None,
                open_ports: vec![9100],
                metadata: None,
                latency: None,
            },
            DeviceType::Printer,
        )
    }

    #[test]
    fn test_observer_and_broadcast_both_receive() {
        let sink = EventSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        sink.set_observer(Arc::new(move |d: &Device, kind: DeviceEventKind| -> anyhow::Result<()> {
            seen_clone.lock().unwrap().push((d.address, kind));
            Ok(())
        }));
        let mut rx = sink.subscribe();

        sink.device_event(&device(), DeviceEventKind::Connected);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::DeviceConnected(_))));
    }

    #[test]
    fn test_observer_failure_is_swallowed() {
        let sink = EventSink::new();
        sink.set_observer(Arc::new(|_: &Device, _: DeviceEventKind| -> anyhow::Result<()> {
            anyhow::bail!("backend unavailable")
        }));
        let mut rx = sink.subscribe();

        sink.device_event(&device(), DeviceEventKind::Discovered);

        assert!(matches!(rx.try_recv(), Ok(DiscoveryEvent::DeviceDiscovered(_))));
    }

    #[test]
    fn test_observer_panic_is_swallowed() {
        let sink = EventSink::new();
        sink.set_observer(Arc::new(|_: &Device, _: DeviceEventKind| -> anyhow::Result<()> {
            panic!("observer bug")
        }));
        sink.device_event(&device(), DeviceEventKind::Disconnected);
    }
}
