//! Per-device connection attempts with protocol fallback and a retry budget

use hwagent_core::{connection_plan, Device, DeviceEventKind, DeviceRegistry};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{DiscoveryError, Result};
use crate::events::EventSink;
use crate::probe::NetworkProbe;

/// Connection timeout and retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Bound on each protocol handshake
    pub timeout: Duration,
    /// Consecutive failures after which auto-connect gives up
    pub max_attempts: u32,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_attempts: 3,
        }
    }
}

/// Result of one connection request
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// A handshake succeeded and the device is now connected
    Connected(Device),
    /// Nothing to do, the device was connected already
    AlreadyConnected(Device),
    /// Every protocol in the plan failed
    Failed { attempts: u32, exhausted: bool },
    /// Another attempt for this address is running; this request was dropped
    InFlight,
    /// The attempt was cancelled before it finished
    Cancelled,
    /// The device left the registry before the attempt ran
    NotFound,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectOutcome::Connected(_) | ConnectOutcome::AlreadyConnected(_)
        )
    }
}

struct InFlightTask {
    generation: u64,
    abort: AbortHandle,
}

type Ledger = Arc<Mutex<HashMap<IpAddr, InFlightTask>>>;

fn lock(ledger: &Ledger) -> MutexGuard<'_, HashMap<IpAddr, InFlightTask>> {
    match ledger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Clears a ledger entry when its task finishes or is aborted mid-run
///
/// The generation check keeps a late drop from removing the entry of a newer
/// attempt for the same address.
struct LedgerGuard {
    ledger: Ledger,
    address: IpAddr,
    generation: u64,
}

impl Drop for LedgerGuard {
    fn drop(&mut self) {
        let mut ledger = lock(&self.ledger);
        if ledger
            .get(&self.address)
            .is_some_and(|task| task.generation == self.generation)
        {
            ledger.remove(&self.address);
        }
    }
}

/// Runs connection attempts and owns the in-flight task ledger
///
/// At most one attempt per address is outstanding at any time, whether it was
/// dispatched by auto-connect or requested through [`ConnectionManager::connect`].
///
/// Every attempt belongs to a dispatch epoch. [`ConnectionManager::advance_epoch`]
/// retires the current one: attempts from an older epoch record nothing, and
/// the check runs under the registry write lock, so no device becomes
/// connected once a later `disconnect_all` has run.
#[derive(Clone)]
pub struct ConnectionManager {
    registry: Arc<RwLock<DeviceRegistry>>,
    probe: Arc<dyn NetworkProbe>,
    events: EventSink,
    policy: ConnectionPolicy,
    in_flight: Ledger,
    generation: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<RwLock<DeviceRegistry>>,
        probe: Arc<dyn NetworkProbe>,
        events: EventSink,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            registry,
            probe,
            events,
            policy,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    /// Current dispatch epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Retire the current epoch, returning the new one
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of attempts currently running
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_in_flight(&self, address: &IpAddr) -> bool {
        lock(&self.in_flight).contains_key(address)
    }

    /// Spawn an attempt unless one is already running for `address`
    fn spawn_attempt(&self, address: IpAddr, epoch: u64) -> Option<JoinHandle<ConnectOutcome>> {
        // Held across spawn + insert so a fast task cannot clear its entry
        // before it exists
        let mut ledger = lock(&self.in_flight);
        if ledger.contains_key(&address) {
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            // Built on first poll: an unpolled task dropped at shutdown must
            // not touch the ledger while this lock is still held
            let _guard = LedgerGuard {
                ledger: manager.in_flight.clone(),
                address,
                generation,
            };
            manager.attempt(address, epoch).await
        });

        ledger.insert(
            address,
            InFlightTask {
                generation,
                abort: handle.abort_handle(),
            },
        );
        Some(handle)
    }

    /// Start a background attempt without waiting for it
    ///
    /// Returns `false` if an attempt for this address is already running.
    pub fn dispatch(&self, address: IpAddr) -> bool {
        self.dispatch_in(address, self.epoch())
    }

    /// Like [`ConnectionManager::dispatch`], but only while `epoch` is current
    pub fn dispatch_in(&self, address: IpAddr, epoch: u64) -> bool {
        if epoch != self.epoch() {
            debug!(ip = %address, "Dispatch epoch retired, skipping connection attempt");
            return false;
        }
        match self.spawn_attempt(address, epoch) {
            Some(_) => {
                debug!(ip = %address, "Connection attempt dispatched");
                true
            }
            None => {
                debug!(ip = %address, "Connection attempt already in flight");
                false
            }
        }
    }

    /// Connect to a registered device and wait for the outcome
    ///
    /// Exhausted devices are attempted anyway; a success resets their
    /// counter.
    pub async fn connect(&self, address: IpAddr) -> Result<ConnectOutcome> {
        {
            let registry = self.registry.read().await;
            match registry.get(&address) {
                None => return Err(DiscoveryError::DeviceNotFound(address)),
                Some(device) if device.is_connected => {
                    return Ok(ConnectOutcome::AlreadyConnected(device.clone()));
                }
                Some(_) => {}
            }
        }

        let Some(handle) = self.spawn_attempt(address, self.epoch()) else {
            debug!(ip = %address, "Connection attempt already in flight");
            return Ok(ConnectOutcome::InFlight);
        };

        match handle.await {
            Ok(ConnectOutcome::NotFound) => Err(DiscoveryError::DeviceNotFound(address)),
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_cancelled() => Ok(ConnectOutcome::Cancelled),
            Err(e) => {
                warn!(ip = %address, error = %e, "Connection task failed");
                Ok(ConnectOutcome::Cancelled)
            }
        }
    }

    /// One attempt: walk the connection plan until a handshake succeeds
    async fn attempt(&self, address: IpAddr, epoch: u64) -> ConnectOutcome {
        if epoch != self.epoch() {
            return ConnectOutcome::Cancelled;
        }

        let open_ports = {
            let registry = self.registry.read().await;
            match registry.get(&address) {
                Some(device) if device.is_connected => {
                    return ConnectOutcome::AlreadyConnected(device.clone());
                }
                Some(device) => device.open_ports.clone(),
                None => return ConnectOutcome::NotFound,
            }
        };

        let mut succeeded = false;
        for (protocol, port) in connection_plan(&open_ports) {
            debug!(ip = %address, ?protocol, port = port, "Trying handshake");
            match timeout(self.policy.timeout, self.probe.handshake(address, protocol, port)).await {
                Ok(true) => {
                    debug!(ip = %address, ?protocol, port = port, "Handshake succeeded");
                    succeeded = true;
                    break;
                }
                Ok(false) => debug!(ip = %address, ?protocol, port = port, "Handshake failed"),
                Err(_) => debug!(ip = %address, ?protocol, port = port, "Handshake timed out"),
            }
        }

        let device = {
            let mut registry = self.registry.write().await;
            if epoch != self.epoch() {
                debug!(ip = %address, "Dispatch epoch retired during attempt, discarding result");
                return ConnectOutcome::Cancelled;
            }
            if succeeded {
                registry.mark_connected(&address)
            } else {
                registry.record_failure(&address)
            }
        };
        let Some(device) = device else {
            return ConnectOutcome::NotFound;
        };

        if succeeded {
            info!(ip = %address, name = %device.display_name(), "Device connected");
            self.events.device_event(&device, DeviceEventKind::Connected);
            return ConnectOutcome::Connected(device);
        }

        let exhausted = device.is_exhausted(self.policy.max_attempts);
        if exhausted {
            warn!(
                ip = %address,
                attempts = device.connection_attempts,
                "Connection attempts exhausted, auto-connect disabled for device"
            );
        } else {
            debug!(ip = %address, attempts = device.connection_attempts, "Connection attempt failed");
        }
        ConnectOutcome::Failed {
            attempts: device.connection_attempts,
            exhausted,
        }
    }

    /// Move a device out of the connected set
    ///
    /// Returns `true` if it was connected. Disconnecting a registered device
    /// that is not connected is a successful no-op.
    pub async fn disconnect(&self, address: IpAddr) -> Result<bool> {
        let device = {
            let mut registry = self.registry.write().await;
            if !registry.contains(&address) {
                return Err(DiscoveryError::DeviceNotFound(address));
            }
            registry.mark_disconnected(&address)
        };

        match device {
            Some(device) => {
                info!(ip = %address, name = %device.display_name(), "Device disconnected");
                self.events.device_event(&device, DeviceEventKind::Disconnected);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Disconnect every connected device, returning how many were disconnected
    pub async fn disconnect_all(&self) -> usize {
        let devices: Vec<Device> = {
            let mut registry = self.registry.write().await;
            registry
                .connected_addresses()
                .into_iter()
                .filter_map(|address| registry.mark_disconnected(&address))
                .collect()
        };

        for device in &devices {
            info!(ip = %device.address, name = %device.display_name(), "Device disconnected");
            self.events.device_event(device, DeviceEventKind::Disconnected);
        }
        devices.len()
    }

    /// Abort the attempt running for `address`, if any
    pub fn cancel(&self, address: &IpAddr) -> bool {
        match lock(&self.in_flight).remove(address) {
            Some(task) => {
                task.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every running attempt, returning how many were aborted
    pub fn cancel_all(&self) -> usize {
        let tasks: Vec<InFlightTask> = lock(&self.in_flight).drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.abort.abort();
        }
        if !tasks.is_empty() {
            info!(count = tasks.len(), "Cancelled in-flight connection attempts");
        }
        tasks.len()
    }
}
