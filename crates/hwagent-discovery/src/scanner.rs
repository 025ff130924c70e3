//! Discovery scanner: range sweeps, registry merging and auto-connect

use hwagent_core::{
    classify, is_mac_allowed, Device, DeviceEventKind, DeviceRegistry, DeviceType, HostResult,
    MergeOutcome, RangeError, ScanRange, Signatures,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectOutcome, ConnectionManager, ConnectionPolicy};
use crate::error::Result;
use crate::events::{DeviceObserver, DiscoveryEvent, EventSink};
use crate::probe::{probe_host, NetworkProbe};
use crate::system::{ProbeTimeouts, SystemProbe};

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Range to sweep in CIDR notation (e.g., "192.168.1.0/24")
    pub range: String,
    /// Delay between sweeps in continuous mode
    pub interval_secs: u64,
    /// Hosts probed at the same time
    pub max_concurrent_probes: usize,
    pub liveness_timeout_ms: u64,
    pub port_timeout_ms: u64,
    /// HTTP enrichment and reverse lookup timeout
    pub http_timeout_ms: u64,
    /// Per-handshake connection timeout
    pub connect_timeout_ms: u64,
    /// Consecutive failures before auto-connect gives up on a device
    pub max_attempts: u32,
    /// Connect to devices as they are discovered
    pub auto_connect: bool,
    /// Ports probed in addition to the signature tables
    pub common_ports: Vec<u16>,
    /// Device type to expected port mapping
    pub signatures: Signatures,
    /// Link-layer address allow-list (empty allows all)
    pub allowed_macs: Vec<String>,
    /// Evict devices unseen for this long after each sweep (never if unset)
    pub eviction_max_age_secs: Option<u64>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            range: "192.168.1.0/24".to_string(),
            interval_secs: 5,
            max_concurrent_probes: 50,
            liveness_timeout_ms: 1000,
            port_timeout_ms: 1000,
            http_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            max_attempts: 3,
            auto_connect: true,
            common_ports: vec![22, 23, 53, 80, 443, 515, 631, 8080, 8443, 9100],
            signatures: Signatures::default(),
            allowed_macs: Vec::new(),
            eviction_max_age_secs: None,
        }
    }
}

impl ScannerConfig {
    pub fn scan_range(&self) -> std::result::Result<ScanRange, RangeError> {
        self.range.parse()
    }

    /// Ports checked on every live host: all signature ports plus the common ones
    pub fn probe_ports(&self) -> Vec<u16> {
        let mut ports: BTreeSet<u16> = self.signatures.all_ports();
        ports.extend(self.common_ports.iter().copied());
        ports.into_iter().collect()
    }

    pub fn probe_timeouts(&self) -> ProbeTimeouts {
        ProbeTimeouts {
            liveness: Duration::from_millis(self.liveness_timeout_ms),
            port: Duration::from_millis(self.port_timeout_ms),
            enrichment: Duration::from_millis(self.http_timeout_ms),
            handshake: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn connection_policy(&self) -> ConnectionPolicy {
        ConnectionPolicy {
            timeout: Duration::from_millis(self.connect_timeout_ms),
            max_attempts: self.max_attempts,
        }
    }

    pub fn eviction_max_age(&self) -> Option<chrono::Duration> {
        // Ages beyond chrono's range mean "never"
        self.eviction_max_age_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
    }
}

/// Scanner lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Discovery scanner service
pub struct DiscoveryScanner {
    config: ScannerConfig,
    registry: Arc<RwLock<DeviceRegistry>>,
    probe: Arc<dyn NetworkProbe>,
    connections: ConnectionManager,
    events: EventSink,
    /// Token of the running continuous loop, `None` when idle
    run: Mutex<Option<CancellationToken>>,
}

impl DiscoveryScanner {
    /// Create a scanner that probes the real network
    pub fn new(config: ScannerConfig) -> Self {
        let probe = Arc::new(SystemProbe::new(config.probe_timeouts()));
        Self::with_probe(config, probe)
    }

    /// Create a scanner with a custom probe implementation
    pub fn with_probe(config: ScannerConfig, probe: Arc<dyn NetworkProbe>) -> Self {
        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
        let events = EventSink::new();
        let connections = ConnectionManager::new(
            registry.clone(),
            probe.clone(),
            events.clone(),
            config.connection_policy(),
        );
        Self {
            config,
            registry,
            probe,
            connections,
            events,
            run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Register the lifecycle observer, replacing any previous one
    pub fn set_observer(&self, observer: Arc<dyn DeviceObserver>) {
        self.events.set_observer(observer);
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ScanState {
        if self.run.lock().await.is_some() {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    /// Run a single sweep of the configured range
    ///
    /// Returns the devices seen in this sweep, ordered by address. Fails only
    /// if the range cannot be parsed, before any host is probed.
    pub async fn scan_once(&self) -> Result<Vec<Device>> {
        let range = self.config.scan_range()?;
        Ok(self.sweep(range).await)
    }

    /// Sweep continuously until [`DiscoveryScanner::stop`] is called
    ///
    /// Returns immediately if the scanner is already running. An invalid
    /// range is reported before anything is dispatched.
    pub async fn start_continuous(&self) -> Result<()> {
        let range = self.config.scan_range()?;

        let token = {
            let mut run = self.run.lock().await;
            if run.is_some() {
                debug!("Scanner already running");
                return Ok(());
            }
            let token = CancellationToken::new();
            *run = Some(token.clone());
            token
        };

        let interval = Duration::from_secs(self.config.interval_secs);
        info!(range = %range, interval_secs = self.config.interval_secs, "Continuous scanning started");

        while !token.is_cancelled() {
            self.sweep(range).await;

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Continuous scanning stopped");
        Ok(())
    }

    /// Stop scanning, cancel connection attempts and disconnect everything
    ///
    /// A sweep already in progress drains, but it dispatches no further
    /// connection attempts and no new sweep starts. This holds for one-shot
    /// sweeps as well as the continuous loop.
    pub async fn stop(&self) {
        self.connections.advance_epoch();
        if let Some(token) = self.run.lock().await.take() {
            token.cancel();
        }

        let cancelled = self.connections.cancel_all();
        let disconnected = self.connections.disconnect_all().await;
        info!(cancelled = cancelled, disconnected = disconnected, "Scanner stopped");
    }

    async fn sweep(&self, range: ScanRange) -> Vec<Device> {
        // Auto-connect for this sweep ends with the epoch it started in
        let epoch = self.connections.epoch();
        self.events.send(DiscoveryEvent::ScanStarted);
        info!(range = %range, hosts = range.host_count(), "Starting discovery scan");

        let ports: Arc<[u16]> = self.config.probe_ports().into();
        let limit = self.config.max_concurrent_probes.max(1);
        let mut hosts = range.hosts();
        let mut tasks = JoinSet::new();

        // At most `limit` probe tasks exist at once; results merge in completion order
        let mut found = Vec::new();
        loop {
            while tasks.len() < limit {
                let Some(host) = hosts.next() else { break };
                let probe = self.probe.clone();
                let ports = ports.clone();
                tasks.spawn(async move { probe_host(probe.as_ref(), IpAddr::V4(host), &ports).await });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(Some(host)) => {
                    if let Some(device) = self.handle_host(host, epoch).await {
                        found.push(device);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }

        if let Some(max_age) = self.config.eviction_max_age() {
            self.evict_stale(max_age).await;
        }

        let total = self.registry.read().await.len();
        self.events.send(DiscoveryEvent::ScanCompleted {
            found: found.len(),
            total,
        });
        info!("Scan complete: {} devices found, {} total tracked", found.len(), total);

        found.sort_by_key(|d| d.address);
        found
    }

    /// Classify, filter and merge one probe result
    async fn handle_host(&self, host: HostResult, epoch: u64) -> Option<Device> {
        let device_type = classify(&host.open_ports, &self.config.signatures);
        if device_type == DeviceType::Unknown {
            debug!(ip = %host.address, ports = ?host.open_ports, "Ignoring unclassified host");
            return None;
        }

        if let Some(mac) = host.mac.as_deref() {
            if !is_mac_allowed(mac, &self.config.allowed_macs) {
                debug!(ip = %host.address, mac = %mac, "Host not in MAC allow-list");
                return None;
            }
        }

        let outcome = self
            .registry
            .write()
            .await
            .merge(Device::from_host(host, device_type));

        let device = match outcome {
            MergeOutcome::New(device) => {
                info!(
                    ip = %device.address,
                    name = %device.display_name(),
                    device_type = %device.device_type,
                    ports = ?device.open_ports,
                    "Device discovered"
                );
                self.events.device_event(&device, DeviceEventKind::Discovered);
                device
            }
            MergeOutcome::Refreshed(device) => {
                debug!(ip = %device.address, "Device refreshed");
                device
            }
        };

        if self.config.auto_connect
            && !device.is_connected
            && !device.is_exhausted(self.connections.policy().max_attempts)
        {
            self.connections.dispatch_in(device.address, epoch);
        }

        Some(device)
    }

    /// Get current device list, ordered by address
    pub async fn devices(&self) -> Vec<Device> {
        self.registry.read().await.discovered()
    }

    pub async fn connected_devices(&self) -> Vec<Device> {
        self.registry.read().await.connected()
    }

    /// Get a specific device
    pub async fn get_device(&self, address: &IpAddr) -> Option<Device> {
        self.registry.read().await.get(address).cloned()
    }

    /// Manually connect to a discovered device
    pub async fn connect_device(&self, address: IpAddr) -> Result<ConnectOutcome> {
        self.connections.connect(address).await
    }

    /// Manually disconnect a discovered device
    pub async fn disconnect_device(&self, address: IpAddr) -> Result<bool> {
        self.connections.disconnect(address).await
    }

    /// Forget every discovered device
    ///
    /// Running connection attempts are cancelled. No events are fired.
    pub async fn clear(&self) {
        let cancelled = self.connections.cancel_all();
        self.registry.write().await.clear();
        info!(cancelled = cancelled, "Discovered devices cleared");
    }

    /// Remove devices not seen for longer than `max_age`
    ///
    /// Connected devices are reported as disconnected before they are evicted.
    pub async fn evict_stale(&self, max_age: chrono::Duration) -> Vec<Device> {
        let mut evicted = self.registry.write().await.evict_stale(max_age);
        for device in &mut evicted {
            self.connections.cancel(&device.address);
            if device.is_connected {
                device.is_connected = false;
                info!(ip = %device.address, name = %device.display_name(), "Device disconnected");
                self.events.device_event(device, DeviceEventKind::Disconnected);
            }
            info!(ip = %device.address, age_secs = device.age().num_seconds(), "Device evicted");
            self.events.send(DiscoveryEvent::DeviceEvicted(device.clone()));
        }
        evicted
    }
}
