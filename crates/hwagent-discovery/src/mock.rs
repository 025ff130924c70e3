//! Mock probe for testing without a network.
//!
//! [`MockProbe`] implements [`NetworkProbe`] with per-host scripted answers,
//! so the scanner and connection manager can be exercised deterministically.
//!
//! # Features
//!
//! - **Scripted hosts**: liveness, open ports, hostname, MAC and HTTP metadata
//! - **Handshake injection**: per-host success/failure, switchable at runtime
//! - **Latency simulation**: delay handshakes to keep attempts in flight
//! - **Call accounting**: count and log every handshake, track ping concurrency

use async_trait::async_trait;
use hwagent_core::{DeviceMetadata, Protocol};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::probe::{Liveness, NetworkProbe};

/// Scripted behaviour of one host
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    pub alive: bool,
    pub latency: Option<Duration>,
    pub open_ports: Vec<u16>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub metadata: Option<DeviceMetadata>,
    pub handshake_ok: bool,
    pub handshake_delay: Duration,
}

impl MockHost {
    /// A host that answers liveness checks and has `ports` open
    pub fn alive(ports: &[u16]) -> Self {
        Self {
            alive: true,
            latency: Some(Duration::from_millis(1)),
            open_ports: ports.to_vec(),
            handshake_ok: true,
            ..Default::default()
        }
    }

    /// A host that ignores liveness checks
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    pub fn with_mac(mut self, mac: &str) -> Self {
        self.mac = Some(mac.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_handshake(mut self, ok: bool) -> Self {
        self.handshake_ok = ok;
        self
    }

    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }
}

/// A scripted [`NetworkProbe`]
#[derive(Debug, Default)]
pub struct MockProbe {
    hosts: RwLock<HashMap<IpAddr, MockHost>>,
    pings: AtomicU32,
    active_pings: AtomicU32,
    peak_pings: AtomicU32,
    handshakes: AtomicU32,
    handshake_log: Mutex<Vec<(IpAddr, Protocol, u16)>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a scripted host
    pub fn with_host(mut self, ip: IpAddr, host: MockHost) -> Self {
        self.hosts.get_mut().insert(ip, host);
        self
    }

    /// Replace a host's script at runtime
    pub async fn set_host(&self, ip: IpAddr, host: MockHost) {
        self.hosts.write().await.insert(ip, host);
    }

    /// Change whether handshakes with `ip` succeed
    pub async fn set_handshake(&self, ip: IpAddr, ok: bool) {
        if let Some(host) = self.hosts.write().await.get_mut(&ip) {
            host.handshake_ok = ok;
        }
    }

    /// Number of liveness checks so far
    pub fn ping_count(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    /// Most liveness checks observed running at the same time
    pub fn peak_concurrent_pings(&self) -> u32 {
        self.peak_pings.load(Ordering::SeqCst)
    }

    /// Number of handshakes started so far
    pub fn handshake_count(&self) -> u32 {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Every handshake started, in order
    pub async fn handshake_log(&self) -> Vec<(IpAddr, Protocol, u16)> {
        self.handshake_log.lock().await.clone()
    }

    async fn host(&self, ip: IpAddr) -> Option<MockHost> {
        self.hosts.read().await.get(&ip).cloned()
    }
}

#[async_trait]
impl NetworkProbe for MockProbe {
    async fn ping(&self, ip: IpAddr) -> Liveness {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let active = self.active_pings.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_pings.fetch_max(active, Ordering::SeqCst);
        // Let other probe tasks overlap with this one
        tokio::task::yield_now().await;
        self.active_pings.fetch_sub(1, Ordering::SeqCst);

        match self.host(ip).await {
            Some(host) if host.alive => Liveness::Alive {
                latency: host.latency,
            },
            _ => Liveness::Unreachable,
        }
    }

    async fn port_open(&self, ip: IpAddr, port: u16) -> bool {
        self.host(ip)
            .await
            .is_some_and(|h| h.alive && h.open_ports.contains(&port))
    }

    async fn hostname(&self, ip: IpAddr) -> Option<String> {
        self.host(ip).await.and_then(|h| h.hostname)
    }

    async fn mac_address(&self, ip: IpAddr) -> Option<String> {
        self.host(ip).await.and_then(|h| h.mac)
    }

    async fn http_info(&self, ip: IpAddr, _port: u16) -> Option<DeviceMetadata> {
        self.host(ip).await.and_then(|h| h.metadata)
    }

    async fn handshake(&self, ip: IpAddr, protocol: Protocol, port: u16) -> bool {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        self.handshake_log.lock().await.push((ip, protocol, port));

        let Some(host) = self.host(ip).await else {
            return false;
        };
        if !host.handshake_delay.is_zero() {
            tokio::time::sleep(host.handshake_delay).await;
        }
        // Re-read so a script change during the delay is honoured
        let ok = self.host(ip).await.is_some_and(|h| h.handshake_ok);
        ok && host.open_ports.contains(&port)
    }
}
