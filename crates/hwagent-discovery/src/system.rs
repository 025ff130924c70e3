//! Probe implementation backed by the operating system and real sockets

use async_trait::async_trait;
use hwagent_core::{DeviceMetadata, Protocol};
use std::ffi::OsStr;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::arp::lookup_mac;
use crate::http::fetch_device_info;
use crate::probe::{Liveness, NetworkProbe};

/// Per-operation timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    pub liveness: Duration,
    pub port: Duration,
    /// Reverse lookup and HTTP metadata requests
    pub enrichment: Duration,
    /// Connection handshakes of every protocol
    pub handshake: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            liveness: Duration::from_millis(1000),
            port: Duration::from_millis(1000),
            enrichment: Duration::from_millis(5000),
            handshake: Duration::from_millis(5000),
        }
    }
}

/// Optional mechanisms, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// A `ping` executable is available
    pub ping: bool,
    /// An HTTP client could be built
    pub http: bool,
}

/// [`NetworkProbe`] using `ping`, TCP sockets, the resolver and HTTP
pub struct SystemProbe {
    timeouts: ProbeTimeouts,
    http: Option<reqwest::Client>,
    ping_available: bool,
}

impl SystemProbe {
    pub fn new(timeouts: ProbeTimeouts) -> Self {
        let http = match reqwest::Client::builder().timeout(timeouts.enrichment).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "HTTP client unavailable, HTTP enrichment and checks disabled");
                None
            }
        };

        let ping_available = is_ping_available();
        if !ping_available {
            warn!("ping not found, liveness checks disabled");
        }

        let probe = Self {
            timeouts,
            http,
            ping_available,
        };
        info!(capabilities = ?probe.capabilities(), "Network probe ready");
        probe
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            ping: self.ping_available,
            http: self.http.is_some(),
        }
    }

    async fn tcp_handshake(&self, ip: IpAddr, port: u16, limit: Duration) -> bool {
        match timeout(limit, TcpStream::connect(SocketAddr::new(ip, port))).await {
            Ok(Ok(mut stream)) => {
                let _ = stream.shutdown().await;
                true
            }
            Ok(Err(e)) => {
                trace!(ip = %ip, port = port, error = %e, "TCP connect failed");
                false
            }
            Err(_) => {
                trace!(ip = %ip, port = port, "TCP connect timed out");
                false
            }
        }
    }
}

#[async_trait]
impl NetworkProbe for SystemProbe {
    async fn ping(&self, ip: IpAddr) -> Liveness {
        if !self.ping_available {
            return Liveness::Alive { latency: None };
        }

        let wait_secs = self.timeouts.liveness.as_secs().max(1).to_string();
        let started = Instant::now();
        let result = timeout(
            self.timeouts.liveness + Duration::from_secs(1),
            tokio::process::Command::new("ping")
                .args(["-c", "1", "-W", &wait_secs, &ip.to_string()])
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => Liveness::Alive {
                latency: Some(started.elapsed()),
            },
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Ping failed");
                Liveness::Unreachable
            }
            _ => Liveness::Unreachable,
        }
    }

    async fn port_open(&self, ip: IpAddr, port: u16) -> bool {
        self.tcp_handshake(ip, port, self.timeouts.port).await
    }

    async fn hostname(&self, ip: IpAddr) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip).ok());
        match timeout(self.timeouts.enrichment, lookup).await {
            // The resolver echoes the address back when there is no PTR record
            Ok(Ok(Some(name))) if name != ip.to_string() => Some(name),
            _ => None,
        }
    }

    async fn mac_address(&self, ip: IpAddr) -> Option<String> {
        timeout(self.timeouts.enrichment, lookup_mac(ip))
            .await
            .ok()
            .flatten()
    }

    async fn http_info(&self, ip: IpAddr, port: u16) -> Option<DeviceMetadata> {
        let client = self.http.as_ref()?;
        fetch_device_info(client, ip, port).await
    }

    async fn handshake(&self, ip: IpAddr, protocol: Protocol, port: u16) -> bool {
        match protocol {
            Protocol::Http => {
                let Some(client) = self.http.as_ref() else {
                    return false;
                };
                let url = format!("http://{}/", SocketAddr::new(ip, port));
                match client.get(&url).timeout(self.timeouts.handshake).send().await {
                    Ok(response) => response.status().as_u16() < 400,
                    Err(e) => {
                        debug!(url = %url, error = %e, "HTTP check failed");
                        false
                    }
                }
            }
            // Raw, IPP and the rest only need a clean TCP open/close
            _ => self.tcp_handshake(ip, port, self.timeouts.handshake).await,
        }
    }
}

fn is_ping_available() -> bool {
    std::env::var_os("PATH").is_some_and(|path| find_in_path("ping", &path))
}

/// Whether `program` is a file in one of the `PATH`-style directories
fn find_in_path(program: &str, path: &OsStr) -> bool {
    std::env::split_paths(path).any(|dir| dir.join(program).is_file())
}
