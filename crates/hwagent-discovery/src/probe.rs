//! Host probing: liveness, concurrent port checks and best-effort enrichment

use async_trait::async_trait;
use futures::future::join_all;
use hwagent_core::device::normalize_ports;
use hwagent_core::{DeviceMetadata, HostResult, Protocol};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, trace};

/// Outcome of a reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Host answered; latency is absent when no reachability check could be run
    Alive { latency: Option<Duration> },
    Unreachable,
}

/// Narrow capability interface over the mechanisms that touch the network
///
/// Every method is infallible from the caller's point of view: timeouts,
/// refusals and missing tools all map to "closed", `false` or `None`.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Single reachability check
    async fn ping(&self, ip: IpAddr) -> Liveness;

    /// TCP connect check for one port
    async fn port_open(&self, ip: IpAddr, port: u16) -> bool;

    /// Reverse name lookup
    async fn hostname(&self, ip: IpAddr) -> Option<String>;

    /// Link-layer address from the local neighbor table
    async fn mac_address(&self, ip: IpAddr) -> Option<String>;

    /// Device metadata from an HTTP interface on `port`
    async fn http_info(&self, ip: IpAddr, port: u16) -> Option<DeviceMetadata>;

    /// One connection handshake using `protocol` on `port`
    async fn handshake(&self, ip: IpAddr, protocol: Protocol, port: u16) -> bool;
}

/// Probe one host
///
/// Returns `None` for hosts that fail the liveness check or have no open
/// port among `ports`. Enrichment lookups run concurrently and each may be
/// absent without affecting the result.
pub async fn probe_host(probe: &dyn NetworkProbe, ip: IpAddr, ports: &[u16]) -> Option<HostResult> {
    let latency = match probe.ping(ip).await {
        Liveness::Alive { latency } => latency,
        Liveness::Unreachable => {
            trace!(ip = %ip, "Host not responding");
            return None;
        }
    };

    debug!(ip = %ip, "Host is alive, scanning ports");

    let checks = ports.iter().map(|&port| async move {
        if probe.port_open(ip, port).await {
            Some(port)
        } else {
            None
        }
    });
    let open_ports = normalize_ports(join_all(checks).await.into_iter().flatten().collect());

    if open_ports.is_empty() {
        debug!(ip = %ip, "No open ports found");
        return None;
    }

    let http_port = [80, 8080].into_iter().find(|p| open_ports.contains(p));
    let (hostname, mac, metadata) = tokio::join!(
        probe.hostname(ip),
        probe.mac_address(ip),
        async {
            match http_port {
                Some(port) => probe.http_info(ip, port).await,
                None => None,
            }
        }
    );

    Some(HostResult {
        address: ip,
        hostname,
        mac,
        open_ports,
        metadata,
        latency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHost, MockProbe};
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn test_dead_host_yields_nothing() {
        let probe = MockProbe::new();
        assert!(probe_host(&probe, ip(1), &[80, 9100]).await.is_none());
    }

    #[tokio::test]
    async fn test_alive_host_without_open_ports_yields_nothing() {
        let probe = MockProbe::new().with_host(ip(1), MockHost::alive(&[]));
        assert!(probe_host(&probe, ip(1), &[80, 9100]).await.is_none());
    }

    #[tokio::test]
    async fn test_only_requested_ports_are_reported_sorted() {
        let probe = MockProbe::new().with_host(ip(1), MockHost::alive(&[9100, 22, 631]));
        let result = probe_host(&probe, ip(1), &[9100, 631, 80]).await.unwrap();
        assert_eq!(result.open_ports, vec![631, 9100]);
        assert!(result.metadata.is_none());
    }

    #[tokio::test]
    async fn test_enrichment_is_collected() {
        let metadata = DeviceMetadata {
            source: "http://10.0.0.1:80/".to_string(),
            manufacturer: Some("Canon".to_string()),
            ..Default::default()
        };
        let probe = MockProbe::new().with_host(
            ip(1),
            MockHost::alive(&[80])
                .with_hostname("canon-lobby")
                .with_mac("aa:bb:cc:00:11:22")
                .with_metadata(metadata.clone())
                .with_latency(Duration::from_millis(3)),
        );

        let result = probe_host(&probe, ip(1), &[80, 9100]).await.unwrap();
        assert_eq!(result.hostname.as_deref(), Some("canon-lobby"));
        assert_eq!(result.mac.as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(result.metadata, Some(metadata));
        assert_eq!(result.latency, Some(Duration::from_millis(3)));
    }

    #[tokio::test]
    async fn test_http_info_not_fetched_without_web_port() {
        let metadata = DeviceMetadata {
            source: "http://10.0.0.1:80/".to_string(),
            ..Default::default()
        };
        let probe = MockProbe::new().with_host(
            ip(1),
            MockHost::alive(&[9100]).with_metadata(metadata),
        );
        let result = probe_host(&probe, ip(1), &[80, 9100]).await.unwrap();
        assert!(result.metadata.is_none());
    }
}
