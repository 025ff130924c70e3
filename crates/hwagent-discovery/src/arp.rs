//! Link-layer address lookup via the local neighbor (ARP) table

use std::net::IpAddr;
use tokio::process::Command;
use tracing::{debug, trace};

/// Neighbor table entry
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub ip: IpAddr,
    pub mac: String,
    pub interface: String,
    pub state: NeighborState,
}

/// Neighbor entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Unknown,
}

impl NeighborState {
    fn parse(s: &str) -> Self {
        const STATES: &[(&str, NeighborState)] = &[
            ("REACHABLE", NeighborState::Reachable),
            ("STALE", NeighborState::Stale),
            ("DELAY", NeighborState::Delay),
            ("PROBE", NeighborState::Probe),
            ("FAILED", NeighborState::Failed),
            ("INCOMPLETE", NeighborState::Incomplete),
            ("PERMANENT", NeighborState::Permanent),
        ];
        STATES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map_or(NeighborState::Unknown, |(_, state)| *state)
    }

    /// Whether the entry carries a usable link-layer address
    fn is_resolved(&self) -> bool {
        !matches!(self, NeighborState::Failed | NeighborState::Incomplete)
    }
}

/// Look up the link-layer address for an IP, upper-cased
///
/// Reads `ip neigh show` first and falls back to `arp -n`. Any failure
/// yields `None`; only hosts on the local subnet can be resolved.
pub async fn lookup_mac(ip: IpAddr) -> Option<String> {
    if let Some(entries) = neighbor_table().await {
        if let Some(entry) = entries
            .into_iter()
            .find(|e| e.ip == ip && e.state.is_resolved() && !e.mac.is_empty())
        {
            trace!(
                ip = %ip,
                mac = %entry.mac,
                interface = %entry.interface,
                state = ?entry.state,
                "Found MAC in neighbor table"
            );
            return Some(entry.mac.to_uppercase());
        }
    }

    let output = Command::new("arp")
        .args(["-n", &ip.to_string()])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        debug!(ip = %ip, "arp lookup failed");
        return None;
    }

    parse_arp_output(&String::from_utf8_lossy(&output.stdout), ip)
}

/// Read the kernel neighbor table
async fn neighbor_table() -> Option<Vec<NeighborEntry>> {
    let output = Command::new("ip").args(["neigh", "show"]).output().await.ok()?;

    if !output.status.success() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr),
            "ip neigh failed"
        );
        return None;
    }

    let entries: Vec<NeighborEntry> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(parse_ip_neigh_line)
        .collect();
    trace!(count = entries.len(), "Read neighbor table");
    Some(entries)
}

/// Parse one `ip neigh show` line
///
/// "10.1.2.3 dev eth0 lladdr 3c:2a:f4:01:02:03 REACHABLE"; entries that are
/// still resolving carry no `lladdr`.
fn parse_ip_neigh_line(line: &str) -> Option<NeighborEntry> {
    let mut tokens = line.split_whitespace();
    let ip: IpAddr = tokens.next()?.parse().ok()?;
    let rest: Vec<&str> = tokens.collect();

    let value_after = |key: &str| {
        rest.iter()
            .position(|t| *t == key)
            .and_then(|i| rest.get(i + 1))
            .copied()
    };

    let interface = value_after("dev")?.to_string();
    let mac = value_after("lladdr").unwrap_or_default().to_string();
    let state = rest
        .last()
        .map_or(NeighborState::Unknown, |s| NeighborState::parse(s));

    Some(NeighborEntry {
        ip,
        mac,
        interface,
        state,
    })
}

/// Extract a MAC from `arp -n <ip>` output
///
/// Handles both the net-tools table format and the BSD one-line format
/// ("? (192.168.1.1) at aa:bb:cc:dd:ee:ff on en0").
fn parse_arp_output(output: &str, ip: IpAddr) -> Option<String> {
    let ip = ip.to_string();
    output
        .lines()
        .filter(|line| {
            line.split_whitespace()
                .any(|w| w.trim_matches(|c| c == '(' || c == ')') == ip)
        })
        .flat_map(|line| line.split_whitespace())
        .find(|word| is_mac(word))
        .map(|mac| mac.to_uppercase())
}

fn is_mac(s: &str) -> bool {
    let octets: Vec<&str> = s.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}
