//! Configuration loading and validation

use anyhow::{Context, Result};
use hwagent_core::{ScanRange, Signatures};
use hwagent_discovery::ScannerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Environment variable overriding `discovery.range`
pub const ENV_SCAN_RANGE: &str = "HWAGENT_SCAN_RANGE";
/// Environment variable overriding `discovery.interval_secs`
pub const ENV_SCAN_INTERVAL: &str = "HWAGENT_SCAN_INTERVAL";
/// Environment variable providing the default log level
pub const ENV_LOG_LEVEL: &str = "HWAGENT_LOG_LEVEL";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Device type to expected port mapping
    #[serde(default)]
    pub signatures: Signatures,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Range to sweep in CIDR notation
    #[serde(default = "default_range")]
    pub range: String,
    /// Delay between sweeps in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Hosts probed concurrently
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_port_timeout")]
    pub port_timeout_ms: u64,
    /// Timeout for HTTP metadata requests and reverse lookups
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,
    /// Ports probed on every live host besides the signature ports
    #[serde(default = "default_common_ports")]
    pub common_ports: Vec<u16>,
    /// Evict devices unseen for this many seconds (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_max_age_secs: Option<u64>,
    /// Link-layer address allow-list, empty allows every device
    #[serde(default)]
    pub allowed_macs: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            range: default_range(),
            interval_secs: default_interval(),
            max_concurrent_probes: default_max_concurrent_probes(),
            liveness_timeout_ms: default_liveness_timeout(),
            port_timeout_ms: default_port_timeout(),
            http_timeout_ms: default_http_timeout(),
            common_ports: default_common_ports(),
            eviction_max_age_secs: None,
            allowed_macs: Vec::new(),
        }
    }
}

fn default_range() -> String {
    "192.168.1.0/24".to_string()
}

fn default_interval() -> u64 {
    5
}

fn default_max_concurrent_probes() -> usize {
    50
}

fn default_liveness_timeout() -> u64 {
    1000
}

fn default_port_timeout() -> u64 {
    1000
}

fn default_http_timeout() -> u64 {
    5000
}

fn default_common_ports() -> Vec<u16> {
    vec![22, 23, 53, 80, 443, 515, 631, 8080, 8443, 9100]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connect to devices as soon as they are discovered
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    /// Per-handshake timeout
    #[serde(default = "default_connect_timeout")]
    pub timeout_ms: u64,
    /// Consecutive failures before auto-connect gives up on a device
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            timeout_ms: default_connect_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

impl Config {
    /// Apply `HWAGENT_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(range) = lookup(ENV_SCAN_RANGE) {
            info!(range = %range, "Scan range overridden from environment");
            self.discovery.range = range;
        }
        if let Some(interval) = lookup(ENV_SCAN_INTERVAL) {
            self.discovery.interval_secs = interval
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value '{}'", ENV_SCAN_INTERVAL, interval))?;
            info!(interval_secs = self.discovery.interval_secs, "Scan interval overridden from environment");
        }
        Ok(())
    }

    /// Check values that would otherwise only fail once scanning starts
    pub fn validate(&self) -> Result<ScanRange> {
        let range = self
            .discovery
            .range
            .parse::<ScanRange>()
            .with_context(|| format!("Invalid discovery.range '{}'", self.discovery.range))?;
        if self.discovery.max_concurrent_probes == 0 {
            anyhow::bail!("discovery.max_concurrent_probes must be at least 1");
        }
        Ok(range)
    }

    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            range: self.discovery.range.clone(),
            interval_secs: self.discovery.interval_secs,
            max_concurrent_probes: self.discovery.max_concurrent_probes,
            liveness_timeout_ms: self.discovery.liveness_timeout_ms,
            port_timeout_ms: self.discovery.port_timeout_ms,
            http_timeout_ms: self.discovery.http_timeout_ms,
            connect_timeout_ms: self.connection.timeout_ms,
            max_attempts: self.connection.max_attempts,
            auto_connect: self.connection.auto_connect,
            common_ports: self.discovery.common_ports.clone(),
            signatures: self.signatures.clone(),
            allowed_macs: self.discovery.allowed_macs.clone(),
            eviction_max_age_secs: self.discovery.eviction_max_age_secs,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
