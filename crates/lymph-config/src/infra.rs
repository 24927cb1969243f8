//! Infrastructure configuration - cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Node binding configuration: where the RPC transport listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub ip: String,
    /// 0 means pick a random port in the ephemeral range.
    pub port: u16,
    /// Explicit `tcp://ip:port` endpoint, overrides `ip`/`port` when set.
    #[serde(default)]
    pub node_endpoint: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 0,
            node_endpoint: None,
        }
    }
}

/// Pre-bound listening socket descriptors, keyed by port.
///
/// Populated from `LYMPH_SHARED_SOCKET_FDS` so a supervisor process can hand
/// off already-bound sockets across a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedSocketConfig {
    pub fds: std::collections::HashMap<u16, i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// PUB endpoint the monitor publishes `[b"stats", payload]` to, if any.
    #[serde(default)]
    pub monitor_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            monitor_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub shared_sockets: SharedSocketConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
