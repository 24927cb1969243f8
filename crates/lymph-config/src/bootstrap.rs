//! Bootstrap configuration - seeds runtime state, the runtime owns it after startup.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub timeout_secs: f64,
    pub delay_secs: f64,
    pub backoff: f64,
    pub max_jitter_secs: f64,
    #[serde(default)]
    pub max_delay_secs: Option<f64>,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 5.0,
            delay_secs: 0.1,
            backoff: 2.0,
            max_jitter_secs: 0.8,
            max_delay_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatDefaults {
    pub interval_secs: f64,
    pub timeout_secs: f64,
}

impl Default for HeartbeatDefaults {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            timeout_secs: 1.0,
        }
    }
}

/// Which pluggable backend a container should use for discovery/events.
///
/// `"memory"` is the only backend shipped in this crate; anything else names
/// a backend installed by the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendsConfig {
    pub registry: String,
    pub events: String,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            registry: "memory".to_string(),
            events: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub retry: RetryDefaults,
    #[serde(default)]
    pub heartbeat: HeartbeatDefaults,
    #[serde(default)]
    pub backends: BackendsConfig,
}
