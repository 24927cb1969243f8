//! Configuration loading for the lymph runtime.
//!
//! This crate provides configuration loading with minimal dependencies,
//! designed to be imported by every lymph crate without causing circular
//! dependency issues.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): things that physically cannot change
//!   at runtime - bind address/port, pre-bound socket descriptors, log level.
//!
//! - **Bootstrap** (`BootstrapConfig`): initial values that seed runtime
//!   state (retry policy, heartbeat interval, backend selection). After
//!   startup, the running container is the source of truth.
//!
//! # Usage
//!
//! ```rust,no_run
//! use lymph_config::LymphConfig;
//!
//! let config = LymphConfig::load().expect("failed to load config");
//! println!("binding on {}:{}", config.infra.node.ip, config.infra.node.port);
//! println!("retry timeout: {}s", config.bootstrap.retry.timeout_secs);
//! ```
//!
//! # Config file locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/lymph/config.toml` (system)
//! 2. `~/.config/lymph/config.toml` (user)
//! 3. `./lymph.toml` (local override)
//! 4. Environment variables (`LYMPH_*`, plus `LYMPH_NODE` / `LYMPH_SHARED_SOCKET_FDS`)

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BackendsConfig, BootstrapConfig, HeartbeatDefaults, RetryDefaults};
pub use infra::{InfraConfig, NodeConfig, SharedSocketConfig, TelemetryConfig};
pub use loader::ConfigSources;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete lymph runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LymphConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl LymphConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins): compiled defaults, `/etc/lymph/config.toml`,
    /// `~/.config/lymph/config.toml`, `./lymph.toml`, environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about where values came from.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = LymphConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LymphConfig::default();
        assert_eq!(config.infra.node.ip, "127.0.0.1");
        assert_eq!(config.infra.node.port, 0);
        assert_eq!(config.bootstrap.retry.backoff, 2.0);
    }

    #[test]
    fn test_load_defaults() {
        let config = LymphConfig::load().unwrap();
        assert_eq!(config.infra.node.ip, "127.0.0.1");
    }

    #[test]
    fn test_env_override_node() {
        std::env::set_var("LYMPH_NODE", "tcp://10.1.2.3:4000");
        let config = LymphConfig::load().unwrap();
        assert_eq!(
            config.infra.node.node_endpoint.as_deref(),
            Some("tcp://10.1.2.3:4000")
        );
        std::env::remove_var("LYMPH_NODE");
    }
}
