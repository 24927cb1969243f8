//! Config file discovery, loading, and environment variable overlay.

use crate::{BootstrapConfig, ConfigError, InfraConfig, LymphConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order).
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values.
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files
/// that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a caller-supplied override path.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/lymph/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("lymph/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("lymph.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<LymphConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<LymphConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut infra = InfraConfig::default();
    if let Some(node) = table.get("node").and_then(|v| v.as_table()) {
        if let Some(v) = node.get("ip").and_then(|v| v.as_str()) {
            infra.node.ip = v.to_string();
        }
        if let Some(v) = node.get("port").and_then(|v| v.as_integer()) {
            infra.node.port = v as u16;
        }
        if let Some(v) = node.get("node_endpoint").and_then(|v| v.as_str()) {
            infra.node.node_endpoint = Some(v.to_string());
        }
    }
    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
        if let Some(v) = telemetry.get("monitor_endpoint").and_then(|v| v.as_str()) {
            infra.telemetry.monitor_endpoint = Some(v.to_string());
        }
    }

    let mut bootstrap = BootstrapConfig::default();
    if let Some(retry) = table.get("retry").and_then(|v| v.as_table()) {
        if let Some(v) = retry.get("timeout_secs").and_then(|v| v.as_float()) {
            bootstrap.retry.timeout_secs = v;
        }
        if let Some(v) = retry.get("delay_secs").and_then(|v| v.as_float()) {
            bootstrap.retry.delay_secs = v;
        }
        if let Some(v) = retry.get("backoff").and_then(|v| v.as_float()) {
            bootstrap.retry.backoff = v;
        }
        if let Some(v) = retry.get("max_jitter_secs").and_then(|v| v.as_float()) {
            bootstrap.retry.max_jitter_secs = v;
        }
        if let Some(v) = retry.get("max_delay_secs").and_then(|v| v.as_float()) {
            bootstrap.retry.max_delay_secs = Some(v);
        }
    }
    if let Some(hb) = table.get("heartbeat").and_then(|v| v.as_table()) {
        if let Some(v) = hb.get("interval_secs").and_then(|v| v.as_float()) {
            bootstrap.heartbeat.interval_secs = v;
        }
        if let Some(v) = hb.get("timeout_secs").and_then(|v| v.as_float()) {
            bootstrap.heartbeat.timeout_secs = v;
        }
    }
    if let Some(backends) = table.get("backends").and_then(|v| v.as_table()) {
        if let Some(v) = backends.get("registry").and_then(|v| v.as_str()) {
            bootstrap.backends.registry = v.to_string();
        }
        if let Some(v) = backends.get("events").and_then(|v| v.as_str()) {
            bootstrap.backends.events = v.to_string();
        }
    }

    Ok(LymphConfig { infra, bootstrap })
}

/// Merge two configs, with `overlay` taking precedence field by field.
pub fn merge_configs(base: LymphConfig, overlay: LymphConfig) -> LymphConfig {
    let default = LymphConfig::default();
    LymphConfig {
        infra: InfraConfig {
            node: crate::infra::NodeConfig {
                ip: pick(overlay.infra.node.ip, base.infra.node.ip, default.infra.node.ip),
                port: if overlay.infra.node.port != default.infra.node.port {
                    overlay.infra.node.port
                } else {
                    base.infra.node.port
                },
                node_endpoint: overlay.infra.node.node_endpoint.or(base.infra.node.node_endpoint),
            },
            shared_sockets: if !overlay.infra.shared_sockets.fds.is_empty() {
                overlay.infra.shared_sockets
            } else {
                base.infra.shared_sockets
            },
            telemetry: crate::infra::TelemetryConfig {
                log_level: pick(
                    overlay.infra.telemetry.log_level,
                    base.infra.telemetry.log_level,
                    default.infra.telemetry.log_level,
                ),
                monitor_endpoint: overlay
                    .infra
                    .telemetry
                    .monitor_endpoint
                    .or(base.infra.telemetry.monitor_endpoint),
            },
        },
        bootstrap: overlay.bootstrap,
    }
}

fn pick(overlay: String, base: String, default: String) -> String {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Apply environment variable overrides to config, per the `LYMPH_*` contract.
pub fn apply_env_overrides(config: &mut LymphConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("LYMPH_NODE") {
        config.infra.node.node_endpoint = Some(v);
        sources.env_overrides.push("LYMPH_NODE".to_string());
    }
    if let Ok(v) = env::var("LYMPH_IP") {
        config.infra.node.ip = v;
        sources.env_overrides.push("LYMPH_IP".to_string());
    }
    if let Ok(v) = env::var("LYMPH_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.node.port = port;
            sources.env_overrides.push("LYMPH_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("LYMPH_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("LYMPH_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
    if let Ok(v) = env::var("LYMPH_SHARED_SOCKET_FDS") {
        match serde_json::from_str::<std::collections::HashMap<u16, i32>>(&v) {
            Ok(fds) => {
                config.infra.shared_sockets.fds = fds;
                sources.env_overrides.push("LYMPH_SHARED_SOCKET_FDS".to_string());
            }
            Err(e) => {
                tracing_shim_warn(&format!(
                    "LYMPH_SHARED_SOCKET_FDS is not valid JSON, ignoring: {e}"
                ));
            }
        }
    }
}

// `lymph-config` keeps its dependency surface minimal and does not pull in
// `tracing` directly; emit on stderr instead for this one malformed-env case.
fn tracing_shim_warn(msg: &str) {
    eprintln!("lymph-config: {msg}");
}

/// Expand `~` and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[node]
ip = "0.0.0.0"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.node.ip, "0.0.0.0");
        assert_eq!(config.infra.node.port, 0);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[node]
ip = "10.0.0.5"
port = 6000

[telemetry]
log_level = "debug"

[retry]
timeout_secs = 10.0
backoff = 3.0

[backends]
registry = "etcd"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.node.ip, "10.0.0.5");
        assert_eq!(config.infra.node.port, 6000);
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.bootstrap.retry.timeout_secs, 10.0);
        assert_eq!(config.bootstrap.retry.backoff, 3.0);
        assert_eq!(config.bootstrap.backends.registry, "etcd");
    }

    #[test]
    fn test_discover_config_files() {
        let _files = discover_config_files();
    }
}
