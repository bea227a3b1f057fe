//! Configuration module
//!
//! TOML-backed application configuration with serde defaults, so a partial
//! (or missing) file yields a fully usable config. The file location is
//! `~/.config/ocpp-csms/config.toml`, overridable via `OCPP_CONFIG`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How to treat a new connection for a charge point that already has a
/// live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateConnectionStrategy {
    /// Close the existing session and admit the new connection.
    Replace,
    /// Refuse the new connection, keep the existing session.
    Reject,
    /// Admit the new connection alongside the old entry. Unsafe; the new
    /// session overwrites the registry slot.
    Duplicate,
}

// ── Section structs ────────────────────────────────────────────

/// WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Grace period for in-flight work during shutdown, seconds.
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            shutdown_timeout: 30,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Protocol engine settings. All timeouts and intervals are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcppConfig {
    /// How long an unverified session may stay connected before it is
    /// force-closed waiting for BootNotification.
    pub boot_notification_timeout: u64,
    /// How long a business hook may take to answer before the protocol
    /// default response is used.
    pub business_event_timeout: u64,
    /// How long to wait for a charge point to answer an outbound Call.
    pub command_response_timeout: u64,
    /// Heartbeat interval handed to stations in BootNotificationResponse.
    pub heartbeat_interval: u32,
    pub max_concurrent_connections: usize,
    /// How long a disconnected session stays resumable.
    pub session_state_retention: u64,
    /// Sessions with no traffic for this long are closed by the sweep.
    pub session_inactivity_timeout: u64,
    pub session_cleanup_interval: u64,
    pub call_cleanup_interval: u64,
    /// Structural validation of inbound frames beyond the array shape.
    pub schema_validation: bool,
    pub duplicate_connection_strategy: DuplicateConnectionStrategy,
    /// Subprotocols offered during the WebSocket handshake, most
    /// preferred first.
    pub supported_protocols: Vec<String>,
    /// Protocol assumed when a station offers no subprotocol at all.
    pub default_protocol: String,
}

impl Default for OcppConfig {
    fn default() -> Self {
        Self {
            boot_notification_timeout: 60,
            business_event_timeout: 30,
            command_response_timeout: 60,
            heartbeat_interval: 300,
            max_concurrent_connections: 10_000,
            session_state_retention: 600,
            session_inactivity_timeout: 1800,
            session_cleanup_interval: 60,
            call_cleanup_interval: 30,
            schema_validation: true,
            duplicate_connection_strategy: DuplicateConnectionStrategy::Replace,
            supported_protocols: vec!["ocpp1.6".to_string(), "ocpp1.5".to_string()],
            default_protocol: "ocpp1.6".to_string(),
        }
    }
}

impl OcppConfig {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_notification_timeout)
    }

    pub fn business_timeout(&self) -> Duration {
        Duration::from_secs(self.business_event_timeout)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_response_timeout)
    }

    pub fn state_retention(&self) -> Duration {
        Duration::from_secs(self.session_state_retention)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.session_inactivity_timeout)
    }

    pub fn session_cleanup_period(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_interval)
    }

    pub fn call_cleanup_period(&self) -> Duration {
        Duration::from_secs(self.call_cleanup_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

impl MetricsConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── AppConfig ──────────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ocpp: OcppConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

/// Default config file location: `~/.config/ocpp-csms/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-csms")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.ocpp.boot_notification_timeout, 60);
        assert_eq!(cfg.ocpp.max_concurrent_connections, 10_000);
        assert_eq!(
            cfg.ocpp.duplicate_connection_strategy,
            DuplicateConnectionStrategy::Replace
        );
        assert_eq!(cfg.ocpp.supported_protocols, vec!["ocpp1.6", "ocpp1.5"]);
        assert!(cfg.ocpp.schema_validation);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 8443

            [ocpp]
            duplicate_connection_strategy = "reject"
            session_state_retention = 120
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8443);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(
            cfg.ocpp.duplicate_connection_strategy,
            DuplicateConnectionStrategy::Reject
        );
        assert_eq!(cfg.ocpp.state_retention(), Duration::from_secs(120));
        assert_eq!(cfg.ocpp.command_response_timeout, 60);
    }

    #[test]
    fn address_formatting() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.address(), "0.0.0.0:9000");
    }
}
