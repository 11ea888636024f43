//! cbdb-config - plugin process settings
//!
//! Operator mount configuration (hosts, credentials, certificates) is not loaded
//! here; it arrives at runtime as a raw map and is decoded by the adapter. This
//! crate only covers settings of the plugin process itself.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// Telemetry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines. Always on in production.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// Cluster connection settings shared by every mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Upper bound for the readiness wait after connecting.
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
}

fn default_readiness_timeout_ms() -> u64 {
    5_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: default_readiness_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }
}

/// Plugin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default = "default_plugin_name")]
    pub plugin_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

fn default_plugin_name() -> String {
    "couchbase-database-plugin".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugin_name: default_plugin_name(),
            app_env: default_app_env(),
            telemetry: TelemetryConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl PluginConfig {
    /// Layers defaults, `<dir>/default.toml`, `<dir>/<APP_ENV>.toml` and
    /// `CBDB_*` environment variables, later sources winning.
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let config: Self = Self::figment(config_dir, &env).extract()?;
        Ok(config)
    }

    fn figment(config_dir: &str, env: &str) -> Figment {
        Figment::from(Serialized::defaults(PluginConfig {
            app_env: env.to_string(),
            ..Default::default()
        }))
        .merge(Toml::file(format!("{}/default.toml", config_dir)))
        .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
        .merge(Env::prefixed("CBDB_").split("__"))
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// JSON logs are forced on in production.
    pub fn json_logs(&self) -> bool {
        self.telemetry.json || self.is_production()
    }
}
