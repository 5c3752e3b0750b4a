//! Service Configuration
//!
//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `LUMEN_*` environment variables (nested keys split on `__`, e.g.
//! `LUMEN_MQTT__HOST`).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::types::{Error, Result};

pub const ENV_PREFIX: &str = "LUMEN_";
pub const DEFAULT_CONFIG_FILE: &str = "Lumen.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            mqtt: MqttConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Accepted `X-API-Key` values. Empty disables authentication.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_keys: Vec::new(),
            cors_origins: Vec::new(),
        }
    }
}

/// MQTT broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic namespace of the zigbee2mqtt gateway.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            base_topic: default_base_topic(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

/// Correlation bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Default wait for a command confirmation before giving up.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Bound on the in-memory event history.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "lumen-bridge".to_string()
}

fn default_base_topic() -> String {
    "zigbee2mqtt".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    1000
}

impl Config {
    /// Load configuration, layering the TOML file (if present) and
    /// environment variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        if config.bridge.event_capacity == 0 {
            return Err(Error::Config("bridge.event_capacity must be > 0".into()));
        }

        Ok(config)
    }
}
