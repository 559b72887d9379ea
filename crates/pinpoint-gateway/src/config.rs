//! Gateway configuration.
//!
//! One immutable record, loaded from the environment in `main` and passed
//! to `run`. No mutable module state.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the gateway service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "GatewayConfig::default_port")]
    pub port: u16,

    /// Directory holding the per-family SQLite databases.
    #[serde(default = "GatewayConfig::default_data_dir")]
    pub data_dir: PathBuf,

    /// Whether the learning and calibration endpoints are exposed.
    #[serde(default)]
    pub debug: bool,

    /// Whether predictions are also published over MQTT.
    #[serde(default)]
    pub use_mqtt: bool,

    /// MQTT broker host, used when `use_mqtt` is set.
    #[serde(default = "GatewayConfig::default_mqtt_host")]
    pub mqtt_host: String,

    /// MQTT broker port.
    #[serde(default = "GatewayConfig::default_mqtt_port")]
    pub mqtt_port: u16,

    /// Maximum request body size in bytes.
    #[serde(default = "GatewayConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl GatewayConfig {
    const fn default_port() -> u16 {
        8003
    }

    fn default_data_dir() -> PathBuf {
        PathBuf::from("./data")
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    const fn default_mqtt_port() -> u16 {
        1883
    }

    const fn default_max_body() -> usize {
        4 * 1024 * 1024
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: Self::default_port(),
            data_dir: Self::default_data_dir(),
            debug: false,
            use_mqtt: false,
            mqtt_host: Self::default_mqtt_host(),
            mqtt_port: Self::default_mqtt_port(),
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}
