//! Pinpoint gateway - HTTP/WebSocket facade for the indoor-localization
//! service.
//!
//! # Environment Variables
//!
//! - `PINPOINT_PORT` - listen port (default: 8003)
//! - `PINPOINT_DATA` - data directory for family databases (default: ./data)
//! - `PINPOINT_DEBUG` - expose `/learn` and `/calibrate` when `true`
//! - `PINPOINT_MQTT` - publish predictions over MQTT when `true`
//! - `MQTT_HOST` / `MQTT_PORT` - broker address when MQTT is enabled
//! - `RUST_LOG` - tracing filter (default: `info,pinpoint=debug`)

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinpoint_gateway::GatewayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pinpoint=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting pinpoint gateway");

    let config = config_from_env()?;
    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        debug = config.debug,
        use_mqtt = config.use_mqtt,
        "configuration loaded"
    );

    pinpoint_gateway::run(config).await
}

fn config_from_env() -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut config = GatewayConfig::default();
    if let Ok(port) = std::env::var("PINPOINT_PORT") {
        config.port = port.parse()?;
    }
    if let Ok(data_dir) = std::env::var("PINPOINT_DATA") {
        config.data_dir = PathBuf::from(data_dir);
    }
    config.debug = env_flag("PINPOINT_DEBUG");
    config.use_mqtt = env_flag("PINPOINT_MQTT");
    if let Ok(host) = std::env::var("MQTT_HOST") {
        config.mqtt_host = host;
    }
    if let Ok(port) = std::env::var("MQTT_PORT") {
        config.mqtt_port = port.parse()?;
    }
    Ok(config)
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
