//! HTTP/WebSocket facade for pinpoint.
//!
//! The gateway binds JSON bodies to domain types, dispatches them to the
//! analysis engine and answers in the fixed `{success, …}` envelope. It
//! also hosts the WebSocket hub that deliveries fan out through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use hub::WsHub;
pub use routes::create_router;
pub use state::AppState;

use std::sync::Arc;

use pinpoint_engine::{
    DeliveryFanout, IngestPipeline, MqttPublisher, NaiveBayes, PublishSink, ReverseAggregator,
};

/// Build the application state: hub, fan-out, pipeline and aggregator.
#[must_use]
pub fn build_state(config: GatewayConfig) -> AppState {
    let hub = WsHub::new();

    let mqtt: Option<Arc<dyn PublishSink>> = if config.use_mqtt {
        tracing::info!(host = %config.mqtt_host, port = config.mqtt_port, "mqtt enabled");
        Some(Arc::new(MqttPublisher::connect(
            &config.mqtt_host,
            config.mqtt_port,
        )))
    } else {
        None
    };

    let fanout = Arc::new(DeliveryFanout::new(Arc::new(hub.clone()), mqtt));
    let pipeline = Arc::new(IngestPipeline::new(
        config.data_dir.clone(),
        Arc::new(NaiveBayes),
        Arc::clone(&fanout),
    ));
    let aggregator = Arc::new(ReverseAggregator::new(Arc::clone(&pipeline)));

    AppState {
        config,
        pipeline,
        aggregator,
        hub,
        fanout,
    }
}

/// Run the gateway until shutdown, then drain pending deliveries.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr = format!("0.0.0.0:{}", config.port);
    let state = build_state(config);
    let fanout = Arc::clone(&state.fanout);
    let app = create_router(state);

    tracing::info!(%listen_addr, "running");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Detached deliveries drain before exit.
    fanout.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
