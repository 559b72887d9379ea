//! Shared application state for the gateway.

use std::sync::Arc;

use pinpoint_engine::{DeliveryFanout, IngestPipeline, ReverseAggregator};
use pinpoint_store::FamilyStore;

use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::hub::WsHub;

/// State available to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration.
    pub config: GatewayConfig,
    /// The ingest pipeline (active path).
    pub pipeline: Arc<IngestPipeline>,
    /// The reverse aggregator (passive path).
    pub aggregator: Arc<ReverseAggregator>,
    /// The WebSocket hub connections subscribe to.
    pub hub: WsHub,
    /// The delivery fan-out, drained on shutdown.
    pub fanout: Arc<DeliveryFanout>,
}

impl AppState {
    /// Open a per-request store handle for a family.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_store(&self, family: &str) -> Result<FamilyStore, ApiError> {
        Ok(FamilyStore::open(&self.config.data_dir, family)?)
    }
}
