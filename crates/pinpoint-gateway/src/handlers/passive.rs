//! Passive-mode endpoints: `/passive` and `/api/v1/settings/passive`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde_json::json;

use pinpoint_core::SensorData;
use pinpoint_engine::ReverseSettings;

use crate::error::{success, ApiError};
use crate::state::AppState;

/// `POST /passive`: record one scanner report into the family's window.
///
/// A detached flush follows each record; it transposes the window into
/// synthetic fingerprints once the time block has expired.
pub async fn passive(
    State(state): State<AppState>,
    body: Result<Json<SensorData>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(s) = body.map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let family = pinpoint_core::normalize_name(&s.family);

    let count = state.aggregator.record(s).await?;

    let aggregator = state.aggregator.clone();
    let flush_family = family.clone();
    tokio::spawn(async move {
        match aggregator.flush(&flush_family).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(family = %flush_family, synthesized = n, "window flushed"),
            Err(e) => tracing::warn!(family = %flush_family, error = %e, "window flush failed"),
        }
    });

    Ok(success(json!({
        "message": format!("inserted {count} fingerprints for {family}"),
    })))
}

/// `POST /api/v1/settings/passive`: adjust a family's passive settings.
pub async fn settings(
    State(state): State<AppState>,
    body: Result<Json<ReverseSettings>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(settings) = body.map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if pinpoint_core::normalize_name(&settings.family).is_empty() {
        return Err(ApiError::BadRequest("family is required".to_string()));
    }
    let message = state.aggregator.update_settings(settings).await?;
    Ok(success(json!({ "message": message })))
}
