//! Active-mode endpoints: `/locate` and `/learn`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde_json::json;

use pinpoint_core::SensorData;

use crate::error::{success, ApiError};
use crate::state::AppState;

/// `POST /locate`: classify a self-reported fingerprint and answer with the
/// guesses. The fingerprint and its prediction are persisted.
pub async fn locate(
    State(state): State<AppState>,
    body: Result<Json<SensorData>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(s) = body.map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let family = s.family.clone();
    let analysis = state.pipeline.locate(s)?;
    tracing::debug!(%family, guesses = analysis.guesses.len(), "located");
    Ok(success(json!({ "guesses": analysis.guesses })))
}

/// `POST /learn` (debug only): persist a labeled fingerprint without
/// triggering delivery.
pub async fn learn(
    State(state): State<AppState>,
    body: Result<Json<SensorData>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(s) = body.map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let family = s.family.clone();
    state.pipeline.process(s, true)?;
    tracing::debug!(%family, "learned fingerprint");
    Ok(success(json!({ "message": "inserted data" })))
}
