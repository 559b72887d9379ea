//! Status and administration endpoints: `/efficacy`, `/calibrate`, `/now`
//! and `/api/v1/mqtt/{family}`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use serde_json::json;

use pinpoint_store::schema::keys;

use crate::error::{success, ApiError};
use crate::state::AppState;

/// Family named in the query string, or the original single-tenant default.
fn family_from_query(params: &HashMap<String, String>) -> String {
    params
        .get("family")
        .map_or_else(|| "default".to_string(), |f| f.clone())
}

/// `GET /efficacy`: calibration statistics for a family.
pub async fn efficacy(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let store = state.open_store(&family_from_query(&params))?;
    let mut values = store.get_many(&[
        keys::ACCURACY_BREAKDOWN,
        keys::ALGORITHM_EFFICACY,
        keys::LAST_CALIBRATION_TIME,
    ])?;

    let efficacy = json!({
        "accuracy_breakdown": values.remove(keys::ACCURACY_BREAKDOWN).unwrap_or(json!({})),
        "confusion_metrics": values.remove(keys::ALGORITHM_EFFICACY).unwrap_or(json!({})),
        "last_calibration_time": values
            .remove(keys::LAST_CALIBRATION_TIME)
            .unwrap_or(serde_json::Value::Null),
    });
    Ok(success(json!({ "message": "got stats", "efficacy": efficacy })))
}

/// `GET /calibrate` (debug only): rebuild a family's model.
pub async fn calibrate(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let store = state.open_store(&family_from_query(&params))?;
    state.pipeline.calibrate(&store)?;
    Ok(success(json!({ "message": "calibrated data" })))
}

/// `GET /now`: current UTC epoch in milliseconds, plain text.
pub async fn now() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// `GET /api/v1/mqtt/{family}`: grant (or rotate) MQTT access for a family.
pub async fn mqtt(
    State(state): State<AppState>,
    Path(family): Path<String>,
) -> Result<Response, ApiError> {
    let family = pinpoint_core::normalize_name(&family);
    if family.is_empty() {
        return Err(ApiError::BadRequest("invalid family".to_string()));
    }
    let store = state.open_store(&family)?;
    let passphrase = pinpoint_engine::mqtt::add_family(&store)?;
    Ok(success(json!({
        "message": format!("Added '{family}' for mqtt. Your passphrase is '{passphrase}'"),
    })))
}
