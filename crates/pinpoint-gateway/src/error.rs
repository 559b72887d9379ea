//! API error type and the 200-OK response envelope.
//!
//! Every endpoint answers HTTP 200; clients inspect the `success` field.
//! This envelope is a compatibility requirement for first-generation
//! clients, so errors do not map onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use pinpoint_engine::EngineError;
use pinpoint_store::StoreError;

/// API error type that renders as `{success: false, message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body could not be bound.
    #[error("problem binding data: {0}")]
    BadRequest(String),

    /// Pipeline, aggregator or classifier failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        tracing::debug!(%message, "request failed");
        (
            StatusCode::OK,
            Json(json!({ "message": message, "success": false })),
        )
            .into_response()
    }
}

/// A successful envelope carrying extra fields.
pub fn success(mut fields: serde_json::Value) -> Response {
    if let Some(map) = fields.as_object_mut() {
        map.insert("success".to_string(), json!(true));
    }
    (StatusCode::OK, Json(fields)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn errors_render_as_ok_with_success_false() {
        let response = ApiError::BadRequest("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert!(value["message"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn success_envelope_adds_flag() {
        let response = success(json!({ "message": "inserted data" }));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["message"], "inserted data");
    }
}
