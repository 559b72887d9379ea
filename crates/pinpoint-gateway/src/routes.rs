//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{locate, passive, status, ws};
use crate::state::AppState;

/// Create the gateway router.
///
/// # Routes
///
/// - `POST /locate` - classify a self-reported fingerprint
/// - `POST /passive` - record a scanner report
/// - `POST /api/v1/settings/passive` - passive-path settings
/// - `GET /api/v1/mqtt/{family}` - grant MQTT access
/// - `GET /efficacy` - calibration statistics
/// - `GET /now` - server time, milliseconds
/// - `GET /ws` - WebSocket subscription
///
/// Debug only (gated on `config.debug`):
///
/// - `POST /learn` - persist a labeled fingerprint
/// - `GET /calibrate` - rebuild the model
pub fn create_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let mut router = Router::new()
        .route("/locate", post(locate::locate))
        .route("/passive", post(passive::passive))
        .route("/api/v1/settings/passive", post(passive::settings))
        .route("/api/v1/mqtt/{family}", get(status::mqtt))
        .route("/efficacy", get(status::efficacy))
        .route("/now", get(status::now))
        .route("/ws", get(ws::websocket));

    if state.config.debug {
        tracing::info!("debug mode on, learning and calibration endpoints enabled");
        router = router
            .route("/learn", post(locate::learn))
            .route("/calibrate", get(status::calibrate));
    }

    router
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// First-generation CORS contract: fixed headers on every response, and a
/// bare `"OK"` for preflight.
async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        "OK".into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_static("*"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static(
            "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization, X-Max",
        ),
    );
    headers.insert(
        "Access-Control-Allow-Credentials",
        HeaderValue::from_static("true"),
    );
    response
}
