//! End-to-end tests over the full router: learn → calibrate → locate,
//! passive ingestion, settings, efficacy and the response envelope.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

use pinpoint_gateway::{build_state, create_router, GatewayConfig};

fn test_router(dir: &TempDir) -> Router {
    let config = GatewayConfig {
        data_dir: dir.path().to_path_buf(),
        debug: true,
        ..GatewayConfig::default()
    };
    create_router(build_state(config))
}

async fn send_json(router: &Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn send_get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn fingerprint(timestamp: i64, location: &str, rssi: f64) -> Value {
    json!({
        "timestamp": timestamp,
        "family": "home",
        "device": "phone",
        "location": location,
        "sensors": { "bluetooth": { "aa:bb": rssi } },
    })
}

#[tokio::test]
async fn learn_calibrate_locate_roundtrip() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    for (i, rssi) in [-40.0, -41.0, -39.0].iter().enumerate() {
        let (status, body) = send_json(
            &router,
            Method::POST,
            "/learn",
            fingerprint(i as i64 + 1, "kitchen", *rssi),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true, "{body}");
        assert_eq!(body["message"], "inserted data");
    }

    let (status, body) = send_get(&router, "/calibrate?family=home").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");

    let (status, body) =
        send_json(&router, Method::POST, "/locate", fingerprint(100, "", -40.0)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    let guesses = body["guesses"].as_array().unwrap();
    assert_eq!(guesses[0]["location"], "kitchen");
    assert!(guesses[0]["probability"].as_f64().unwrap() >= 0.5);
}

#[tokio::test]
async fn locate_without_model_fails_softly() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, body) =
        send_json(&router, Method::POST, "/locate", fingerprint(1, "", -40.0)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("no training data"));
}

#[tokio::test]
async fn passive_reports_inserted_count() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let scan = json!({
        "timestamp": 1,
        "family": "Home",
        "device": "s2",
        "sensors": { "bluetooth": { "aa:bb": -70.0, "cc:dd": -55.0 } },
    });
    let (status, body) = send_json(&router, Method::POST, "/passive", scan).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["message"], "inserted 2 fingerprints for home");
}

#[tokio::test]
async fn passive_settings_update_window() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let settings = json!({
        "family": "home",
        "device": "bluetooth-aa:bb",
        "location": "kitchen",
        "window": 30,
    });
    let (status, body) =
        send_json(&router, Method::POST, "/api/v1/settings/passive", settings).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("learning on 1 devices"));
    assert!(message.contains("30 seconds"));

    // Family is required.
    let (_, body) = send_json(
        &router,
        Method::POST,
        "/api/v1/settings/passive",
        json!({ "device": "x" }),
    )
    .await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn efficacy_returns_calibration_stats() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    for i in 0..3 {
        send_json(
            &router,
            Method::POST,
            "/learn",
            fingerprint(i + 1, "kitchen", -40.0),
        )
        .await;
    }
    send_get(&router, "/calibrate?family=home").await;

    let (status, body) = send_get(&router, "/efficacy?family=home").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    let efficacy = &body["efficacy"];
    assert!(efficacy["accuracy_breakdown"]["kitchen"].is_number());
    assert!(efficacy["confusion_metrics"]["naive_bayes"]["kitchen"].is_object());
    assert!(efficacy["last_calibration_time"].is_string());
}

#[tokio::test]
async fn now_returns_epoch_milliseconds() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let request = Request::builder().uri("/now").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let epoch_ms: i64 = std::str::from_utf8(&bytes).unwrap().parse().unwrap();
    assert!(epoch_ms > 1_500_000_000_000);
}

#[tokio::test]
async fn mqtt_endpoint_grants_passphrase() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, body) = send_get(&router, "/api/v1/mqtt/Home").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with("Added 'home' for mqtt. Your passphrase is '"));
}

#[tokio::test]
async fn options_preflight_answers_ok_with_cors() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/locate")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["Access-Control-Allow-Origin"], "*");
    assert_eq!(headers["Access-Control-Max-Age"], "86400");
    assert_eq!(headers["Access-Control-Allow-Credentials"], "true");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn malformed_body_answers_ok_with_success_false() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/locate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("problem binding data"));
}

#[tokio::test]
async fn cors_headers_present_on_every_response() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let request = Request::builder().uri("/now").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["Access-Control-Allow-Origin"], "*");
    assert_eq!(response.headers()["Access-Control-Allow-Methods"], "GET");
}
