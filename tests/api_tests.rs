//! Router tests driven through `tower::ServiceExt::oneshot`

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::TestFleet;
use proxyfleet::api::ApiServer;
use proxyfleet::config::ApiServerConfig;

fn router(fleet: &TestFleet) -> Router {
    let config = ApiServerConfig {
        port: 0,
        host: "127.0.0.1".to_string(),
        cors_origins: Vec::new(),
    };
    ApiServer::new(config, fleet.engine.clone()).build_router()
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn server_body(id: i64) -> Value {
    json!({
        "id": id,
        "panel": { "vendor": "scripted", "url": format!("https://panel-{}.fleet.test:2053", id) },
        "region": "eu-west",
        "capacity": 10
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let fleet = TestFleet::new().await;
    let (status, body) = call(&router(&fleet), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_register_list_and_decommission_servers() {
    let fleet = TestFleet::new().await;
    let app = router(&fleet);

    let (status, body) = call(&app, Method::POST, "/api/servers", Some(server_body(7))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["id"], 7);

    let (status, body) = call(&app, Method::POST, "/api/servers", Some(server_body(7))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (_, body) = call(&app, Method::GET, "/api/servers", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = call(&app, Method::DELETE, "/api/servers/7", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::DELETE, "/api/servers/7", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_operation_envelopes() {
    let fleet = TestFleet::with_healthy_servers(2).await;
    let app = router(&fleet);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/subscribers/sub-1/load-balancing",
        Some(json!({
            "algorithm": "least_connections",
            "response_threshold_ms": 2000,
            "error_threshold": 5.0,
            "failover": true,
            "health_check": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["load_balancing"]["algorithm"], "least_connections");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/subscribers/sub-1/rotation",
        Some(json!({
            "trigger": "hybrid",
            "interval_secs": 300,
            "max_requests": 1000,
            "cooldown_secs": 60,
            "error_threshold": 5.0,
            "sticky_duration_secs": 600
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], 2);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/subscribers/sub-1/proxy",
        Some(json!({ "action": "assign" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["server_id"], 1);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/subscribers/sub-1/health-monitoring",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["servers"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        Method::GET,
        "/api/subscribers/sub-1/analytics?range=7d",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["range"], "7d");
}

#[tokio::test]
async fn test_errors_keep_status_and_envelope() {
    let fleet = TestFleet::new().await;
    let app = router(&fleet);

    let (status, body) = call(
        &app,
        Method::GET,
        "/api/subscribers/sub-1/analytics?range=2y",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/subscribers/sub-1/proxy",
        Some(json!({ "action": "assign" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/subscribers/sub-1/proxy",
        Some(json!({ "action": "rotate" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reported_requests_trigger_rotation() {
    let fleet = TestFleet::with_healthy_servers(2).await;
    let app = router(&fleet);

    call(
        &app,
        Method::POST,
        "/api/subscribers/sub-1/rotation",
        Some(json!({
            "trigger": "request_based",
            "interval_secs": 300,
            "max_requests": 2,
            "cooldown_secs": 60,
            "error_threshold": 50.0,
            "sticky_duration_secs": 600
        })),
    )
    .await;
    let assignment = fleet.engine.select_server("sub-1", None).await.unwrap();

    let report = json!({ "server_id": assignment.server_id, "latency_ms": 80, "success": true });
    let (_, body) = call(&app, Method::POST, "/api/subscribers/sub-1/requests", Some(report.clone())).await;
    assert_eq!(body["data"]["rotation"], Value::Null);

    let (status, body) = call(&app, Method::POST, "/api/subscribers/sub-1/requests", Some(report)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rotation"]["outcome"], "rotated");
}

#[tokio::test]
async fn test_status_reports_fleet_counts() {
    let fleet = TestFleet::with_healthy_servers(3).await;
    let (status, body) = call(&router(&fleet), Method::GET, "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fleet"]["status_counts"]["healthy"], 3);
    assert_eq!(body["data"]["fleet"]["servers"].as_array().unwrap().len(), 3);
}
