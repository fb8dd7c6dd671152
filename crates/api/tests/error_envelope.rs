// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the error normalization pipeline

use api::{
    ApiError, Environment, Server, ServerConfig, ServerState, ShutdownConfig,
};
use axum::{
    Router,
    body::Bytes,
    http::StatusCode,
    routing::{get, post},
};

async fn teapot_handler() -> ApiError {
    ApiError::new(StatusCode::IM_A_TEAPOT, "teapot")
}

async fn broken_handler() -> ApiError {
    ApiError::from(anyhow::anyhow!("ledger backend unreachable"))
}

async fn echo_handler(body: Bytes) -> String {
    body.len().to_string()
}

/// Routes standing in for business handlers in these tests
fn failing_routes() -> Router<ServerState> {
    Router::new()
        .route("/v1/teapot", get(teapot_handler))
        .route("/v1/broken", get(broken_handler))
        .route("/v1/echo", post(echo_handler))
}

fn production_config() -> ServerConfig {
    let mut config = ServerConfig::for_testing();
    config.environment = Environment::Production;
    config
}

#[tokio::test]
async fn unmatched_route_yields_404_with_path_and_method() {
    let (addr, _lifecycle) = Server::new(ServerConfig::for_testing(), ShutdownConfig::default())
        .run_for_testing()
        .await
        .expect("Failed to start test server");

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/accounts"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: serde_json::Value = response.json().await.expect("body is JSON");
    assert_eq!(body["error"]["status"], 404);
    assert_eq!(body["error"]["message"], "Route /api/v1/accounts not found");
    assert_eq!(body["path"], "/api/v1/accounts");
    assert_eq!(body["method"], "GET");
}

#[tokio::test]
async fn verbose_environment_exposes_detail() {
    let (addr, _lifecycle) = Server::with_routes(
        ServerConfig::for_testing(),
        ShutdownConfig::default(),
        failing_routes(),
    )
    .run_for_testing()
    .await
    .expect("Failed to start test server");

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/v1/teapot"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);

    let body: serde_json::Value = response.json().await.expect("body is JSON");
    assert_eq!(body["error"]["status"], 418);
    assert_eq!(body["error"]["message"], "teapot");
    assert!(body["error"]["detail"].is_string());
}

#[tokio::test]
async fn production_environment_never_exposes_detail() {
    let (addr, _lifecycle) = Server::with_routes(
        production_config(),
        ShutdownConfig::default(),
        failing_routes(),
    )
    .run_for_testing()
    .await
    .expect("Failed to start test server");

    let client = reqwest::Client::new();

    // Both client- and server-class failures stay redacted
    for (path, status, message) in [
        ("/v1/teapot", StatusCode::IM_A_TEAPOT, "teapot"),
        (
            "/v1/broken",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
        ),
    ] {
        let response = client
            .get(format!("http://{addr}{path}"))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), status);

        let body: serde_json::Value = response.json().await.expect("body is JSON");
        assert_eq!(body["error"]["message"], message);
        assert!(
            body["error"].get("detail").is_none(),
            "detail leaked for {path}"
        );
    }
}

#[tokio::test]
async fn internal_failure_defaults_to_500_envelope() {
    let (addr, _lifecycle) = Server::with_routes(
        ServerConfig::for_testing(),
        ShutdownConfig::default(),
        failing_routes(),
    )
    .run_for_testing()
    .await
    .expect("Failed to start test server");

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/v1/broken"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: serde_json::Value = response.json().await.expect("body is JSON");
    assert_eq!(body["error"]["status"], 500);
    assert_eq!(body["error"]["message"], "Internal Server Error");
    // Verbose environment: the underlying cause is visible server-side and here
    assert!(
        body["error"]["detail"]
            .as_str()
            .is_some_and(|d| d.contains("unreachable"))
    );
}

#[tokio::test]
async fn oversized_payload_is_rejected_before_handlers() {
    let (addr, _lifecycle) = Server::with_routes(
        ServerConfig::for_testing(),
        ShutdownConfig::default(),
        failing_routes(),
    )
    .run_for_testing()
    .await
    .expect("Failed to start test server");

    let client = reqwest::Client::new();

    // One byte over the 10 MiB bound
    let oversized = vec![0_u8; api::MAX_BODY_BYTES + 1];
    let response = client
        .post(format!("http://{addr}/v1/echo"))
        .body(oversized)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // A payload within the bound reaches the handler
    let response = client
        .post(format!("http://{addr}/v1/echo"))
        .body(vec![0_u8; 1024])
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.expect("body"), "1024");
}
