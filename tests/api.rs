//! API endpoint integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use futures::StreamExt;
use reva_voice::api::ApiServer;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

mod common;
use common::{keyed_config, test_config};

async fn get_json(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let router = ApiServer::new(test_config(&[])).router();
    let (status, json) = get_json(router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_capabilities_without_keys() {
    let router = ApiServer::new(test_config(&[])).router();
    let (status, json) = get_json(router, "/api/capabilities").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stt_available"], false);
    assert_eq!(json["tts_available"], false);
    assert_eq!(json["llm_available"], false);
    assert_eq!(json["llm_backend"], "openrouter");
    assert_eq!(json["llm_model"], "google/gemini-2.0-flash-lite-001");
    assert_eq!(json["voice_id"], "f8f5f1b2-f02d-4d8e-a40d-fd850a487b3d");
}

#[tokio::test]
async fn test_capabilities_with_keys() {
    let router = ApiServer::new(keyed_config()).router();
    let (_, json) = get_json(router, "/api/capabilities").await;

    assert_eq!(json["stt_available"], true);
    assert_eq!(json["tts_available"], true);
    assert_eq!(json["llm_available"], true);
}

#[cfg(feature = "mcp")]
#[tokio::test]
async fn test_capabilities_report_mcp_backend() {
    let config = test_config(&[("MCP_HTTP_URL", "http://localhost:8000/mcp")]);
    let (_, json) = get_json(ApiServer::new(config).router(), "/api/capabilities").await;

    assert_eq!(json["llm_backend"], "mcp");
    assert_eq!(json["mcp_available"], true);
    // Default endpoint is OpenRouter, which needs a key
    assert_eq!(json["llm_available"], false);

    let config = test_config(&[
        ("MCP_HTTP_URL", "http://localhost:8000/mcp"),
        ("REVA_LLM_BASE_URL", "http://localhost:11434/v1"),
    ]);
    let (_, json) = get_json(ApiServer::new(config).router(), "/api/capabilities").await;
    assert_eq!(json["llm_backend"], "mcp");
    assert_eq!(json["llm_available"], true);
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let router = ApiServer::new(keyed_config()).router();
    let response = router
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let router = ApiServer::new(test_config(&[])).router();
    let response = router
        .oneshot(Request::builder().uri("/offer").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ws_session_without_keys_reports_error_and_closes() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = ApiServer::new(test_config(&[])).router();
    tokio::spawn(async move { axum::serve(listener, router).await });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    let message = ws.next().await.unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
    assert_eq!(json["type"], "error");
    assert!(json["message"].as_str().unwrap().contains("API key required"));

    assert!(matches!(ws.next().await, Some(Ok(Message::Close(_))) | None));
}
