//! Health and capability endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::ApiState;
use crate::bot::{MCP_AVAILABLE, llm_available, select_llm_backend};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// What a voice session would be able to do with the current configuration
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub stt_available: bool,
    pub tts_available: bool,
    /// Credentials present for the selected backend
    pub llm_available: bool,
    /// Backend new sessions will use (`mcp` or `openrouter`)
    pub llm_backend: &'static str,
    pub llm_model: String,
    pub mcp_available: bool,
    pub voice_id: String,
}

fn has_key(key: Option<&SecretString>) -> bool {
    key.is_some_and(|k| !k.expose_secret().is_empty())
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn capabilities(State(state): State<Arc<ApiState>>) -> Json<CapabilitiesResponse> {
    let config = &state.config;
    let backend = select_llm_backend(config.mcp_url.as_deref(), MCP_AVAILABLE);

    Json(CapabilitiesResponse {
        stt_available: has_key(config.api_keys.deepgram.as_ref()),
        tts_available: has_key(config.api_keys.cartesia.as_ref()),
        llm_available: llm_available(config, &backend),
        llm_backend: backend.name(),
        llm_model: config.llm.model.clone(),
        mcp_available: MCP_AVAILABLE,
        voice_id: config.tts.voice_id.clone(),
    })
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/capabilities", get(capabilities))
        .with_state(state)
}
