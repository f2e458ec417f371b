use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::session::{CloseReason, SessionInfo, SessionManager};
use crate::webrtc::signaling::OfferRequest;

/// Shared state of the HTTP signaling server
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.session_count().await,
    })
}

// ============================================================================
// Signaling
// ============================================================================

/// Answer an offer; the body is JSON whatever the declared content type
pub async fn offer(State(state): State<Arc<AppState>>, body: Bytes) -> Result<String> {
    let req: OfferRequest = serde_json::from_slice(&body)?;
    debug!(
        "Offer received ({} bytes, {} candidates)",
        req.offer.len(),
        req.candidates.len()
    );

    let normalization = state.sessions.config().web.answer_normalization;
    let call = state
        .sessions
        .negotiate(&req.offer, req.candidates, normalization)
        .await?;

    info!("HTTP offer answered, session {}", call.session_id);
    Ok(call.answer)
}

/// Connectivity-assist servers for browser clients
pub async fn stun_servers(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.sessions.config().webrtc.ice_server_urls())
}

// ============================================================================
// Sessions
// ============================================================================

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list_sessions().await)
}

#[derive(Debug, Serialize)]
pub struct SimpleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SimpleResponse>> {
    state
        .sessions
        .close_session(&id, CloseReason::Explicit)
        .await?;

    Ok(Json(SimpleResponse {
        success: true,
        message: Some("Session closed".to_string()),
    }))
}
