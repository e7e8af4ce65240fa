use super::registry::SessionSummary;
use super::session;
use super::state::AppState;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub upstream: String,
    pub upstream_configured: bool,
    pub active_sessions: usize,
}

/// GET / and GET /live
/// Upgrade to a Live voice session
pub async fn live_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_session(socket, state))
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            upstream: state.connector.name().to_string(),
            upstream_configured: state.connector.is_configured(),
            active_sessions: state.sessions.len(),
        }),
    )
}

/// GET /sessions
/// Active sessions and their relay state
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.snapshot())
}
