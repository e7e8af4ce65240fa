use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the relay router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Live sessions, same origin as the HTTP server
        .route("/", get(handlers::live_socket))
        .route("/live", get(handlers::live_socket))
        // Health check
        .route("/health", get(handlers::health_check))
        // Session queries
        .route("/sessions", get(handlers::list_sessions))
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
