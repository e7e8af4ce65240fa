//! Live relay server
//!
//! Accepts client WebSocket connections and pairs each one with its own
//! provider session:
//! - GET / (or /live) - WebSocket upgrade into a Live session
//! - GET /health - Health check
//! - GET /sessions - Active sessions and their state

mod handlers;
mod registry;
mod routes;
mod session;
mod state;

pub use registry::{SessionCounters, SessionGuard, SessionRegistry, SessionState, SessionSummary};
pub use routes::create_router;
pub use session::{run_session, PendingInput};
pub use state::{AppState, RelaySettings};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

/// Serve the relay on an already bound listener until the process stops
pub async fn serve_with_listener(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Live relay listening on {}", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("Relay server failed")
}

/// Bind `bind:port` and serve the relay
pub async fn serve(bind: &str, port: u16, state: AppState) -> Result<()> {
    let listener = TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", bind, port))?;

    serve_with_listener(listener, state).await
}
