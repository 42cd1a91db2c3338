//! Liveness endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health` — liveness probe.
///
/// Returns the connection flag, whether the session gate is currently held
/// by an operation, uptime, and the full node state snapshot for the UI's
/// header bar.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let node = state.gateway.state_snapshot().await;
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "connected": node.connected,
        "busy": state.gateway.is_busy(),
        "state": node,
    }))
}
