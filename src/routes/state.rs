//! State and log snapshot endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /state` — node state plus the protocol log ring, newest line first.
pub async fn state(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "state": app.gateway.state_snapshot().await,
        "logs": app.gateway.logs_snapshot().await,
    }))
}
