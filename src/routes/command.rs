//! Raw command passthrough endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::routes::bad_request;
use crate::state::AppState;

/// Upper bound on a single command line; the node's receive buffer is small.
const MAX_COMMAND_LEN: usize = 512;

#[derive(Deserialize)]
pub struct CommandBody {
    pub command: String,
}

/// `POST /command {command}` — write one raw command. Known command heads
/// get their correlation profile; anything else is fire-and-forget.
///
/// # Errors
///
/// `400` with the failure description after the correlator exhausts its
/// attempt budget.
pub async fn command(
    State(state): State<AppState>,
    Json(body): Json<CommandBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let command = body.command.trim();
    if command.is_empty() || command.len() > MAX_COMMAND_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "command must be 1-512 characters"})),
        ));
    }
    let response = state
        .gateway
        .send_command(command)
        .await
        .map_err(|e| bad_request(&e))?;
    Ok(Json(json!({
        "ok": true,
        "response": if response.is_empty() { Value::Null } else { Value::String(response) },
    })))
}
