//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. Handlers translate
//! HTTP calls into [`crate::gateway::Gateway`] operations; any surfaced
//! gateway failure becomes a 400 with a structured error body, never a
//! crash.

pub mod command;
pub mod devices;
pub mod health;
pub mod link;
pub mod roster;
pub mod state;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::error::GatewayError;

/// Map a surfaced gateway failure to the uniform HTTP error body.
pub(crate) fn bad_request(err: &GatewayError) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()})))
}
