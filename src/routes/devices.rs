//! Device discovery endpoint.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct DevicesQuery {
    /// Scan budget in seconds, clamped to 1–12.
    pub timeout: Option<f64>,
}

/// Resolve the scan budget. Non-finite values (`?timeout=nan`, `inf`)
/// deserialize fine but would panic `Duration::from_secs_f64`, so they fall
/// back to the default before clamping.
fn scan_timeout(query: &DevicesQuery) -> f64 {
    query
        .timeout
        .filter(|t| t.is_finite())
        .unwrap_or(4.0)
        .clamp(1.0, 12.0)
}

/// `GET /devices?timeout=` — run discovery bursts and list candidates,
/// strongest signal first. Never fails; an empty list is a valid result.
pub async fn devices(
    State(state): State<AppState>,
    Query(query): Query<DevicesQuery>,
) -> Json<Value> {
    let devices = state
        .gateway
        .scan(Duration::from_secs_f64(scan_timeout(&query)))
        .await;
    Json(json!({"devices": devices}))
}
