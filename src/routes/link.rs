//! Connection lifecycle endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::routes::bad_request;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConnectBody {
    pub address: String,
}

/// `POST /connect {address}` — establish the link and warm up identity.
///
/// # Errors
///
/// `400` with the failure description (device not found, endpoints missing,
/// connection timeout).
pub async fn connect(
    State(state): State<AppState>,
    Json(body): Json<ConnectBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let address = body.address.trim();
    if address.len() < 2 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "address too short"})),
        ));
    }
    state
        .gateway
        .connect(address)
        .await
        .map_err(|e| bad_request(&e))?;
    Ok(Json(json!({
        "ok": true,
        "state": state.gateway.state_snapshot().await,
    })))
}

/// `POST /disconnect` — tear down the link. Always succeeds: state resets
/// immediately and the physical teardown finishes in the background.
pub async fn disconnect(State(state): State<AppState>) -> Json<Value> {
    state.gateway.disconnect().await;
    Json(json!({"ok": true}))
}
