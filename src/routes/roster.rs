//! Paginated fetch endpoints: message history and member roster.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn clamp_limit(query: &LimitQuery) -> usize {
    query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// `GET /messages?limit=` — the most recent `limit` history entries. Falls
/// back to the last good fetch on transient transport failure.
pub async fn messages(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    let messages = state.gateway.fetch_messages(clamp_limit(&query)).await;
    Json(json!({"messages": messages}))
}

/// `GET /members?limit=` — the highest `limit` roster entries by index.
pub async fn members(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    let members = state.gateway.fetch_members(clamp_limit(&query)).await;
    Json(json!({"members": members}))
}
