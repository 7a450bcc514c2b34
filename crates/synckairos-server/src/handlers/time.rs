//! `GET /v1/time` — server clock for client alignment. Clients derive
//! display time from server timestamps rather than counting locally.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn server_time(State(state): State<AppState>) -> Json<Value> {
    let now = state.service.clock().now();
    Json(json!({
        "server_time": now.to_rfc3339(),
        "timestamp_ms": now.timestamp_millis(),
    }))
}
