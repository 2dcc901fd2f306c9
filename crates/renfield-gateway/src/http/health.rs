//! GET /health — liveness probe.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tool_servers: Vec<Value> = state
        .tools
        .server_health()
        .into_iter()
        .map(|(name, health)| json!({"server": name, "status": health}))
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tool_servers": tool_servers,
    }))
}
