//! `/api/mcp/*` — introspection and control over the capability server
//! fleet `ToolRegistry` manages.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use renfield_tools::{ServerHealth, ToolDescriptor};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::GatewayError;

pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<HashMap<String, ServerHealth>> {
    Json(state.tools.server_health())
}

pub async fn tools_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ToolDescriptor>> {
    Json(state.tools.catalog().await)
}

/// POST /api/mcp/refresh — reconnects every manifest entry and rechecks
/// health, picking up servers added or edited since startup.
pub async fn refresh_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    state.tools.connect_from_manifest(&state.config.mcp.config_path).await?;
    Ok(Json(json!({"status": "refreshed"})))
}
