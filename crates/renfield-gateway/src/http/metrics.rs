//! GET /metrics — hand-rolled Prometheus text exposition. No metrics crate
//! in the dependency stack, so this writes the exposition format directly
//! rather than pull in a client library for a handful of gauges.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use std::fmt::Write as _;
use std::sync::Arc;

use renfield_tools::ServerHealth;

use crate::app::AppState;

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut body = String::new();

    let _ = writeln!(body, "# HELP renfield_tool_server_healthy Whether a capability server passed its last health check.");
    let _ = writeln!(body, "# TYPE renfield_tool_server_healthy gauge");
    for (server, health) in state.tools.server_health() {
        let value = if health == ServerHealth::Healthy { 1 } else { 0 };
        let _ = writeln!(body, "renfield_tool_server_healthy{{server=\"{server}\"}} {value}");
    }

    let _ = writeln!(body, "# HELP renfield_chat_connections_subscribed Number of `/ws` clients subscribed to the notification fan-out.");
    let _ = writeln!(body, "# TYPE renfield_chat_connections_subscribed gauge");
    let _ = writeln!(body, "renfield_chat_connections_subscribed {}", state.chat_connections.subscriber_count());

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
