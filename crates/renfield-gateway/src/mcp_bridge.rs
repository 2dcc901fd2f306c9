//! `mcp-bridge` CLI subcommand: a JSON-RPC 2.0 stdio loop exposing the Tool
//! Registry's own health/introspection data, so an operator's script can
//! inspect capability-server state without hitting the HTTP API. Same
//! request/response framing the Tool Registry's stdio transport speaks to
//! external capability servers, run in the opposite direction here.

use std::sync::Arc;
use std::time::Duration;

use renfield_core::circuit_breaker::CircuitBreaker;
use renfield_core::clock::SystemClock;
use renfield_core::config::RenfieldConfig;
use renfield_tools::registry::ToolRegistry;
use serde_json::{json, Value};

/// Run the mcp-bridge stdio loop. Blocks until stdin is closed.
pub fn run(config: &RenfieldConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let registry = runtime.block_on(build_registry(config))?;
    let manifest_path = config.mcp.config_path.clone();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    let mut reader = std::io::BufReader::new(stdin.lock());
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = std::io::BufRead::read_line(&mut reader, &mut line)?;
        if bytes_read == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                write_response(&stdout, json!(null), Some(json!({"code": -32700, "message": format!("Parse error: {e}")})), None)?;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(json!(null));
        let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let is_notification = request.get("id").is_none();

        match method {
            "initialize" => {
                write_response(
                    &stdout,
                    id,
                    None,
                    Some(json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "renfield-mcp-bridge", "version": env!("CARGO_PKG_VERSION")}
                    })),
                )?;
            }
            "notifications/initialized" => {}
            "tools/list" => {
                write_response(&stdout, id, None, Some(json!({"tools": tool_definitions()})))?;
            }
            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(json!({}));
                let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let result = runtime.block_on(execute_tool(&registry, tool_name, &manifest_path));
                match result {
                    Ok(content) => {
                        write_response(&stdout, id, None, Some(json!({"content": [{"type": "text", "text": content}], "isError": false})))?;
                    }
                    Err(err_msg) => {
                        write_response(&stdout, id, None, Some(json!({"content": [{"type": "text", "text": err_msg}], "isError": true})))?;
                    }
                }
            }
            _ => {
                if !is_notification {
                    write_response(&stdout, id, Some(json!({"code": -32601, "message": format!("Method not found: {method}")})), None)?;
                }
            }
        }
    }

    Ok(())
}

async fn build_registry(config: &RenfieldConfig) -> anyhow::Result<Arc<ToolRegistry>> {
    let breaker = Arc::new(CircuitBreaker::new(Box::new(SystemClock)));
    let registry = Arc::new(ToolRegistry::new(
        breaker,
        Duration::from_secs(config.mcp.call_timeout_secs),
        config.mcp.max_response_size,
        true,
    ));
    registry.connect_from_manifest(&config.mcp.config_path).await?;
    Ok(registry)
}

async fn execute_tool(registry: &Arc<ToolRegistry>, name: &str, manifest_path: &str) -> Result<String, String> {
    match name {
        "mcp_status" => {
            let health = registry.server_health();
            serde_json::to_string_pretty(&health).map_err(|e| e.to_string())
        }
        "mcp_tools" => {
            let catalog = registry.catalog().await;
            serde_json::to_string_pretty(&catalog).map_err(|e| e.to_string())
        }
        "mcp_refresh" => match registry.connect_from_manifest(manifest_path).await {
            Ok(()) => Ok("refreshed".to_string()),
            Err(e) => Err(e.to_string()),
        },
        other => Err(format!("Unknown tool: {other}")),
    }
}

fn write_response(stdout: &std::io::Stdout, id: Value, error: Option<Value>, result: Option<Value>) -> std::io::Result<()> {
    use std::io::Write;

    let response = if let Some(err) = error {
        json!({"jsonrpc": "2.0", "id": id, "error": err})
    } else {
        json!({"jsonrpc": "2.0", "id": id, "result": result.unwrap_or(json!(null))})
    };

    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &response)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "mcp_status",
            "description": "Return capability-server health for every configured server.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "mcp_tools",
            "description": "Return the full tool catalog discovered across capability servers.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "mcp_refresh",
            "description": "Reconnect every manifest entry and rediscover its tools.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
    ]
}
