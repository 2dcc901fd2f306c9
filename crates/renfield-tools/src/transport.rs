//! MCP wire transport (§6.3): JSON request/response framing over stdio or
//! HTTP streaming, each request/response pair carrying a matching id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{error, warn};

use crate::types::ToolDescriptor;

#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<(String, Value, String)>, String>;
    async fn call_tool(&self, name: &str, params: Value) -> Result<Value, String>;
}

/// stdio transport: one subprocess, a write mutex serializing requests onto
/// stdin, and a reader task dispatching responses by request id to waiters
/// held in a map (§9's stdio-multiplexing redesign note).
pub struct StdioTransport {
    stdin: AsyncMutex<tokio::process::ChildStdin>,
    waiters: Arc<DashMap<u64, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
    _child: AsyncMutex<Child>,
    _reader_task: tokio::task::JoinHandle<()>,
}

impl StdioTransport {
    pub async fn spawn(command: &[String], env: &HashMap<String, String>) -> Result<Self, String> {
        let (program, args) = command.split_first().ok_or_else(|| "empty command".to_string())?;
        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn failed: {e}"))?;

        let stdin = child.stdin.take().ok_or("no stdin handle")?;
        let stdout = child.stdout.take().ok_or("no stdout handle")?;

        let waiters: Arc<DashMap<u64, oneshot::Sender<Value>>> = Arc::new(DashMap::new());
        let reader_waiters = waiters.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let Ok(value) = serde_json::from_str::<Value>(&line) else {
                            warn!("mcp stdio: unparseable line, dropping");
                            continue;
                        };
                        let Some(id) = value.get("id").and_then(|v| v.as_u64()) else { continue };
                        if let Some((_, tx)) = reader_waiters.remove(&id) {
                            let _ = tx.send(value);
                        }
                    }
                    Ok(None) => break, // EOF: process exited.
                    Err(e) => {
                        error!(error = %e, "mcp stdio read error");
                        break;
                    }
                }
            }
            // Drain any in-flight waiters with a dropped sender so callers
            // see a broken-channel error rather than hanging forever.
            reader_waiters.clear();
        });

        Ok(Self {
            stdin: AsyncMutex::new(stdin),
            waiters,
            next_id: AtomicU64::new(1),
            _child: AsyncMutex::new(child),
            _reader_task: reader_task,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);

        let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let mut line = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await.map_err(|e| format!("write failed: {e}"))?;
            stdin.flush().await.map_err(|e| format!("flush failed: {e}"))?;
        }

        let response = rx.await.map_err(|_| "server closed before responding".to_string())?;
        if let Some(err) = response.get("error") {
            return Err(err.to_string());
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn list_tools(&self) -> Result<Vec<(String, Value, String)>, String> {
        let result = self.call("list_tools", json!({})).await?;
        parse_tool_list(&result)
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<Value, String> {
        self.call("call_tool", json!({"name": name, "params": params})).await
    }
}

/// HTTP streaming / SSE transport: a persistent `reqwest::Client` session
/// POSTing the same JSON-RPC-shaped envelope the stdio transport uses.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: String, connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, url }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, String> {
        let frame = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let resp = self
            .client
            .post(&self.url)
            .json(&frame)
            .send()
            .await
            .map_err(|e| format!("http request failed: {e}"))?;
        let body: Value = resp.json().await.map_err(|e| format!("invalid response body: {e}"))?;
        if let Some(err) = body.get("error") {
            return Err(err.to_string());
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn list_tools(&self) -> Result<Vec<(String, Value, String)>, String> {
        let result = self.call("list_tools", json!({})).await?;
        parse_tool_list(&result)
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<Value, String> {
        self.call("call_tool", json!({"name": name, "params": params})).await
    }
}

fn parse_tool_list(value: &Value) -> Result<Vec<(String, Value, String)>, String> {
    let tools = value
        .get("tools")
        .and_then(|t| t.as_array())
        .ok_or_else(|| "list_tools response missing 'tools' array".to_string())?;
    Ok(tools
        .iter()
        .filter_map(|t| {
            let name = t.get("name")?.as_str()?.to_string();
            let schema = t.get("input_schema").cloned().unwrap_or(json!({}));
            let description = t.get("description").and_then(|d| d.as_str()).unwrap_or_default().to_string();
            Some((name, schema, description))
        })
        .collect())
}

/// Helper so `ToolDescriptor`s can be built uniformly from either transport.
pub fn descriptors_from_raw(server: &str, raw: Vec<(String, Value, String)>) -> Vec<ToolDescriptor> {
    raw.into_iter()
        .map(|(name, schema, description)| ToolDescriptor {
            name: ToolDescriptor::qualified_name(server, &name),
            server: server.to_string(),
            input_schema: schema,
            description,
        })
        .collect()
}
