//! Tool Registry / Capability Hub (§4.7): supervises N capability servers,
//! discovers and refreshes their tools, and is the single point every tool
//! invocation passes through for permission checks, schema validation,
//! timeout, circuit breaking and response truncation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use renfield_core::circuit_breaker::{BreakerConfig, BreakerResult, CircuitBreaker};
use renfield_core::permissions::{require_any_permission, Permission, Role};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, ToolError};
use crate::manifest::load_manifests;
use crate::transport::{descriptors_from_raw, HttpTransport, McpTransport, StdioTransport};
use crate::types::{ServerHealth, ServerManifest, ToolDescriptor, Transport};

const UNHEALTHY_THRESHOLD: u32 = 3;

struct ServerEntry {
    manifest: ServerManifest,
    transport: Option<Arc<dyn McpTransport>>,
    descriptors: RwLock<Vec<ToolDescriptor>>,
    consecutive_failures: AtomicU32,
    health: std::sync::Mutex<ServerHealth>,
}

/// Resolves caller permission checks and backend lookups for §4.7's tool
/// invocation pipeline. Callers that don't track roles pass `None`.
pub struct ToolRegistry {
    servers: DashMap<String, Arc<ServerEntry>>,
    breaker: Arc<CircuitBreaker>,
    call_timeout: Duration,
    max_response_size: usize,
    auth_disabled: bool,
}

impl ToolRegistry {
    pub fn new(breaker: Arc<CircuitBreaker>, call_timeout: Duration, max_response_size: usize, auth_disabled: bool) -> Self {
        Self {
            servers: DashMap::new(),
            breaker,
            call_timeout,
            max_response_size,
            auth_disabled,
        }
    }

    /// Loads the YAML manifest and connects to every enabled server in
    /// parallel; one server's failure never blocks the others (§4.7).
    pub async fn connect_from_manifest(self: &Arc<Self>, manifest_path: &str) -> Result<()> {
        let manifests = load_manifests(manifest_path)?;
        let futures = manifests
            .into_iter()
            .filter(|m| m.enabled)
            .map(|m| {
                let this = self.clone();
                async move { this.connect_server(m).await }
            });
        futures_util::future::join_all(futures).await;
        Ok(())
    }

    async fn connect_server(self: &Arc<Self>, manifest: ServerManifest) {
        let name = manifest.name.clone();
        let transport: Result<Arc<dyn McpTransport>> = match manifest.transport {
            Transport::Stdio => StdioTransport::spawn(&manifest.command, &manifest.env)
                .await
                .map(|t| Arc::new(t) as Arc<dyn McpTransport>)
                .map_err(ToolError::Transport),
            Transport::HttpStreaming | Transport::HttpSse => {
                let url = manifest.command.first().cloned().unwrap_or_default();
                Ok(Arc::new(HttpTransport::new(url, Duration::from_secs(10))) as Arc<dyn McpTransport>)
            }
        };

        let entry = match transport {
            Ok(t) => {
                let descriptors = match t.list_tools().await {
                    Ok(raw) => descriptors_from_raw(&name, raw),
                    Err(e) => {
                        warn!(server = %name, error = %e, "initial list_tools failed");
                        Vec::new()
                    }
                };
                Arc::new(ServerEntry {
                    manifest,
                    transport: Some(t),
                    descriptors: RwLock::new(descriptors),
                    consecutive_failures: AtomicU32::new(0),
                    health: std::sync::Mutex::new(ServerHealth::Healthy),
                })
            }
            Err(e) => {
                warn!(server = %name, error = %e, "capability server connect failed");
                Arc::new(ServerEntry {
                    manifest,
                    transport: None,
                    descriptors: RwLock::new(Vec::new()),
                    consecutive_failures: AtomicU32::new(UNHEALTHY_THRESHOLD),
                    health: std::sync::Mutex::new(ServerHealth::Unhealthy),
                })
            }
        };

        self.breaker.configure(&format!("mcp:{name}"), BreakerConfig::agent());
        info!(server = %name, "capability server registered");
        self.servers.insert(name, entry);
    }

    /// Spawns a background refresh loop per connected server, re-listing its
    /// tools every `refresh_interval_secs` (default from manifest, falling
    /// back to the registry-wide default passed in). Three consecutive
    /// failures mark the server unhealthy, hiding its tools from I4.
    pub fn spawn_health_refresh(self: &Arc<Self>, default_interval: Duration) {
        for entry in self.servers.iter() {
            let entry = entry.value().clone();
            let interval = entry
                .manifest
                .refresh_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default_interval);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let Some(transport) = entry.transport.as_ref() else { continue };
                    match transport.list_tools().await {
                        Ok(raw) => {
                            let fresh = descriptors_from_raw(&entry.manifest.name, raw);
                            *entry.descriptors.write().await = fresh;
                            entry.consecutive_failures.store(0, Ordering::Release);
                            *entry.health.lock().unwrap() = ServerHealth::Healthy;
                        }
                        Err(e) => {
                            let failures = entry.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                            warn!(server = %entry.manifest.name, error = %e, failures, "health refresh failed");
                            if failures >= UNHEALTHY_THRESHOLD {
                                *entry.health.lock().unwrap() = ServerHealth::Unhealthy;
                            }
                        }
                    }
                }
            });
        }
    }

    /// The catalog exposed to the Agent Loop: every descriptor from every
    /// healthy server (I4).
    pub async fn catalog(&self) -> Vec<ToolDescriptor> {
        let mut out = Vec::new();
        for entry in self.servers.iter() {
            if *entry.health.lock().unwrap() != ServerHealth::Healthy {
                continue;
            }
            out.extend(entry.descriptors.read().await.iter().cloned());
        }
        out
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.catalog().await.into_iter().map(|d| d.name).collect()
    }

    pub fn server_health(&self) -> HashMap<String, ServerHealth> {
        self.servers
            .iter()
            .map(|e| (e.key().clone(), *e.value().health.lock().unwrap()))
            .collect()
    }

    /// §4.7's execution pipeline: resolve → permission check → schema
    /// validate → invoke under timeout+breaker → truncate.
    pub async fn execute(&self, qualified_name: &str, params: Value, caller_role: Option<&Role>) -> Result<Value> {
        let (server_name, bare_name) = split_qualified(qualified_name)
            .ok_or_else(|| ToolError::NotFound(qualified_name.to_string()))?;

        let entry = self
            .servers
            .get(server_name)
            .map(|e| e.value().clone())
            .ok_or_else(|| ToolError::NotFound(qualified_name.to_string()))?;

        let descriptor = {
            let descriptors = entry.descriptors.read().await;
            descriptors.iter().find(|d| d.name == qualified_name).cloned()
        }
        .ok_or_else(|| ToolError::NotFound(qualified_name.to_string()))?;

        self.check_permission(&entry.manifest, bare_name, caller_role)?;
        validate_against_schema(&descriptor.input_schema, &params, qualified_name)?;

        let transport = entry
            .transport
            .clone()
            .ok_or_else(|| ToolError::ServerUnavailable(server_name.to_string()))?;

        let resource = format!("mcp:{server_name}");
        let call_timeout = self.call_timeout;
        let result = self
            .breaker
            .guard(&resource, move || async move {
                tokio::time::timeout(call_timeout, transport.call_tool(bare_name, params))
                    .await
                    .map_err(|_| "timed out".to_string())?
            })
            .await;

        let value = match result {
            Ok(v) => v,
            Err(BreakerResult::Open(_)) => return Err(ToolError::CircuitOpen(resource)),
            Err(BreakerResult::Inner(e)) if e == "timed out" => {
                return Err(ToolError::Timeout {
                    server: server_name.to_string(),
                    timeout_secs: self.call_timeout.as_secs(),
                })
            }
            Err(BreakerResult::Inner(e)) => return Err(ToolError::Transport(e)),
        };

        Ok(truncate_response(value, self.max_response_size))
    }

    fn check_permission(&self, manifest: &ServerManifest, bare_name: &str, caller_role: Option<&Role>) -> Result<()> {
        let required = manifest
            .tool_permissions
            .get(bare_name)
            .cloned()
            .map(|p| vec![Permission::new(p)])
            .unwrap_or_else(|| manifest.permissions.iter().cloned().map(Permission::new).collect());

        require_any_permission(caller_role, &required, self.auth_disabled)
            .map_err(|e| ToolError::PermissionDenied { required: e.required })
    }
}

fn split_qualified(qualified_name: &str) -> Option<(&str, &str)> {
    let rest = qualified_name.strip_prefix("mcp.")?;
    rest.split_once('.')
}

/// Minimal structural validation: required top-level properties from a JSON
/// Schema object must be present. Renfield doesn't carry a full schema
/// validator dependency for this — the capability servers themselves are the
/// authority on deep validation; this catches the common "missing arg" case
/// before paying for a round trip.
fn validate_against_schema(schema: &Value, params: &Value, tool_name: &str) -> Result<()> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    for field in required {
        let Some(field) = field.as_str() else { continue };
        if params.get(field).is_none() {
            return Err(ToolError::InvalidParams {
                tool: tool_name.to_string(),
                reason: format!("missing required field '{field}'"),
            });
        }
    }
    Ok(())
}

fn truncate_response(value: Value, max_bytes: usize) -> Value {
    let serialized = value.to_string();
    if serialized.len() <= max_bytes {
        return value;
    }
    let mut truncated: String = serialized.chars().take(max_bytes).collect();
    truncated.push_str("...<truncated>");
    Value::String(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_qualified_name() {
        assert_eq!(split_qualified("mcp.weather.get_forecast"), Some(("weather", "get_forecast")));
        assert_eq!(split_qualified("not-qualified"), None);
    }

    #[test]
    fn validate_rejects_missing_required_field() {
        let schema = serde_json::json!({"required": ["city"]});
        let params = serde_json::json!({});
        let result = validate_against_schema(&schema, &params, "mcp.weather.get");
        assert!(result.is_err());
    }

    #[test]
    fn validate_permits_when_no_schema_required() {
        let schema = serde_json::json!({});
        let params = serde_json::json!({"anything": 1});
        assert!(validate_against_schema(&schema, &params, "mcp.weather.get").is_ok());
    }

    #[test]
    fn truncate_leaves_small_responses_untouched() {
        let v = serde_json::json!({"ok": true});
        let out = truncate_response(v.clone(), 1_000_000);
        assert_eq!(out, v);
    }

    #[test]
    fn truncate_shrinks_oversized_responses() {
        let v = Value::String("x".repeat(1000));
        let out = truncate_response(v, 10);
        assert!(out.as_str().unwrap().len() < 1000);
    }
}
