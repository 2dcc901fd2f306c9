use serde::{Deserialize, Serialize};

/// Wire transport a capability server manifest entry declares (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stdio,
    HttpStreaming,
    HttpSse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    pub tool_name: String,
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// One entry of the YAML capability-server manifest (§4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerManifest {
    pub name: String,
    pub transport: Transport,
    /// stdio: launch command (argv, first element is the binary).
    /// http_streaming / http_sse: the server URL.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub tool_permissions: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub prompt_tools: Option<Vec<String>>,
    pub refresh_interval_secs: Option<u64>,
    pub notifications: Option<NotificationsConfig>,
}

fn bool_true() -> bool {
    true
}

/// §3 ToolDescriptor: `mcp.<server>.<tool>`, discovered at runtime via the
/// server's list-tools primitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub server: String,
    pub input_schema: serde_json::Value,
    pub description: String,
}

impl ToolDescriptor {
    pub fn qualified_name(server: &str, tool: &str) -> String {
        format!("mcp.{server}.{tool}")
    }

    /// The bare tool name the server itself understands, stripped of the
    /// `mcp.<server>.` prefix.
    pub fn bare_name(&self) -> &str {
        self.name
            .strip_prefix(&format!("mcp.{}.", self.server))
            .unwrap_or(&self.name)
    }
}

/// Per-server health, tracked for I4 (only descriptors from a server
/// healthy within the last refresh interval are visible to the Agent Loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerHealth {
    Healthy,
    Unhealthy,
}
