//! Agent Router (§4.9): a single `complete_json` call deciding which
//! Agent Loop role handles a complex turn.

use serde::{Deserialize, Serialize};

use crate::gateway::{CallOptions, LlmGateway, LlmRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    SmartHome,
    Research,
    Documents,
    Media,
    Workflow,
    Knowledge,
    Conversation,
    General,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::SmartHome => "smart_home",
            AgentRole::Research => "research",
            AgentRole::Documents => "documents",
            AgentRole::Media => "media",
            AgentRole::Workflow => "workflow",
            AgentRole::Knowledge => "knowledge",
            AgentRole::Conversation => "conversation",
            AgentRole::General => "general",
        }
    }
}

/// Per-role manifest entry (§4.9): display label, allowed tool name
/// prefixes, step budget, and optional overrides.
#[derive(Debug, Clone)]
pub struct RoleManifest {
    pub role: AgentRole,
    pub label: String,
    pub tool_prefix_allowlist: Vec<String>,
    pub max_steps: u32,
    pub model_override: Option<String>,
    pub endpoint_override: Option<String>,
}

impl RoleManifest {
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.tool_prefix_allowlist.iter().any(|prefix| tool_name.starts_with(prefix.as_str()))
    }
}

/// Default manifest set grounded on §4.9's named roles; tool prefixes
/// mirror the Tool Registry's `mcp.<server>.<tool>` addressing.
pub fn default_manifests() -> Vec<RoleManifest> {
    vec![
        manifest(AgentRole::SmartHome, "Smart Home", vec!["mcp.homeassistant."], 6),
        manifest(AgentRole::Research, "Research", vec!["mcp.search.", "mcp.web."], 8),
        manifest(AgentRole::Documents, "Documents", vec!["mcp.documents.", "mcp.files."], 6),
        manifest(AgentRole::Media, "Media", vec!["mcp.media."], 4),
        manifest(AgentRole::Workflow, "Workflow", vec!["mcp."], 10),
        manifest(AgentRole::Knowledge, "Knowledge", vec![], 4),
        manifest(AgentRole::Conversation, "Conversation", vec![], 0),
        manifest(AgentRole::General, "General", vec!["mcp."], 6),
    ]
}

fn manifest(role: AgentRole, label: &str, prefixes: Vec<&str>, max_steps: u32) -> RoleManifest {
    RoleManifest {
        role,
        label: label.to_string(),
        tool_prefix_allowlist: prefixes.into_iter().map(str::to_string).collect(),
        max_steps,
        model_override: None,
        endpoint_override: None,
    }
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["role", "reason"],
        "properties": {"role": {"type": "string"}, "reason": {"type": "string"}}
    })
}

const DEFAULT_ROUTER_TIMEOUT_SECS: u64 = 30;

pub struct AgentRouter<'a> {
    gateway: &'a LlmGateway,
    router_timeout_secs: u64,
}

impl<'a> AgentRouter<'a> {
    pub fn new(gateway: &'a LlmGateway) -> Self {
        Self { gateway, router_timeout_secs: DEFAULT_ROUTER_TIMEOUT_SECS }
    }

    pub fn with_router_timeout_secs(mut self, secs: u64) -> Self {
        self.router_timeout_secs = secs;
        self
    }

    /// `route(message) -> role`. On timeout or error, defaults to
    /// `conversation` (the no-tools path).
    pub async fn route(&self, message: &str) -> AgentRole {
        let prompt = format!(
            "Pick the best role to handle this request: smart_home, research, documents, media, workflow, knowledge, conversation, general.\nRequest: {message}\nRespond with JSON: {{\"role\": string, \"reason\": string}}."
        );
        let options = CallOptions {
            system: "You route user requests to the correct specialist agent role.".to_string(),
            timeout: Some(std::time::Duration::from_secs(self.router_timeout_secs)),
            ..Default::default()
        };

        match self.gateway.complete_json(LlmRole::Router, &prompt, &schema(), options).await {
            Ok(value) => parse_role(&value).unwrap_or(AgentRole::Conversation),
            Err(_) => AgentRole::Conversation,
        }
    }
}

fn parse_role(value: &serde_json::Value) -> Option<AgentRole> {
    let raw = value.get("role")?.as_str()?;
    default_manifests().into_iter().find(|m| m.role.as_str() == raw).map(|m| m.role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_manifest_allows_matching_prefix() {
        let manifests = default_manifests();
        let smart_home = manifests.iter().find(|m| m.role == AgentRole::SmartHome).unwrap();
        assert!(smart_home.allows_tool("mcp.homeassistant.turn_on"));
        assert!(!smart_home.allows_tool("mcp.media.play"));
    }

    #[test]
    fn parse_role_rejects_unknown_role_name() {
        assert!(parse_role(&serde_json::json!({"role": "not_a_role"})).is_none());
        assert_eq!(parse_role(&serde_json::json!({"role": "media"})), Some(AgentRole::Media));
    }
}
