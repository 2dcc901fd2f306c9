//! LLM Gateway (§4.3): role-based routing to a single endpoint per role,
//! circuit-breaker isolation, streaming, and schema-checked JSON completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use renfield_core::circuit_breaker::{BreakerConfig, BreakerResult, CircuitBreaker};
use renfield_core::config::LlmConfig;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{AgentError, Result};
use crate::ollama::OllamaProvider;
use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError};
use crate::stream::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmRole {
    Chat,
    Rag,
    Intent,
    Agent,
    Router,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::Chat => "chat",
            LlmRole::Rag => "rag",
            LlmRole::Intent => "intent",
            LlmRole::Agent => "agent",
            LlmRole::Router => "router",
        }
    }

    /// Default sampling temperature per role (§4.3).
    pub fn default_temperature(&self) -> f32 {
        match self {
            LlmRole::Chat => 0.7,
            LlmRole::Rag => 0.3,
            LlmRole::Intent => 0.0,
            LlmRole::Agent => 0.1,
            LlmRole::Router => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct RoleTarget {
    endpoint: String,
    model: String,
}

fn resolve_targets(config: &LlmConfig) -> HashMap<LlmRole, RoleTarget> {
    let mut targets = HashMap::new();
    targets.insert(LlmRole::Chat, RoleTarget { endpoint: config.base_url.clone(), model: config.chat_model.clone() });
    targets.insert(LlmRole::Rag, RoleTarget { endpoint: config.base_url.clone(), model: config.rag_model.clone() });
    targets.insert(LlmRole::Intent, RoleTarget { endpoint: config.base_url.clone(), model: config.intent_model.clone() });
    targets.insert(LlmRole::Router, RoleTarget { endpoint: config.base_url.clone(), model: config.router_model.clone() });
    targets.insert(
        LlmRole::Agent,
        RoleTarget {
            endpoint: config.agent_base_url.clone().unwrap_or_else(|| config.base_url.clone()),
            model: config.agent_model.clone().unwrap_or_else(|| config.chat_model.clone()),
        },
    );
    targets
}

#[derive(Clone, Default)]
pub struct CallOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system: String,
    pub timeout: Option<Duration>,
}

/// `chat_stream`'s return value: a channel of deltas plus a guard that
/// aborts the underlying send within 500ms of being dropped (§4.3).
pub struct ChatStream {
    pub rx: mpsc::Receiver<StreamEvent>,
    _task: tokio::task::JoinHandle<()>,
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self._task.abort();
    }
}

pub struct LlmGateway {
    embed_model: String,
    embedding_dimension: usize,
    targets: HashMap<LlmRole, RoleTarget>,
    clients: DashMap<String, Arc<dyn LlmProvider>>,
    breaker: Arc<CircuitBreaker>,
}

impl LlmGateway {
    pub fn new(config: &LlmConfig, embedding_dimension: usize, breaker: Arc<CircuitBreaker>) -> Self {
        for role in [LlmRole::Chat, LlmRole::Rag, LlmRole::Intent, LlmRole::Router] {
            breaker.configure(&format!("llm:{}", role.as_str()), BreakerConfig::default());
        }
        // The agent role wraps a multi-step loop, so §4.2's "agent" recovery
        // timeout (60s) applies rather than the default 30s LLM timeout.
        breaker.configure(&format!("llm:{}", LlmRole::Agent.as_str()), BreakerConfig::agent());
        Self {
            embed_model: config.embed_model.clone(),
            embedding_dimension,
            targets: resolve_targets(config),
            clients: DashMap::new(),
            breaker,
        }
    }

    /// Clients are cached per endpoint URL so roles sharing an endpoint
    /// share one connection pool (§4.3).
    fn client_for(&self, endpoint: &str) -> Arc<dyn LlmProvider> {
        self.clients
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(OllamaProvider::new(Some(endpoint.to_string()))) as Arc<dyn LlmProvider>)
            .clone()
    }

    fn target(&self, role: LlmRole) -> &RoleTarget {
        self.targets.get(&role).expect("every LlmRole has a configured target")
    }

    fn build_request(&self, role: LlmRole, system: String, messages: Vec<Message>, options: &CallOptions) -> ChatRequest {
        let target = self.target(role);
        ChatRequest {
            model: target.model.clone(),
            system,
            messages,
            max_tokens: options.max_tokens.unwrap_or(1024),
            temperature: options.temperature.unwrap_or_else(|| role.default_temperature()),
            json_mode: false,
            tools: Vec::new(),
            raw_messages: None,
        }
    }

    fn resource_key(role: LlmRole) -> String {
        format!("llm:{}", role.as_str())
    }

    /// Streams text deltas as the runtime produces them. Dropping the
    /// returned `ChatStream` aborts the underlying call within 500ms.
    pub async fn chat_stream(&self, role: LlmRole, messages: Vec<Message>, options: CallOptions) -> Result<ChatStream> {
        let resource = Self::resource_key(role);
        if self.breaker.state(&resource) == renfield_core::circuit_breaker::CircuitState::Open {
            return Err(AgentError::CircuitOpen(resource));
        }

        let target = self.target(role).clone();
        let client = self.client_for(&target.endpoint);
        let req = self.build_request(role, options.system.clone(), messages, &options);
        let (tx, rx) = mpsc::channel(64);
        let breaker = self.breaker.clone();
        let resource_for_task = resource.clone();

        let task = tokio::spawn(async move {
            match client.send_stream(&req, tx.clone()).await {
                Ok(()) => breaker.record_success(&resource_for_task),
                Err(e) => {
                    breaker.record_failure(&resource_for_task);
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                }
            }
        });

        Ok(ChatStream { rx, _task: task })
    }

    /// `complete_json`: requests JSON output, validates against `schema`,
    /// retries once with a corrective instruction on validation failure
    /// (§4.3), then fails with `MalformedOutput`.
    pub async fn complete_json(
        &self,
        role: LlmRole,
        prompt: &str,
        schema: &serde_json::Value,
        options: CallOptions,
    ) -> Result<serde_json::Value> {
        let resource = Self::resource_key(role);
        let target = self.target(role).clone();
        let client = self.client_for(&target.endpoint);

        let first = self.try_complete_json(&client, role, prompt, &options).await;
        let parsed = match first {
            Ok(v) if validate_against_schema(&v, schema) => {
                self.breaker.record_success(&resource);
                return Ok(v);
            }
            Ok(v) => Some(v),
            Err(BreakerResult::Open(_)) => return Err(AgentError::CircuitOpen(resource)),
            Err(BreakerResult::Inner(_)) => None,
        };

        warn!(role = role.as_str(), "complete_json validation failed, retrying with corrective instruction");
        let corrective = format!(
            "{prompt}\n\nYour previous response did not match the required JSON schema: {schema}. Respond with only valid JSON matching this schema."
        );
        let retry = self.try_complete_json(&client, role, &corrective, &options).await;
        match retry {
            Ok(v) if validate_against_schema(&v, schema) => {
                self.breaker.record_success(&resource);
                Ok(v)
            }
            Ok(_) | Err(_) => {
                self.breaker.record_failure(&resource);
                Err(AgentError::MalformedOutput(
                    parsed.map(|v| v.to_string()).unwrap_or_else(|| "no valid JSON produced".to_string()),
                ))
            }
        }
    }

    async fn try_complete_json(
        &self,
        client: &Arc<dyn LlmProvider>,
        role: LlmRole,
        prompt: &str,
        options: &CallOptions,
    ) -> std::result::Result<serde_json::Value, BreakerResult<ProviderError>> {
        let resource = Self::resource_key(role);
        if self.breaker.state(&resource) == renfield_core::circuit_breaker::CircuitState::Open {
            return Err(BreakerResult::Open(renfield_core::circuit_breaker::CircuitOpenError { resource }));
        }

        let mut req = self.build_request(
            role,
            options.system.clone(),
            vec![Message { role: crate::provider::MessageRole::User, content: prompt.to_string() }],
            options,
        );
        req.json_mode = true;

        let call = async { client.send(&req).await };
        let resp = match if let Some(timeout) = options.timeout {
            tokio::time::timeout(timeout, call).await.unwrap_or(Err(ProviderError::Cancelled))
        } else {
            call.await
        } {
            Ok(r) => r,
            Err(e) => return Err(BreakerResult::Inner(e)),
        };

        serde_json::from_str(&resp.content)
            .map_err(|e| BreakerResult::Inner(ProviderError::Parse(e.to_string())))
    }

    /// `embed`: validates the returned vector length against the globally
    /// configured `embedding_dimension` (Open Question resolution, §9).
    pub async fn embed(&self, role: LlmRole, text: &str) -> Result<Vec<f32>> {
        let resource = Self::resource_key(role);
        let target = self.target(role).clone();
        let client = self.client_for(&target.endpoint);

        if self.breaker.state(&resource) == renfield_core::circuit_breaker::CircuitState::Open {
            return Err(AgentError::CircuitOpen(resource));
        }

        match client.embed(&self.embed_model, text).await {
            Ok(v) if v.len() == self.embedding_dimension => {
                self.breaker.record_success(&resource);
                Ok(v)
            }
            Ok(v) => {
                self.breaker.record_failure(&resource);
                Err(AgentError::MalformedOutput(format!(
                    "embedding dimension {} does not match configured {}",
                    v.len(),
                    self.embedding_dimension
                )))
            }
            Err(e) => {
                self.breaker.record_failure(&resource);
                Err(AgentError::Provider(e))
            }
        }
    }
}

/// Minimal structural validation: every required property listed in the
/// schema's top-level `required` array (or, absent that, every key in
/// `properties`) must be present. Full JSON-Schema validation is out of
/// scope; this is enough to catch the LLM dropping fields.
fn validate_against_schema(value: &serde_json::Value, schema: &serde_json::Value) -> bool {
    let Some(obj) = value.as_object() else { return false };
    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_else(|| {
            schema
                .get("properties")
                .and_then(|p| p.as_object())
                .map(|p| p.keys().cloned().collect())
                .unwrap_or_default()
        });
    required.iter().all(|key| obj.contains_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_temperature_defaults_match_spec() {
        assert_eq!(LlmRole::Chat.default_temperature(), 0.7);
        assert_eq!(LlmRole::Rag.default_temperature(), 0.3);
        assert_eq!(LlmRole::Intent.default_temperature(), 0.0);
        assert_eq!(LlmRole::Agent.default_temperature(), 0.1);
        assert_eq!(LlmRole::Router.default_temperature(), 0.0);
    }

    #[test]
    fn validate_against_schema_checks_required_keys() {
        let schema = serde_json::json!({"required": ["intent", "confidence"]});
        assert!(validate_against_schema(&serde_json::json!({"intent": "a", "confidence": 1.0}), &schema));
        assert!(!validate_against_schema(&serde_json::json!({"intent": "a"}), &schema));
        assert!(!validate_against_schema(&serde_json::json!("not an object"), &schema));
    }

    #[test]
    fn shared_endpoint_roles_share_one_client() {
        let config = LlmConfig::default();
        let gateway = LlmGateway::new(&config, 768, Arc::new(CircuitBreaker::default()));
        let a = gateway.client_for(&gateway.target(LlmRole::Chat).endpoint.clone());
        let b = gateway.client_for(&gateway.target(LlmRole::Rag).endpoint.clone());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
