//! Agent Loop (§4.10): the multi-step tool-using loop the complex path
//! hands off to once the Agent Router has picked a role.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use renfield_core::UserId;
use serde_json::json;
use tracing::warn;

use crate::agent_router::RoleManifest;
use crate::gateway::{CallOptions, LlmGateway, LlmRole};
use crate::provider::{Message, MessageRole};

/// Thin seam over the Tool Registry's `execute`/catalog so this crate
/// doesn't depend on `renfield-tools` directly (mirrors the `ToolExecutor`
/// pattern in `renfield-notify`).
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Live tool names visible to this role, already filtered by I4
    /// (unhealthy servers excluded) and the role's allowlist.
    fn tool_names(&self) -> Vec<String>;
    async fn execute(&self, tool_name: &str, params: serde_json::Value, caller_user: &UserId) -> Result<serde_json::Value, String>;
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Thinking { text: String },
    ToolCall { name: String, params: serde_json::Value, reason: String },
    ToolResult { name: String, result: Result<serde_json::Value, String> },
    FinalToken { text: String },
    Done { steps_used: u32 },
}

const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOTAL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONV_CONTEXT_MESSAGES: usize = 6;
const MAX_STEP_RETRIES: u32 = 2;

fn step_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["action", "reason"],
        "properties": {
            "action": {"type": "string", "enum": ["tool", "final"]},
            "tool": {"type": "string"},
            "parameters": {"type": "object"},
            "reason": {"type": "string"},
            "final_answer": {"type": "string"}
        }
    })
}

enum StepDecision {
    Tool { name: String, parameters: serde_json::Value, reason: String },
    Final { final_answer: String },
}

fn parse_decision(value: &serde_json::Value) -> Option<StepDecision> {
    match value.get("action")?.as_str()? {
        "tool" => Some(StepDecision::Tool {
            name: value.get("tool")?.as_str()?.to_string(),
            parameters: value.get("parameters").cloned().unwrap_or_else(|| json!({})),
            reason: value.get("reason").and_then(|r| r.as_str()).unwrap_or_default().to_string(),
        }),
        "final" => Some(StepDecision::Final {
            final_answer: value.get("final_answer").and_then(|r| r.as_str()).unwrap_or_default().to_string(),
        }),
        _ => None,
    }
}

pub struct AgentLoop<'a> {
    gateway: &'a LlmGateway,
    tools: &'a dyn ToolCatalog,
    step_timeout_secs: u64,
    total_timeout_secs: u64,
    conv_context_messages: usize,
}

impl<'a> AgentLoop<'a> {
    pub fn new(gateway: &'a LlmGateway, tools: &'a dyn ToolCatalog) -> Self {
        Self {
            gateway,
            tools,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            total_timeout_secs: DEFAULT_TOTAL_TIMEOUT_SECS,
            conv_context_messages: DEFAULT_CONV_CONTEXT_MESSAGES,
        }
    }

    pub fn with_step_timeout_secs(mut self, secs: u64) -> Self {
        self.step_timeout_secs = secs;
        self
    }

    pub fn with_total_timeout_secs(mut self, secs: u64) -> Self {
        self.total_timeout_secs = secs;
        self
    }

    pub fn with_conv_context_messages(mut self, n: usize) -> Self {
        self.conv_context_messages = n;
        self
    }

    /// `run(role, message, conversation_context, caller_user) -> stream of
    /// events`. Dropping the returned stream before it's fully polled stops
    /// the loop before its next LLM call (cancellation, §4.10) — no
    /// detached task is spawned, so there is nothing left running.
    pub fn run<'s>(
        &'s self,
        manifest: &'s RoleManifest,
        message: String,
        conversation_context: Vec<Message>,
        caller_user: UserId,
    ) -> impl futures_util::Stream<Item = AgentEvent> + 's {
        async_stream::stream! {
            let context: Vec<Message> = conversation_context
                .into_iter()
                .rev()
                .take(self.conv_context_messages)
                .rev()
                .collect();

            let mut scratchpad: Vec<serde_json::Value> = Vec::new();
            let start = Instant::now();
            let mut steps_used: u32 = 0;
            let mut consecutive_step_timeouts: u32 = 0;
            let mut final_answer: Option<String> = None;

            while manifest.max_steps == 0 || steps_used < manifest.max_steps {
                if start.elapsed() >= Duration::from_secs(self.total_timeout_secs) {
                    warn!(role = manifest.role.as_str(), "agent loop total timeout reached");
                    break;
                }

                let prompt = build_step_prompt(manifest, &message, &context, &scratchpad, self.tools.tool_names());
                let options = CallOptions {
                    system: format!("You are the {} agent. Decide the next tool call or produce a final answer.", manifest.label),
                    timeout: Some(Duration::from_secs(self.step_timeout_secs)),
                    ..Default::default()
                };

                match self.gateway.complete_json(LlmRole::Agent, &prompt, &step_schema(), options).await {
                    Ok(decision) => {
                        consecutive_step_timeouts = 0;
                        match parse_decision(&decision) {
                            Some(StepDecision::Tool { name, parameters, reason }) => {
                                if !manifest.allows_tool(&name) {
                                    scratchpad.push(json!({"tool": name, "error": "tool_disallowed"}));
                                    yield AgentEvent::ToolResult { name, result: Err("tool not allowed for this role".to_string()) };
                                    steps_used += 1;
                                    continue;
                                }
                                yield AgentEvent::ToolCall { name: name.clone(), params: parameters.clone(), reason };
                                let result = self.tools.execute(&name, parameters.clone(), &caller_user).await;
                                scratchpad.push(json!({"tool": name, "params": parameters, "result": &result}));
                                yield AgentEvent::ToolResult { name, result };
                                steps_used += 1;
                            }
                            Some(StepDecision::Final { final_answer: answer }) => {
                                final_answer = Some(answer);
                                break;
                            }
                            None => {
                                scratchpad.push(json!({"note": "malformed_step_output"}));
                                steps_used += 1;
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_step_timeouts += 1;
                        scratchpad.push(json!({"note": "step_timeout", "error": e.to_string()}));
                        steps_used += 1;
                        if consecutive_step_timeouts > MAX_STEP_RETRIES {
                            warn!(role = manifest.role.as_str(), "agent loop step failed after retries");
                            break;
                        }
                    }
                }
            }

            let final_prompt = match final_answer {
                Some(answer) => answer,
                None => build_final_prompt(manifest, &message, &context, &scratchpad),
            };

            let stream_messages = vec![Message { role: MessageRole::User, content: final_prompt }];
            match self.gateway.chat_stream(LlmRole::Agent, stream_messages, CallOptions {
                system: format!("You are the {} agent. Give the user-facing final answer.", manifest.label),
                ..Default::default()
            }).await {
                Ok(mut chat_stream) => {
                    while let Some(event) = chat_stream.rx.recv().await {
                        match event {
                            crate::stream::StreamEvent::TextDelta { text } => yield AgentEvent::FinalToken { text },
                            crate::stream::StreamEvent::Done { .. } => break,
                            crate::stream::StreamEvent::Error { message } => {
                                warn!(error = %message, "agent loop final-answer stream error");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "agent loop could not start final-answer stream"),
            }

            yield AgentEvent::Done { steps_used };
        }
    }
}

fn build_step_prompt(
    manifest: &RoleManifest,
    message: &str,
    context: &[Message],
    scratchpad: &[serde_json::Value],
    tool_names: Vec<String>,
) -> String {
    let allowed_tools: Vec<&String> = tool_names.iter().filter(|t| manifest.allows_tool(t)).collect();
    let context_text: String = context.iter().map(|m| format!("{:?}: {}\n", m.role, m.content)).collect();
    format!(
        "Role policy: {}\nAllowed tools: {:?}\nConversation so far:\n{}Scratchpad: {}\nUser message: {}\nRespond with JSON: {{\"action\": \"tool\"|\"final\", \"tool\"?: string, \"parameters\"?: object, \"reason\": string, \"final_answer\"?: string}}.",
        manifest.label,
        allowed_tools,
        context_text,
        serde_json::Value::Array(scratchpad.to_vec()),
        message,
    )
}

fn build_final_prompt(manifest: &RoleManifest, message: &str, context: &[Message], scratchpad: &[serde_json::Value]) -> String {
    let context_text: String = context.iter().map(|m| format!("{:?}: {}\n", m.role, m.content)).collect();
    format!(
        "As the {} agent, produce the final user-facing answer given what was gathered.\nConversation so far:\n{}Gathered results: {}\nUser message: {}",
        manifest.label,
        context_text,
        serde_json::Value::Array(scratchpad.to_vec()),
        message,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decision_reads_tool_action() {
        let value = json!({"action": "tool", "tool": "mcp.homeassistant.turn_on", "parameters": {"entity": "light.kitchen"}, "reason": "user asked"});
        match parse_decision(&value) {
            Some(StepDecision::Tool { name, .. }) => assert_eq!(name, "mcp.homeassistant.turn_on"),
            _ => panic!("expected tool decision"),
        }
    }

    #[test]
    fn parse_decision_reads_final_action() {
        let value = json!({"action": "final", "reason": "done", "final_answer": "Done."});
        match parse_decision(&value) {
            Some(StepDecision::Final { final_answer }) => assert_eq!(final_answer, "Done."),
            _ => panic!("expected final decision"),
        }
    }

    #[test]
    fn parse_decision_rejects_unknown_action() {
        assert!(parse_decision(&json!({"action": "loiter", "reason": "x"})).is_none());
    }
}
