//! LLM Gateway (§4.3), Complexity Detector & Intent Classifier (§4.8),
//! Agent Router (§4.9), and Agent Loop (§4.10): the reasoning layer that
//! decides how a turn gets answered and drives the multi-step tool path.

pub mod agent_loop;
pub mod agent_router;
pub mod complexity;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod stream;

pub use agent_loop::{AgentEvent, AgentLoop, ToolCatalog};
pub use agent_router::{default_manifests, AgentRole, AgentRouter, RoleManifest};
pub use complexity::{classify as classify_complexity, Complexity};
pub use error::AgentError;
pub use gateway::{CallOptions, ChatStream, LlmGateway, LlmRole};
pub use intent::{FeedbackExample, IntentCandidate, IntentClassifier, RankedIntents};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, MessageRole, ProviderError, ToolCall, ToolDefinition};
pub use stream::StreamEvent;
