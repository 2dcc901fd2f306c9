//! Layered configuration (§6.4): environment variables override a TOML file
//! which overrides built-in defaults; secrets are additionally resolvable
//! from `/run/secrets/<name>` files in production.

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RenfieldError, Result};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const MAX_WS_MESSAGE_BYTES: usize = 1024 * 1024; // 1 MiB, §5 rate limiting
pub const MAX_AUDIO_BUFFER_BYTES: usize = 10 * 1024 * 1024; // 10 MiB, §4.12

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenfieldConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentRuntimeConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub ws: WsConfig,
    #[serde(default)]
    pub api_rate_limit: ApiRateLimitConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    /// Width every embedding must have; enforced globally (I3).
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for RenfieldConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            agent: AgentRuntimeConfig::default(),
            rag: RagConfig::default(),
            memory: MemoryConfig::default(),
            mcp: McpConfig::default(),
            proactive: ProactiveConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            ws: WsConfig::default(),
            api_rate_limit: ApiRateLimitConfig::default(),
            voice: VoiceConfig::default(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth_enabled: bool,
    /// Resolved from file-based secret in production (§6.4 SECRET_KEY).
    pub auth_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            auth_enabled: false,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// `OLLAMA_URL`, `OLLAMA_{CHAT,RAG,INTENT,EMBED}_MODEL`, `AGENT_OLLAMA_URL`,
/// `AGENT_MODEL` (§6.4): role → (endpoint, model) routing table for the LLM
/// Gateway. Roles default to sharing one endpoint/client pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_chat_model")]
    pub rag_model: String,
    #[serde(default = "default_chat_model")]
    pub intent_model: String,
    #[serde(default = "default_chat_model")]
    pub router_model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Distinct endpoint/model for the agent role, if set; falls back to
    /// `base_url`/`chat_model` otherwise.
    pub agent_base_url: Option<String>,
    pub agent_model: Option<String>,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            chat_model: default_chat_model(),
            rag_model: default_chat_model(),
            intent_model: default_chat_model(),
            router_model: default_chat_model(),
            embed_model: default_embed_model(),
            agent_base_url: None,
            agent_model: None,
            context_window: default_context_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntimeConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_conv_context_messages")]
    pub conv_context_messages: usize,
    #[serde(default = "default_router_timeout_secs")]
    pub router_timeout_secs: u64,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_steps: default_max_steps(),
            step_timeout_secs: default_step_timeout_secs(),
            total_timeout_secs: default_total_timeout_secs(),
            conv_context_messages: default_conv_context_messages(),
            router_timeout_secs: default_router_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "bool_true")]
    pub hybrid_enabled: bool,
    #[serde(default = "default_rrf_k")]
    pub hybrid_rrf_k: f32,
    #[serde(default = "default_weight_dense")]
    pub hybrid_weight_dense: f32,
    #[serde(default = "default_weight_bm25")]
    pub hybrid_weight_bm25: f32,
    #[serde(default = "default_context_window_chunks")]
    pub context_window_chunks: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            hybrid_enabled: true,
            hybrid_rrf_k: default_rrf_k(),
            hybrid_weight_dense: default_weight_dense(),
            hybrid_weight_bm25: default_weight_bm25(),
            context_window_chunks: default_context_window_chunks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,
    #[serde(default = "default_retrieval_threshold")]
    pub retrieval_threshold: f32,
    #[serde(default = "default_max_per_user")]
    pub max_per_user: usize,
    #[serde(default = "default_context_decay_days")]
    pub context_decay_days: i64,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    #[serde(default = "bool_true")]
    pub extraction_enabled: bool,
    #[serde(default)]
    pub contradiction_resolution_enabled: bool,
    #[serde(default = "default_contradiction_threshold")]
    pub contradiction_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retrieval_limit: default_retrieval_limit(),
            retrieval_threshold: default_retrieval_threshold(),
            max_per_user: default_max_per_user(),
            context_decay_days: default_context_decay_days(),
            dedup_threshold: default_dedup_threshold(),
            extraction_enabled: true,
            contradiction_resolution_enabled: false,
            contradiction_threshold: default_contradiction_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_mcp_config_path")]
    pub config_path: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config_path: default_mcp_config_path(),
            refresh_interval_secs: default_refresh_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            max_response_size: default_max_response_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "bool_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_suppression_window_secs")]
    pub suppression_window_secs: i64,
    #[serde(default = "bool_true")]
    pub semantic_dedup_enabled: bool,
    #[serde(default = "default_semantic_dedup_threshold")]
    pub semantic_dedup_threshold: f32,
    #[serde(default)]
    pub urgency_auto_enabled: bool,
    #[serde(default)]
    pub enrichment_enabled: bool,
    #[serde(default = "default_enrichment_timeout_secs")]
    pub enrichment_timeout_secs: u64,
    #[serde(default = "default_notification_ttl_secs")]
    pub notification_ttl_secs: i64,
    #[serde(default = "bool_true")]
    pub tts_default: bool,
    #[serde(default = "bool_true")]
    pub poller_enabled: bool,
    #[serde(default = "default_poller_startup_delay_secs")]
    pub poller_startup_delay_secs: u64,
    #[serde(default = "default_reminder_check_interval_secs")]
    pub reminder_check_interval_secs: u64,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            suppression_window_secs: default_suppression_window_secs(),
            semantic_dedup_enabled: true,
            semantic_dedup_threshold: default_semantic_dedup_threshold(),
            urgency_auto_enabled: false,
            enrichment_enabled: false,
            enrichment_timeout_secs: default_enrichment_timeout_secs(),
            notification_ttl_secs: default_notification_ttl_secs(),
            tts_default: true,
            poller_enabled: true,
            poller_startup_delay_secs: default_poller_startup_delay_secs(),
            reminder_check_interval_secs: default_reminder_check_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_llm_recovery_timeout_secs")]
    pub llm_recovery_timeout_secs: u64,
    #[serde(default = "default_agent_recovery_timeout_secs")]
    pub agent_recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            llm_recovery_timeout_secs: default_llm_recovery_timeout_secs(),
            agent_recovery_timeout_secs: default_agent_recovery_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default = "default_ws_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,
    #[serde(default = "default_ws_rate_limit_per_min")]
    pub rate_limit_per_min: u32,
    #[serde(default = "default_ws_max_connections_per_ip")]
    pub max_connections_per_ip: u32,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            auth_enabled: false,
            rate_limit_per_sec: default_ws_rate_limit_per_sec(),
            rate_limit_per_min: default_ws_rate_limit_per_min(),
            max_connections_per_ip: default_ws_max_connections_per_ip(),
            max_message_bytes: default_max_message_bytes(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApiRateLimitConfig {
    #[serde(default = "default_rate_default")]
    pub default_per_min: u32,
    #[serde(default = "default_rate_auth")]
    pub auth_per_min: u32,
    #[serde(default = "default_rate_voice")]
    pub voice_per_min: u32,
    #[serde(default = "default_rate_chat")]
    pub chat_per_min: u32,
    #[serde(default = "default_rate_admin")]
    pub admin_per_min: u32,
}

impl Default for ApiRateLimitConfig {
    fn default() -> Self {
        Self {
            default_per_min: default_rate_default(),
            auth_per_min: default_rate_auth(),
            voice_per_min: default_rate_voice(),
            chat_per_min: default_rate_chat(),
            admin_per_min: default_rate_admin(),
        }
    }
}

/// STT/TTS/speaker-id collaborators (§4.1, §4.14): each is an HTTP endpoint
/// speaking a small REST contract of its own, external to Renfield proper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_stt_url")]
    pub stt_url: String,
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
    /// Speaker identification is optional; absent, every turn resolves to
    /// an anonymous user (§4.1 Open Question).
    #[serde(default)]
    pub speaker_id_url: Option<String>,
    #[serde(default = "default_tts_cache_dir")]
    pub tts_cache_dir: String,
    #[serde(default = "default_voice_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_url: default_stt_url(),
            tts_url: default_tts_url(),
            speaker_id_url: None,
            tts_cache_dir: default_tts_cache_dir(),
            timeout_secs: default_voice_timeout_secs(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.renfield/renfield.db")
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_chat_model() -> String {
    "llama3.1".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_context_window() -> u32 {
    8192
}
fn default_max_steps() -> u32 {
    8
}
fn default_step_timeout_secs() -> u64 {
    30
}
fn default_total_timeout_secs() -> u64 {
    120
}
fn default_conv_context_messages() -> usize {
    6
}
fn default_router_timeout_secs() -> u64 {
    30
}
fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_top_k() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.4
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_weight_dense() -> f32 {
    0.7
}
fn default_weight_bm25() -> f32 {
    0.3
}
fn default_context_window_chunks() -> usize {
    1
}
fn default_retrieval_limit() -> usize {
    3
}
fn default_retrieval_threshold() -> f32 {
    0.7
}
fn default_max_per_user() -> usize {
    500
}
fn default_context_decay_days() -> i64 {
    30
}
fn default_dedup_threshold() -> f32 {
    0.9
}
fn default_contradiction_threshold() -> f32 {
    0.6
}
fn default_mcp_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.renfield/mcp_servers.yaml")
}
fn default_refresh_interval_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_max_response_size() -> usize {
    10 * 1024
}
fn default_suppression_window_secs() -> i64 {
    60
}
fn default_semantic_dedup_threshold() -> f32 {
    0.85
}
fn default_notification_ttl_secs() -> i64 {
    24 * 3600
}
fn default_enrichment_timeout_secs() -> u64 {
    15
}
fn default_poller_startup_delay_secs() -> u64 {
    5
}
fn default_reminder_check_interval_secs() -> u64 {
    15
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_llm_recovery_timeout_secs() -> u64 {
    30
}
fn default_agent_recovery_timeout_secs() -> u64 {
    60
}
fn default_ws_rate_limit_per_sec() -> u32 {
    50
}
fn default_ws_rate_limit_per_min() -> u32 {
    1000
}
fn default_ws_max_connections_per_ip() -> u32 {
    10
}
fn default_max_message_bytes() -> usize {
    MAX_WS_MESSAGE_BYTES
}
fn default_heartbeat_timeout_secs() -> u64 {
    60
}
fn default_rate_default() -> u32 {
    100
}
fn default_rate_auth() -> u32 {
    10
}
fn default_rate_voice() -> u32 {
    30
}
fn default_rate_chat() -> u32 {
    60
}
fn default_rate_admin() -> u32 {
    200
}
fn default_stt_url() -> String {
    "http://localhost:9000".to_string()
}
fn default_tts_url() -> String {
    "http://localhost:9001".to_string()
}
fn default_tts_cache_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.renfield/tts-cache")
}
fn default_voice_timeout_secs() -> u64 {
    15
}
fn default_embedding_dimension() -> usize {
    768
}

impl RenfieldConfig {
    /// Load config from a TOML file merged with `RENFIELD_`-prefixed env var
    /// overrides, then resolve any secret-shaped fields from
    /// `/run/secrets/<name>` when present (env/file still win if set).
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: RenfieldConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RENFIELD_").split("_"))
            .extract()
            .map_err(|e| RenfieldError::Config(e.to_string()))?;

        if config.gateway.auth_token.is_none() {
            config.gateway.auth_token = read_secret_file("renfield_auth_token");
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            return Err(RenfieldError::Config(
                "embedding_dimension must be nonzero".to_string(),
            ));
        }
        if self.gateway.auth_enabled && self.gateway.auth_token.is_none() {
            return Err(RenfieldError::Config(
                "gateway.auth_enabled is true but no auth_token is configured".to_string(),
            ));
        }
        let weight_sum = self.rag.hybrid_weight_dense + self.rag.hybrid_weight_bm25;
        if (weight_sum - 1.0).abs() > 0.01 {
            return Err(RenfieldError::Config(format!(
                "rag hybrid weights must sum to 1.0, got {weight_sum}"
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.renfield/renfield.toml")
}

/// Read a file-based secret (§6.4) if present; returns `None` (not an
/// error) when the secrets directory or the specific file doesn't exist,
/// since most deployments run without Docker/Kubernetes secret mounts.
fn read_secret_file(name: &str) -> Option<String> {
    let path = Path::new("/run/secrets").join(name);
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = RenfieldConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_embedding_dimension() {
        let mut cfg = RenfieldConfig::default();
        cfg.embedding_dimension = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_auth_enabled_without_token() {
        let mut cfg = RenfieldConfig::default();
        cfg.gateway.auth_enabled = true;
        cfg.gateway.auth_token = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_hybrid_weights_not_summing_to_one() {
        let mut cfg = RenfieldConfig::default();
        cfg.rag.hybrid_weight_dense = 0.9;
        cfg.rag.hybrid_weight_bm25 = 0.9;
        assert!(cfg.validate().is_err());
    }
}
