use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// §4.14 urgency classification. `Auto` is only ever present on the inbound
/// `IngestRequest` — the persisted Notification always has a concrete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Critical,
    Info,
    Low,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::Info => "info",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "info" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown urgency: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Acknowledged,
    Dismissed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Acknowledged => "acknowledged",
            Self::Dismissed => "dismissed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "acknowledged" => Ok(Self::Acknowledged),
            "dismissed" => Ok(Self::Dismissed),
            other => Err(format!("unknown notification status: {other}")),
        }
    }
}

/// Caller-supplied urgency: either a concrete level or "classify it for me".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyInput {
    Auto,
    Fixed(Urgency),
}

/// §4.14 ingest contract payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub event_type: String,
    pub title: String,
    pub message: String,
    #[serde(default = "default_urgency_input")]
    pub urgency: UrgencyInput,
    pub room_name: Option<String>,
    pub data: Option<Value>,
    pub tts: Option<bool>,
    #[serde(default)]
    pub enrich: bool,
    pub dedup_key: Option<String>,
}

fn default_urgency_input() -> UrgencyInput {
    UrgencyInput::Auto
}

/// A persisted Notification (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub urgency: Urgency,
    pub room_name: Option<String>,
    pub data: Option<Value>,
    pub status: NotificationStatus,
    pub dedup_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A standing rule that silently drops notifications matching its embedding
/// above `threshold` for users in `room_name` (or globally if `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionRule {
    pub id: String,
    pub room_name: Option<String>,
    pub threshold: f32,
    pub active: bool,
}
