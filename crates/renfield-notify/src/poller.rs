use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info};

use crate::service::NotificationService;
use crate::types::{IngestRequest, UrgencyInput};

/// Thin seam over the Tool Registry's `execute` so this crate doesn't take a
/// direct dependency on `renfield-tools` (mirrors the `ConflictClassifier`
/// pattern in `renfield-memory`).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, server: &str, tool: &str, args: Value) -> Result<Value, String>;
}

#[derive(Debug, Clone)]
pub struct PollTarget {
    pub server: String,
    pub tool_name: String,
    pub poll_interval: Duration,
    pub lookahead_minutes: u32,
}

/// §4.15: per-capability-server background task pulling proactive events.
pub struct NotificationPoller {
    executor: Arc<dyn ToolExecutor>,
    notifications: Arc<NotificationService>,
}

impl NotificationPoller {
    pub fn new(executor: Arc<dyn ToolExecutor>, notifications: Arc<NotificationService>) -> Self {
        Self { executor, notifications }
    }

    /// Spawns one polling loop per target; each runs until `shutdown` fires.
    /// Failures are logged and the loop continues (§4.15).
    pub fn spawn_all(&self, targets: Vec<PollTarget>, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        targets
            .into_iter()
            .map(|target| {
                let executor = self.executor.clone();
                let notifications = self.notifications.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(target.poll_interval);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if let Err(e) = poll_once(&executor, &notifications, &target).await {
                                    error!(server = %target.server, error = %e, "notification poll failed");
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    info!(server = %target.server, "notification poller shutting down");
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

async fn poll_once(
    executor: &Arc<dyn ToolExecutor>,
    notifications: &Arc<NotificationService>,
    target: &PollTarget,
) -> Result<(), String> {
    let args = serde_json::json!({"lookahead_minutes": target.lookahead_minutes});
    let result = executor.execute(&target.server, &target.tool_name, args).await?;
    let items = result.as_array().cloned().unwrap_or_default();
    for item in items {
        let Some(req) = parse_ingest_request(&item) else { continue };
        // Duplicates (matching dedup_key within the suppression window) are
        // silently dropped by NotificationService::ingest itself.
        let _ = notifications.ingest(req).await;
    }
    Ok(())
}

fn parse_ingest_request(item: &Value) -> Option<IngestRequest> {
    Some(IngestRequest {
        event_type: item.get("event_type")?.as_str()?.to_string(),
        title: item.get("title")?.as_str()?.to_string(),
        message: item.get("message")?.as_str()?.to_string(),
        urgency: UrgencyInput::Auto,
        room_name: item.get("room_name").and_then(|v| v.as_str()).map(str::to_string),
        data: item.get("data").cloned(),
        tts: item.get("tts").and_then(|v| v.as_bool()),
        enrich: item.get("enrich").and_then(|v| v.as_bool()).unwrap_or(false),
        dedup_key: item.get("dedup_key").and_then(|v| v.as_str()).map(str::to_string),
    })
}
