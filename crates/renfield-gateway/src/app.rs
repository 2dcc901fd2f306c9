//! Central composition root: owns every subsystem collaborator and wires the
//! trait seams each crate exposes to the concrete implementations in
//! `collaborators.rs`. Mirrors how each subsystem crate's own tests build a
//! minimal instance of itself, scaled up to the whole binary.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use renfield_agent::gateway::LlmGateway;
use renfield_core::circuit_breaker::CircuitBreaker;
use renfield_core::clock::SystemClock;
use renfield_core::config::RenfieldConfig;
use renfield_devices::DeviceManager;
use renfield_memory::MemoryManager;
use renfield_notify::poller::{NotificationPoller, PollTarget};
use renfield_notify::reminder_scheduler::{ReminderScheduler, ReminderStore};
use renfield_notify::service::NotificationService;
use renfield_retrieval::feedback::FeedbackRetriever;
use renfield_retrieval::retriever::KnowledgeRetriever;
use renfield_sessions::manager::SessionManager;
use renfield_tools::registry::ToolRegistry;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::collaborators::{
    DeviceActiveRoomLookup, HttpSpeakerId, HttpStt, HttpTts, LlmConflictClassifier, LlmEmbedder, LlmEnricher,
    LlmUrgencyClassifier, RegistryToolExecutor, ToolRegistrySmartHome,
};
use crate::error::GatewayError;
use crate::ws::connection::ConnectionRegistry;

/// Everything an Axum handler needs, shared behind a single `Arc`.
pub struct AppState {
    pub config: RenfieldConfig,
    pub llm: Arc<LlmGateway>,
    pub memory: Arc<MemoryManager>,
    pub knowledge: Arc<KnowledgeRetriever>,
    pub feedback: Arc<FeedbackRetriever>,
    pub tools: Arc<ToolRegistry>,
    pub devices: Arc<DeviceManager>,
    pub sessions: Arc<SessionManager>,
    pub notifications: Arc<NotificationService>,
    pub reminders: Arc<ReminderStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub conflict_classifier: Arc<LlmConflictClassifier>,
    pub stt: Arc<HttpStt>,
    pub tts: Arc<HttpTts>,
    pub speaker_id: Option<Arc<HttpSpeakerId>>,
    /// Registered chat WS connections (conn_id -> outbound sender), so a
    /// notification ingested off a REST call or the poller can reach a live
    /// browser client without going back through `/ws` (§4.14 step 9).
    pub chat_connections: ConnectionRegistry,
    pub auth_disabled: bool,
}

fn open_db(path: &str) -> rusqlite::Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

impl AppState {
    pub async fn new(config: RenfieldConfig) -> Result<Arc<Self>, GatewayError> {
        let breaker = Arc::new(CircuitBreaker::new(Box::new(SystemClock)));

        let llm = Arc::new(LlmGateway::new(&config.llm, config.embedding_dimension, breaker.clone()));

        let memory_conn = open_db(&config.database.path)?;
        renfield_memory::db::init_db(&memory_conn)?;
        let memory = Arc::new(MemoryManager::new(memory_conn));

        let retrieval_conn = open_db(&config.database.path)?;
        renfield_retrieval::db::init_db(&retrieval_conn)?;
        let knowledge = Arc::new(KnowledgeRetriever::new(retrieval_conn));
        let feedback_conn = open_db(&config.database.path)?;
        renfield_retrieval::db::init_db(&feedback_conn)?;
        let feedback = Arc::new(FeedbackRetriever::new(feedback_conn));

        let auth_disabled = !config.gateway.auth_enabled;
        let tools = Arc::new(ToolRegistry::new(
            breaker.clone(),
            Duration::from_secs(config.mcp.call_timeout_secs),
            config.mcp.max_response_size,
            auth_disabled,
        ));
        if config.mcp.enabled {
            if let Err(e) = tools.connect_from_manifest(&config.mcp.config_path).await {
                warn!(error = %e, "capability server manifest load failed, continuing with no tools");
            }
            tools.spawn_health_refresh(Duration::from_secs(config.mcp.refresh_interval_secs));
        }

        let devices = Arc::new(DeviceManager::new(config.ws.heartbeat_timeout_secs as i64));

        let sessions_conn = open_db(&config.database.path)?;
        renfield_sessions::db::init_db(&sessions_conn)?;
        let sessions = Arc::new(SessionManager::new(sessions_conn, renfield_core::config::MAX_AUDIO_BUFFER_BYTES));

        let notify_conn = open_db(&config.database.path)?;
        renfield_notify::db::init_db(&notify_conn)?;
        let notify_config = renfield_notify::service::NotificationConfig {
            suppression_window_secs: config.proactive.suppression_window_secs,
            semantic_dedup_enabled: config.proactive.semantic_dedup_enabled,
            semantic_dedup_threshold: config.proactive.semantic_dedup_threshold,
            urgency_auto_enabled: config.proactive.urgency_auto_enabled,
            enrichment_enabled: config.proactive.enrichment_enabled,
            enrichment_timeout_secs: config.proactive.enrichment_timeout_secs,
            notification_ttl_secs: config.proactive.notification_ttl_secs,
            tts_default: config.proactive.tts_default,
        };
        let smart_home: Arc<dyn renfield_devices::output_router::SmartHomeMediaState> =
            Arc::new(ToolRegistrySmartHome::new(tools.clone()));
        let mut notifications = NotificationService::new(notify_conn, notify_config, devices.clone(), smart_home)
            .with_classifier(Arc::new(LlmUrgencyClassifier::new(llm.clone())))
            .with_embedder(Arc::new(LlmEmbedder::new(llm.clone())));
        if config.proactive.enrichment_enabled {
            notifications = notifications.with_enricher(Arc::new(LlmEnricher::new(llm.clone())));
        }

        let voice_timeout = Duration::from_secs(config.voice.timeout_secs);
        let tts = Arc::new(HttpTts::new(config.voice.tts_url.clone(), voice_timeout));
        notifications = notifications.with_tts(tts.clone());
        let notifications = Arc::new(notifications);

        let reminders_conn = open_db(&config.database.path)?;
        renfield_notify::db::init_db(&reminders_conn)?;
        let reminders = Arc::new(ReminderStore::new(reminders_conn));

        let stt = Arc::new(HttpStt::new(config.voice.stt_url.clone(), voice_timeout));
        let speaker_id = config
            .voice
            .speaker_id_url
            .clone()
            .map(|url| Arc::new(HttpSpeakerId::new(url, voice_timeout)));

        let conflict_classifier = Arc::new(LlmConflictClassifier::new(llm.clone()));

        Ok(Arc::new(Self {
            config,
            llm,
            memory,
            knowledge,
            feedback,
            tools,
            devices,
            sessions,
            notifications,
            reminders,
            breaker,
            conflict_classifier,
            stt,
            tts,
            speaker_id,
            chat_connections: ConnectionRegistry::default(),
            auth_disabled,
        }))
    }

    /// Starts every background loop (reminder scheduler, proactive event
    /// poller) that runs for the life of the process. Returns their join
    /// handles so `main` can await them on shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.config.proactive.poller_enabled {
            let executor = Arc::new(RegistryToolExecutor::new(self.tools.clone()));
            let poller = NotificationPoller::new(executor, self.notifications.clone());
            let targets = self.poll_targets();
            handles.extend(poller.spawn_all(targets, shutdown.clone()));
        }

        let rooms = Arc::new(DeviceActiveRoomLookup::new(self.devices.clone(), self.sessions.clone()));
        let scheduler = ReminderScheduler::new(self.reminders.clone(), self.notifications.clone(), rooms)
            .with_check_interval_secs(self.config.proactive.reminder_check_interval_secs);
        let shutdown_for_scheduler = shutdown.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run(shutdown_for_scheduler).await;
        }));

        info!("background tasks started");
        handles
    }

    /// §4.15: one `PollTarget` per capability server manifest entry that
    /// opted into proactive notifications.
    fn poll_targets(&self) -> Vec<PollTarget> {
        let manifests = match renfield_tools::load_manifests(&self.config.mcp.config_path) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "could not load manifests for notification polling");
                return Vec::new();
            }
        };
        manifests
            .into_iter()
            .filter_map(|m| {
                let n = m.notifications?;
                if !n.enabled {
                    return None;
                }
                Some(PollTarget {
                    server: m.name,
                    tool_name: n.tool_name,
                    poll_interval: Duration::from_secs(n.poll_interval_secs),
                    lookahead_minutes: 60,
                })
            })
            .collect()
    }

    pub fn smart_home(&self) -> ToolRegistrySmartHome {
        ToolRegistrySmartHome::new(self.tools.clone())
    }
}

/// Assembles the full Axum router: chat/device/satellite WebSockets, the
/// REST surface, and Prometheus metrics exposition.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/metrics", get(crate::http::metrics::metrics_handler))
        .route("/ws", get(crate::ws::connection::chat_ws_handler))
        .route("/ws/device", get(crate::ws::connection::device_ws_handler))
        .route("/ws/satellite", get(crate::ws::connection::satellite_ws_handler))
        .route("/api/chat/send", post(crate::http::chat::send_handler))
        .route("/api/voice/stt", post(crate::http::voice::stt_handler))
        .route("/api/voice/tts", post(crate::http::voice::tts_handler))
        .route("/api/voice/tts-cache/{id}", get(crate::http::voice::tts_cache_handler))
        .route("/api/notifications", get(crate::http::notifications::list_handler))
        .route("/api/notifications/webhook", post(crate::http::notifications::webhook_handler))
        .route("/api/notifications/token", post(crate::http::notifications::token_handler))
        .route(
            "/api/notifications/{id}",
            get(crate::http::notifications::get_handler).delete(crate::http::notifications::delete_handler),
        )
        .route("/api/notifications/{id}/acknowledge", patch(crate::http::notifications::acknowledge_handler))
        .route(
            "/api/notifications/reminders",
            get(crate::http::notifications::list_reminders_handler).post(crate::http::notifications::create_reminder_handler),
        )
        .route(
            "/api/notifications/reminders/{id}",
            delete(crate::http::notifications::cancel_reminder_handler),
        )
        .route("/api/mcp/status", get(crate::http::mcp::status_handler))
        .route("/api/mcp/tools", get(crate::http::mcp::tools_handler))
        .route("/api/mcp/refresh", post(crate::http::mcp::refresh_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
