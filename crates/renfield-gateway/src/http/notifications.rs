//! `/api/notifications/*` and `/api/notifications/reminders/*`. Webhook
//! ingestion also pushes a `ChatNotification` envelope to every live `/ws`
//! client — `NotificationService::ingest`'s own delivery step only reaches
//! registered devices, never chat connections.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use renfield_core::reminder::Reminder;
use renfield_core::UserId;
use renfield_notify::service::verify_webhook_token;
use renfield_notify::types::{IngestRequest, Notification};
use renfield_protocol::envelopes::ChatNotification;
use renfield_protocol::methods;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub room_name: Option<String>,
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, GatewayError> {
    Ok(Json(state.notifications.list_active(query.room_name.as_deref())?))
}

/// POST /api/notifications/webhook — bearer token compared constant-time
/// against the value in `system_setting`, rotatable via `token_handler`.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<Notification>), GatewayError> {
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let expected = state.notifications.webhook_token()?;
    if !verify_webhook_token(&expected, provided) {
        return Err(GatewayError(renfield_core::RenfieldError::AuthFailed("invalid webhook token".to_string())));
    }

    let notification = state.notifications.ingest(req).await?;

    let envelope = ChatNotification {
        kind: methods::CHAT_NOTIFICATION,
        id: notification.id.clone(),
        title: notification.title.clone(),
        message: notification.message.clone(),
        urgency: notification.urgency.to_string(),
        room: notification.room_name.clone(),
        // Delivery to a spoken room already routed through devices above;
        // chat clients get the text only and decide locally whether to speak it.
        tts_handled: false,
    };
    if let Ok(payload) = serde_json::to_string(&envelope) {
        state.chat_connections.broadcast(payload);
    }

    Ok((StatusCode::CREATED, Json(notification)))
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// POST /api/notifications/token — admin operation, rotates the webhook
/// bearer token and returns the new value once (never listed or re-shown).
pub async fn token_handler(State(state): State<Arc<AppState>>) -> Result<Json<TokenResponse>, GatewayError> {
    Ok(Json(TokenResponse { token: state.notifications.rotate_webhook_token()? }))
}

pub async fn get_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<Notification>, GatewayError> {
    Ok(Json(state.notifications.get(&id)?))
}

pub async fn acknowledge_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<(), GatewayError> {
    state.notifications.acknowledge(&id)?;
    Ok(())
}

pub async fn delete_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<(), GatewayError> {
    state.notifications.dismiss(&id)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ReminderQuery {
    pub user_id: String,
}

pub async fn list_reminders_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReminderQuery>,
) -> Result<Json<Vec<Reminder>>, GatewayError> {
    Ok(Json(state.reminders.list_for_user(&query.user_id)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    pub user_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

pub async fn create_reminder_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateReminderRequest>,
) -> Result<Json<Reminder>, GatewayError> {
    let reminder = Reminder::new(UserId::from(req.user_id), req.scheduled_at, req.title, req.body);
    state.reminders.create(&reminder)?;
    Ok(Json(reminder))
}

pub async fn cancel_reminder_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<(), GatewayError> {
    state.reminders.cancel(&id)?;
    Ok(())
}
