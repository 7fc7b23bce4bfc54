use super::extract::AuthUser;
use super::{ApiError, AppState, api_error};
use crate::conversation::{
    ConversationContext, ConversationSnapshot, InMemorySessionStore, MessageLifecycle, SendOutcome,
};
use crate::llm::CompletionProvider;
use crate::persistence::{ExchangeSink, PersistenceBridge, RetryPolicy};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One conversation façade per signed-in user, each over its own in-memory
/// session store and bound to that user's identity for persistence.
///
/// Contexts idle for longer than `idle_ttl` are dropped on the next lookup,
/// together with the completion context of their sessions.
pub struct ConversationRegistry {
    contexts: Mutex<HashMap<String, ContextEntry>>,
    completion: Arc<dyn CompletionProvider>,
    sink: Option<Arc<dyn ExchangeSink>>,
    retry: RetryPolicy,
    send_timeout: Duration,
    idle_ttl: Duration,
}

struct ContextEntry {
    context: Arc<ConversationContext>,
    last_seen: Instant,
}

impl ConversationRegistry {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        sink: Option<Arc<dyn ExchangeSink>>,
        retry: RetryPolicy,
        send_timeout: Duration,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            completion,
            sink,
            retry,
            send_timeout,
            idle_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ContextEntry>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The caller's façade, created on first use.
    pub fn for_user(&self, user_id: &str) -> Arc<ConversationContext> {
        let now = Instant::now();
        let mut contexts = self.lock();
        self.sweep_idle(&mut contexts, now);

        if let Some(entry) = contexts.get_mut(user_id) {
            entry.last_seen = now;
            return Arc::clone(&entry.context);
        }

        let mut lifecycle = MessageLifecycle::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::clone(&self.completion),
            self.send_timeout,
        );
        if let Some(sink) = &self.sink {
            lifecycle = lifecycle.with_bridge(PersistenceBridge::new(
                Arc::clone(sink),
                Some(user_id.to_string()),
                self.retry,
            ));
        }

        let context = Arc::new(ConversationContext::new(lifecycle));
        contexts.insert(
            user_id.to_string(),
            ContextEntry {
                context: Arc::clone(&context),
                last_seen: now,
            },
        );
        tracing::debug!(user_id, "Created conversation context");
        context
    }

    /// Drop a user's façade, e.g. on sign-out. A send still in flight
    /// finishes against the detached context.
    pub fn remove(&self, user_id: &str) -> bool {
        let Some(entry) = self.lock().remove(user_id) else {
            return false;
        };
        entry.context.release();
        tracing::debug!(user_id, "Dropped conversation context");
        true
    }

    fn sweep_idle(&self, contexts: &mut HashMap<String, ContextEntry>, now: Instant) {
        contexts.retain(|user_id, entry| {
            let idle = now.saturating_duration_since(entry.last_seen) >= self.idle_ttl;
            if !idle || entry.context.is_sending() {
                return true;
            }
            entry.context.release();
            tracing::debug!(user_id = user_id.as_str(), "Evicted idle conversation context");
            false
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

fn unknown_session() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Session not found")
}

/// GET /api/conversation
pub(super) async fn handle_snapshot(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Json<ConversationSnapshot> {
    Json(state.conversations.for_user(&user.id).snapshot())
}

/// POST /api/conversation/sessions
pub(super) async fn handle_create_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> (StatusCode, Json<ConversationSnapshot>) {
    let context = state.conversations.for_user(&user.id);
    context.create_session();
    (StatusCode::CREATED, Json(context.snapshot()))
}

/// POST /api/conversation/sessions/{id}/select
pub(super) async fn handle_select_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let context = state.conversations.for_user(&user.id);
    if !context.select_session(&session_id) {
        return Err(unknown_session());
    }
    Ok(Json(context.snapshot()))
}

#[derive(Debug, Deserialize)]
pub(super) struct RenameBody {
    name: Option<String>,
}

/// PATCH /api/conversation/sessions/{id}
pub(super) async fn handle_rename_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<String>,
    body: Result<Json<RenameBody>, JsonRejection>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let name = body
        .ok()
        .and_then(|Json(b)| b.name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Name is required"))?;

    let context = state.conversations.for_user(&user.id);
    if !context.rename(&session_id, &name) {
        return Err(unknown_session());
    }
    Ok(Json(context.snapshot()))
}

/// POST /api/conversation/sessions/{id}/clear
pub(super) async fn handle_clear_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let context = state.conversations.for_user(&user.id);
    if !context.clear(&session_id) {
        return Err(unknown_session());
    }
    Ok(Json(context.snapshot()))
}

/// DELETE /api/conversation/sessions/{id}
pub(super) async fn handle_delete_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let context = state.conversations.for_user(&user.id);
    if !context.delete(&session_id) {
        return Err(unknown_session());
    }
    Ok(Json(context.snapshot()))
}

#[derive(Debug, Deserialize)]
pub(super) struct SendBody {
    #[serde(default)]
    text: String,
}

/// POST /api/conversation/messages
pub(super) async fn handle_send(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let text = body.map(|Json(b)| b.text).unwrap_or_default();
    let context = state.conversations.for_user(&user.id);

    // Sends run to completion even if the client goes away mid-request.
    let sender = Arc::clone(&context);
    let outcome = tokio::spawn(async move { sender.send(&text).await })
        .await
        .map_err(|e| {
            tracing::error!("Conversation send task failed: {e}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        })?;

    match outcome {
        SendOutcome::Completed(message) => Ok(Json(serde_json::json!({
            "message": message,
            "state": context.snapshot(),
        }))),
        SendOutcome::EmptyMessage => Err(api_error(StatusCode::BAD_REQUEST, "Message is empty")),
        SendOutcome::Busy => Err(api_error(
            StatusCode::CONFLICT,
            "A message is already being sent",
        )),
        SendOutcome::NoActiveSession => {
            Err(api_error(StatusCode::CONFLICT, "No active session"))
        }
    }
}
