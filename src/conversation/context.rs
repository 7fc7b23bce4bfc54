use super::controller::MessageLifecycle;
use super::store::SessionStore;
use super::types::{Message, Session, SessionSummary};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

/// Result of a [`ConversationContext::send`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    NoActiveSession,
    EmptyMessage,
    /// Another send is still in flight on this context.
    Busy,
    Completed(Message),
}

/// Everything a presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub sessions: Vec<SessionSummary>,
    pub active_session_id: Option<String>,
    pub messages: Vec<Message>,
    pub is_sending: bool,
}

/// Stateful façade over the session store and message lifecycle.
///
/// Caches the session list and the active session's messages, refreshing
/// them after every mutation, and allows one send at a time.
pub struct ConversationContext {
    lifecycle: MessageLifecycle,
    view: Mutex<ConversationSnapshot>,
    updates: watch::Sender<ConversationSnapshot>,
}

/// Returns the context to idle when a send settles or its future is dropped.
struct SendingGuard<'a> {
    context: &'a ConversationContext,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        let mut view = self.context.view();
        view.is_sending = false;
        self.context.refresh(&mut view);
        self.context.publish(&view);
    }
}

fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "session-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

impl ConversationContext {
    /// Load existing sessions and activate the most recent one, creating a
    /// first session when the store is empty.
    pub fn new(lifecycle: MessageLifecycle) -> Self {
        let (updates, _) = watch::channel(ConversationSnapshot::default());
        let context = Self {
            lifecycle,
            view: Mutex::new(ConversationSnapshot::default()),
            updates,
        };

        let most_recent = context.store().list_all().into_iter().next();
        match most_recent {
            Some(session) => {
                context.select_session(&session.id);
            }
            None => {
                context.create_session();
            }
        }
        context
    }

    fn store(&self) -> &dyn SessionStore {
        self.lifecycle.store().as_ref()
    }

    fn view(&self) -> MutexGuard<'_, ConversationSnapshot> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, view: &mut ConversationSnapshot) {
        view.sessions = self
            .store()
            .list_all()
            .iter()
            .map(Session::summary)
            .collect();
        view.messages = view
            .active_session_id
            .as_deref()
            .map(|id| self.store().messages(id))
            .unwrap_or_default();
    }

    fn publish(&self, view: &ConversationSnapshot) {
        self.updates.send_replace(view.clone());
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut ConversationSnapshot) -> T) -> T {
        let mut view = self.view();
        let result = apply(&mut view);
        self.refresh(&mut view);
        self.publish(&view);
        result
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.view().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.updates.subscribe()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.view().active_session_id.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.view().is_sending
    }

    /// Make `session_id` active. Unknown ids are rejected and leave the
    /// current selection in place.
    pub fn select_session(&self, session_id: &str) -> bool {
        if self.store().get(session_id).is_none() {
            return false;
        }
        self.mutate(|view| view.active_session_id = Some(session_id.to_string()));
        true
    }

    /// Create a fresh session, activate it, and return its id.
    pub fn create_session(&self) -> String {
        let session_id = new_session_id();
        self.store().get_or_create(&session_id, None);
        self.mutate(|view| view.active_session_id = Some(session_id.clone()));
        tracing::debug!(session_id = session_id.as_str(), "Activated new session");
        session_id
    }

    pub fn rename(&self, session_id: &str, name: &str) -> bool {
        self.mutate(|_| self.store().rename(session_id, name))
    }

    /// Empty a session and drop the completion context kept for it.
    pub fn clear(&self, session_id: &str) -> bool {
        let cleared = self.mutate(|_| self.store().clear(session_id));
        if cleared {
            self.lifecycle.completion().forget(session_id);
        }
        cleared
    }

    /// Delete a session. When it was active, the most recently updated
    /// remaining session becomes active, or a new one is created.
    pub fn delete(&self, session_id: &str) -> bool {
        let mut view = self.view();
        if !self.store().delete(session_id) {
            return false;
        }
        self.lifecycle.completion().forget(session_id);

        if view.active_session_id.as_deref() == Some(session_id) {
            let successor = match self.store().list_all().into_iter().next() {
                Some(session) => session.id,
                None => {
                    let fresh = new_session_id();
                    self.store().get_or_create(&fresh, None);
                    fresh
                }
            };
            view.active_session_id = Some(successor);
        }

        self.refresh(&mut view);
        self.publish(&view);
        true
    }

    /// Drop the completion context of every session; the sessions stay.
    pub fn release(&self) {
        for session in self.store().list_all() {
            self.lifecycle.completion().forget(&session.id);
        }
    }

    /// Send `text` in the active session.
    ///
    /// Rejected without side effects when there is no active session, the
    /// text is blank, or a send is already in flight.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let text = text.trim();
        let session_id = {
            let mut view = self.view();
            let Some(session_id) = view.active_session_id.clone() else {
                return SendOutcome::NoActiveSession;
            };
            if text.is_empty() {
                return SendOutcome::EmptyMessage;
            }
            if view.is_sending {
                tracing::debug!(session_id = session_id.as_str(), "Send rejected, busy");
                return SendOutcome::Busy;
            }
            view.is_sending = true;
            self.publish(&view);
            session_id
        };

        let _guard = SendingGuard { context: self };
        let message = self
            .lifecycle
            .run_observed(&session_id, text, || {
                let mut view = self.view();
                self.refresh(&mut view);
                self.publish(&view);
            })
            .await;
        SendOutcome::Completed(message)
    }
}
