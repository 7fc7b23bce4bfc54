use super::store::SessionStore;
use super::types::{Message, MessageState, NewMessage, Role};
use crate::error::LlmError;
use crate::llm::CompletionProvider;
use crate::persistence::PersistenceBridge;
use std::sync::Arc;
use std::time::Duration;

/// Runs one user send through its full lifecycle: user message, pending
/// placeholder, completion call, and exactly one resolution of the placeholder.
pub struct MessageLifecycle {
    store: Arc<dyn SessionStore>,
    completion: Arc<dyn CompletionProvider>,
    bridge: Option<PersistenceBridge>,
    send_timeout: Duration,
}

impl MessageLifecycle {
    pub fn new(
        store: Arc<dyn SessionStore>,
        completion: Arc<dyn CompletionProvider>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            completion,
            bridge: None,
            send_timeout,
        }
    }

    #[must_use]
    pub fn with_bridge(mut self, bridge: PersistenceBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn completion(&self) -> &Arc<dyn CompletionProvider> {
        &self.completion
    }

    /// Send `text` in `session_id` and return the resolved assistant message.
    ///
    /// Completion failures and timeouts resolve the placeholder to `Failed`;
    /// they never surface as errors. Only a successful reply that landed in
    /// the store is handed to the persistence bridge.
    pub async fn run(&self, session_id: &str, text: &str) -> Message {
        self.run_observed(session_id, text, || {}).await
    }

    /// Like [`run`](Self::run), calling `on_pending` once the user message and
    /// placeholder are in the store and before the completion is awaited.
    pub async fn run_observed<F>(&self, session_id: &str, text: &str, on_pending: F) -> Message
    where
        F: FnOnce() + Send,
    {
        self.store.get_or_create(session_id, None);
        self.store.append(session_id, NewMessage::user(text));
        let placeholder = self
            .store
            .append(session_id, NewMessage::assistant_placeholder());
        on_pending();

        let state = match tokio::time::timeout(
            self.send_timeout,
            self.completion.complete(session_id, text),
        )
        .await
        {
            Ok(Ok(reply)) => MessageState::sent(reply),
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id,
                    provider = self.completion.name(),
                    "Completion failed: {e:#}"
                );
                MessageState::failed(format!("{e:#}"))
            }
            Err(_) => {
                let err = LlmError::Timeout {
                    secs: self.send_timeout.as_secs(),
                };
                tracing::warn!(session_id, provider = self.completion.name(), "{err}");
                MessageState::failed(err.to_string())
            }
        };

        let stored = placeholder
            .and_then(|pending| self.store.replace(session_id, &pending.id, state.clone()));
        let Some(resolved) = stored else {
            // Session cleared or deleted mid-flight: nothing is left to attach
            // the reply to, so it is neither stored nor persisted.
            tracing::debug!(session_id, "Session changed while reply was pending");
            return Message {
                id: uuid::Uuid::new_v4().to_string(),
                role: Role::Assistant,
                state,
                timestamp: chrono::Utc::now(),
            };
        };

        if let (Some(bridge), MessageState::Sent { text: reply }) = (&self.bridge, &resolved.state) {
            bridge.persist(session_id, text.to_string(), reply.clone());
        }

        resolved
    }
}
