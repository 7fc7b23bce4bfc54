use super::store::{Exchange, ExchangeSink};
use crate::config::PersistenceConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const MAX_BACKOFF_MS: u64 = 5_000;

/// Bounded exponential backoff for exchange writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff_ms: config.base_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.base_backoff_ms
                .saturating_mul(factor)
                .min(MAX_BACKOFF_MS),
        )
    }
}

/// Fire-and-forget hand-off of completed exchanges to durable storage.
///
/// Without a caller identity nothing is persisted. Write failures are logged
/// and retried per the policy; they never reach the conversation.
#[derive(Clone)]
pub struct PersistenceBridge {
    sink: Arc<dyn ExchangeSink>,
    identity: Option<String>,
    retry: RetryPolicy,
}

impl PersistenceBridge {
    pub fn new(sink: Arc<dyn ExchangeSink>, identity: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            sink,
            identity,
            retry,
        }
    }

    /// Spawn the write; `None` when there is no identity to attribute it to.
    pub fn persist(
        &self,
        conversation_id: &str,
        user_text: String,
        assistant_text: String,
    ) -> Option<JoinHandle<()>> {
        let Some(user_id) = self.identity.clone() else {
            tracing::debug!(conversation_id, "No caller identity, exchange not persisted");
            return None;
        };

        let exchange = Exchange::new(user_id, conversation_id, user_text, assistant_text);
        let sink = Arc::clone(&self.sink);
        let retry = self.retry;
        Some(tokio::spawn(async move {
            write_with_retry(sink.as_ref(), &exchange, retry).await;
        }))
    }
}

async fn write_with_retry(sink: &dyn ExchangeSink, exchange: &Exchange, retry: RetryPolicy) {
    for attempt in 0..=retry.max_retries {
        match sink.record(exchange).await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!(
                        conversation_id = exchange.conversation_id.as_str(),
                        attempt,
                        "Exchange persisted after retries"
                    );
                }
                return;
            }
            Err(e) if attempt < retry.max_retries => {
                tracing::warn!(
                    conversation_id = exchange.conversation_id.as_str(),
                    attempt = attempt + 1,
                    max_retries = retry.max_retries,
                    "Exchange write failed, retrying: {e:#}"
                );
                tokio::time::sleep(retry.backoff(attempt)).await;
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = exchange.conversation_id.as_str(),
                    user_id = exchange.user_id.as_str(),
                    "Dropping exchange after {} attempts: {e:#}",
                    retry.max_retries + 1
                );
            }
        }
    }
}
