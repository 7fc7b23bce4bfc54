use std::future::Future;
use std::pin::Pin;

/// The completion collaborator behind every assistant reply.
///
/// Implementations may keep per-conversation context keyed by
/// `conversation_id`; the caller only ever supplies the newest user text.
pub trait CompletionProvider: Send + Sync {
    /// Identifier used in logs and error messages.
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        conversation_id: &'a str,
        user_text: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

    /// Drop any context held for `conversation_id`.
    fn forget(&self, _conversation_id: &str) {}
}
