// ── Infrastructure ───────────────────────────────────────────────────────────
pub mod http_client;
pub mod scrub;
pub mod traits;

// ── Provider implementations ────────────────────────────────────────────────
pub mod openrouter;

// ── Re-exports ──────────────────────────────────────────────────────────────
pub use http_client::build_provider_client_with_timeout;
pub use openrouter::OpenRouterCompletion;
pub use scrub::{api_error, sanitize_api_error, scrub_secret_patterns};
pub use traits::CompletionProvider;
