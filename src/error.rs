use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `ClubLLM`.
///
/// Each subsystem defines its own error variant. Callers that need to pick a
/// recovery strategy (the HTTP gateway mapping auth failures to status codes,
/// for instance) match on these; internal plumbing keeps using
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum ChatError {
    // ── Completion provider ─────────────────────────────────────────────
    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    // ── Authentication ──────────────────────────────────────────────────
    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    // ── Durable chat history ────────────────────────────────────────────
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Completion provider errors ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider {provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("provider {provider} API key not set")]
    MissingApiKey { provider: String },

    #[error("provider {provider} returned no content")]
    EmptyResponse { provider: String },

    #[error("completion timed out after {secs}s")]
    Timeout { secs: u64 },
}

// ─── Authentication errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("user with this email already exists")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthenticated,

    #[error("user not found")]
    UserNotFound,
}

// ─── Persistence errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database: {0}")]
    Database(String),
}

impl From<sqlx::Error> for ChatError {
    fn from(error: sqlx::Error) -> Self {
        Self::Persistence(PersistenceError::Database(error.to_string()))
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
