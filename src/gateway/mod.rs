//! Axum HTTP gateway: accounts, the stateless LLM proxy, chat history and the
//! per-user conversation façade.
//!
//! Every route runs behind a 64KB body limit and a request timeout.

mod auth_handlers;
mod conversation;
mod extract;
mod handlers;
mod server;

pub use conversation::ConversationRegistry;
pub use extract::{AUTH_COOKIE_NAME, session_token};
pub use server::{build_app, build_state, run_gateway, run_gateway_with_listener};

use crate::auth::AuthService;
use crate::config::Config;
use crate::error::{AuthError, ChatError};
use crate::llm::CompletionProvider;
use crate::persistence::SqliteExchangeStore;
use axum::Json;
use axum::http::StatusCode;
use std::sync::Arc;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Slack added on top of the slowest upstream timeout so a stalled completion
/// resolves inside the handler before the HTTP layer gives up on the request.
pub const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 5;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthService,
    pub exchanges: SqliteExchangeStore,
    pub completion: Arc<dyn CompletionProvider>,
    pub conversations: Arc<ConversationRegistry>,
}

pub(crate) type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({ "error": message })))
}

/// Map a crate error onto a status code and a client-safe message.
pub(crate) fn error_response(err: &ChatError) -> ApiError {
    match err {
        ChatError::Auth(AuthError::InvalidInput(message)) => {
            api_error(StatusCode::BAD_REQUEST, message)
        }
        ChatError::Auth(AuthError::EmailTaken) => {
            api_error(StatusCode::CONFLICT, "User with this email already exists")
        }
        ChatError::Auth(AuthError::InvalidCredentials) => {
            api_error(StatusCode::UNAUTHORIZED, "Invalid email or password")
        }
        ChatError::Auth(AuthError::Unauthenticated) => {
            api_error(StatusCode::UNAUTHORIZED, "Authentication required")
        }
        ChatError::Auth(AuthError::UserNotFound) => {
            api_error(StatusCode::NOT_FOUND, "User not found")
        }
        other => {
            tracing::error!("Request failed: {other}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}
