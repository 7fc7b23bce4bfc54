use super::{ApiError, AppState, error_response};
use crate::auth::User;
use crate::error::{AuthError, ChatError};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, header};

pub const AUTH_COOKIE_NAME: &str = "auth-token";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE_NAME)
        .map(|(_, value)| value.trim())
        .filter(|token| !token.is_empty())
}

/// Session token from `Authorization: Bearer` or, failing that, the auth cookie.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| cookie_token(headers))
}

pub(crate) fn session_cookie(token: &str, max_age_secs: u64, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{AUTH_COOKIE_NAME}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age_secs}{secure}"
    ))
    .ok()
}

pub(crate) fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("auth-token=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0")
}

/// Authenticated caller; rejects with 401 when no live token is presented.
pub(crate) struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Err(error_response(&ChatError::Auth(
                AuthError::Unauthenticated,
            )));
        };
        match state.auth.authenticate(token).await {
            Ok(user) => Ok(Self(user)),
            // A token for a deleted account is just as unusable as a bad one.
            Err(ChatError::Auth(AuthError::UserNotFound)) => Err(error_response(
                &ChatError::Auth(AuthError::Unauthenticated),
            )),
            Err(e) => Err(error_response(&e)),
        }
    }
}
