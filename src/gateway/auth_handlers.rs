use super::extract::{AuthUser, clear_session_cookie, session_cookie, session_token};
use super::{ApiError, AppState, api_error, error_response};
use crate::auth::User;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(super) struct SignUpBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SignInBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

fn signed_in_response(state: &AppState, user: &User, token: &str) -> Response {
    let max_age = state.config.auth.token_ttl_hours.saturating_mul(3600);
    let mut response = Json(serde_json::json!({ "success": true, "user": user, "token": token }))
        .into_response();
    if let Some(cookie) = session_cookie(token, max_age, state.config.auth.cookie_secure) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

fn invalid_body(rejection: &JsonRejection) -> ApiError {
    tracing::debug!("Rejected auth body: {rejection}");
    api_error(StatusCode::BAD_REQUEST, "Email and password are required")
}

/// POST /api/auth/signup
pub(super) async fn handle_signup(
    State(state): State<AppState>,
    body: Result<Json<SignUpBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| invalid_body(&e))?;
    let (user, token) = state
        .auth
        .sign_up(&body.email, &body.password, body.name.as_deref())
        .await
        .map_err(|e| error_response(&e))?;
    Ok(signed_in_response(&state, &user, &token))
}

/// POST /api/auth/signin
pub(super) async fn handle_signin(
    State(state): State<AppState>,
    body: Result<Json<SignInBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| invalid_body(&e))?;
    let (user, token) = state
        .auth
        .sign_in(&body.email, &body.password)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(signed_in_response(&state, &user, &token))
}

/// POST /api/auth/signout: revoke whatever token came with the request and
/// drop the caller's in-memory conversation.
pub(super) async fn handle_signout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        if let Ok(user) = state.auth.authenticate(token).await {
            state.conversations.remove(&user.id);
        }
        if let Err(e) = state.auth.sign_out(token).await {
            tracing::warn!("Sign-out revoke failed: {e}");
        }
    }
    let mut response = Json(serde_json::json!({ "success": true })).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie());
    response
}

/// GET /api/auth/me
pub(super) async fn handle_me(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(serde_json::json!({ "user": user }))
}
