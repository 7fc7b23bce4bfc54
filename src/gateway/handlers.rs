use super::extract::AuthUser;
use super::{ApiError, AppState, api_error};
use crate::persistence::{Exchange, ExchangeSink};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

/// GET /api/health
pub(super) async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatBody {
    message: Option<String>,
    /// Clients send either `chatId` or the older `tabId`, as string or number.
    #[serde(rename = "chatId", alias = "tabId")]
    chat_id: Option<Value>,
}

fn conversation_key(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// POST /api/chat: stateless completion proxy keyed by the caller's chat id.
pub(super) async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let missing = || api_error(StatusCode::BAD_REQUEST, "Message and chatId are required");
    let Json(body) = body.map_err(|_| missing())?;
    let message = body
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(missing)?;
    let chat_id = conversation_key(body.chat_id.as_ref()).ok_or_else(missing)?;

    match state.completion.complete(&chat_id, &message).await {
        Ok(response) => Ok(Json(serde_json::json!({ "response": response }))),
        Err(e) => {
            tracing::error!(
                chat_id = chat_id.as_str(),
                provider = state.completion.name(),
                "Chat proxy failed: {e:#}"
            );
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred processing your request",
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    #[serde(rename = "tabId")]
    tab_id: Option<String>,
}

fn history_failure(e: &anyhow::Error) -> ApiError {
    tracing::error!("Chat history query failed: {e:#}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get chat history")
}

/// GET /api/chat-history?tabId=
pub(super) async fn handle_tab_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let tab_id = query
        .tab_id
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Tab ID is required"))?;

    let history = state
        .exchanges
        .history(&user.id, &tab_id)
        .await
        .map_err(|e| history_failure(&e))?;
    Ok(Json(serde_json::json!({ "success": true, "history": history })))
}

/// GET /api/chat/history: every exchange of the caller, newest first.
pub(super) async fn handle_user_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Exchange>>, ApiError> {
    state
        .exchanges
        .history_for_user(&user.id)
        .await
        .map(Json)
        .map_err(|e| history_failure(&e))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SaveExchangeBody {
    message: Option<String>,
    response: Option<String>,
    tab_id: Option<String>,
}

/// POST /api/chat-history
pub(super) async fn handle_save_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<SaveExchangeBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let required = || {
        api_error(
            StatusCode::BAD_REQUEST,
            "Message, response, and tabId are required",
        )
    };
    let Json(body) = body.map_err(|_| required())?;
    let non_empty = |field: Option<String>| field.filter(|v| !v.trim().is_empty());
    let (Some(message), Some(response), Some(tab_id)) = (
        non_empty(body.message),
        non_empty(body.response),
        non_empty(body.tab_id),
    ) else {
        return Err(required());
    };

    let exchange = Exchange::new(user.id, tab_id, message, response);
    state.exchanges.record(&exchange).await.map_err(|e| {
        tracing::error!("Saving chat exchange failed: {e:#}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save chat")
    })?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "exchange": exchange })),
    ))
}
