use super::auth_handlers::{handle_me, handle_signin, handle_signout, handle_signup};
use super::conversation::{
    ConversationRegistry, handle_clear_session, handle_create_session, handle_delete_session,
    handle_rename_session, handle_select_session, handle_send, handle_snapshot,
};
use super::handlers::{
    handle_chat, handle_health, handle_save_history, handle_tab_history, handle_user_history,
};
use super::{AppState, MAX_BODY_SIZE, REQUEST_TIMEOUT_MARGIN_SECS};

use crate::auth::AuthService;
use crate::config::Config;
use crate::db;
use crate::llm::{CompletionProvider, OpenRouterCompletion};
use crate::persistence::{ExchangeSink, RetryPolicy, SqliteExchangeStore};
use anyhow::{Context, Result};
use axum::{
    Router,
    http::{Method, StatusCode, header},
    routing::{get, patch, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Returns true when the bind address is not a loopback address.
fn is_public_bind(host: &str) -> bool {
    !matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "[::1]" | "0:0:0:0:0:0:0:1"
    )
}

/// Bind `host:port` and serve until the process stops.
pub async fn run_gateway(host: &str, port: u16, config: Arc<Config>) -> Result<()> {
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the gateway would be reachable from other machines.\n\
             Fix: use --host 127.0.0.1 (default) or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let listener = bind_listener(host, port).await?;
    run_gateway_with_listener(host, listener, config).await
}

/// Bind a hostname or IP literal; bracketed IPv6 (`[::1]`) is accepted too.
async fn bind_listener(host: &str, port: u16) -> Result<tokio::net::TcpListener> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("bind gateway socket on {host}:{port}"))
}

/// Open the database and wire every shared service the handlers need.
pub async fn build_state(config: Arc<Config>) -> Result<AppState> {
    let database_path = config.database_path();
    let pool = db::open_pool(&database_path).await?;

    let auth = AuthService::new(pool.clone(), &config.auth)
        .await
        .context("initialize account storage")?;
    match auth.purge_expired().await {
        Ok(0) => {}
        Ok(purged) => tracing::info!(purged, "Removed expired session tokens"),
        Err(e) => tracing::warn!("Expired token cleanup failed: {e}"),
    }
    let exchanges = SqliteExchangeStore::new(pool)
        .await
        .context("initialize chat history storage")?;

    let completion: Arc<dyn CompletionProvider> = Arc::new(OpenRouterCompletion::from_config(&config));
    if config.api_key.is_none() {
        tracing::warn!("No API key configured; completions will fail until one is set");
    }

    let sink: Option<Arc<dyn ExchangeSink>> = if config.persistence.enabled {
        Some(Arc::new(exchanges.clone()))
    } else {
        tracing::info!("Conversation persistence disabled");
        None
    };
    let conversations = Arc::new(ConversationRegistry::new(
        Arc::clone(&completion),
        sink,
        RetryPolicy::from_config(&config.persistence),
        Duration::from_secs(config.conversation.send_timeout_secs),
        Duration::from_secs(config.conversation.idle_ttl_secs),
    ));

    Ok(AppState {
        config,
        auth,
        exchanges,
        completion,
        conversations,
    })
}

/// Run the HTTP gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    host: &str,
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
) -> Result<()> {
    let actual_port = listener
        .local_addr()
        .context("get gateway listener local address")?
        .port();
    let display_addr = format!("{host}:{actual_port}");

    let state = build_state(config).await?;
    print_gateway_banner(&display_addr, &state);

    let app = build_app(state);
    axum::serve(listener, app)
        .await
        .context("serve HTTP gateway")?;

    Ok(())
}

fn print_gateway_banner(display_addr: &str, state: &AppState) {
    println!("ClubLLM gateway listening on http://{display_addr}");
    println!("  GET  /api/health");
    println!("  POST /api/auth/{{signup,signin,signout}}  GET /api/auth/me");
    println!("  POST /api/chat");
    println!("  GET  /api/chat-history?tabId=  POST /api/chat-history  GET /api/chat/history");
    println!("  /api/conversation/...");
    println!("  Model: {}", state.config.model);
    println!("  Database: {}", state.config.database_path().display());
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let origin = origin.trim();
    if origin.is_empty() {
        return None;
    }
    let Ok(value) = origin.parse::<header::HeaderValue>() else {
        tracing::warn!(origin, "Ignoring unparseable CORS origin");
        return None;
    };
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::exact(value))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
    )
}

/// Per-request deadline: outlasts both the conversation send timeout and the
/// provider's HTTP timeout.
fn request_timeout(config: &Config) -> Duration {
    let slowest = config
        .conversation
        .send_timeout_secs
        .max(config.provider.request_timeout_secs);
    Duration::from_secs(slowest.saturating_add(REQUEST_TIMEOUT_MARGIN_SECS))
}

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origin);
    let timeout = request_timeout(&state.config);

    let app = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/auth/signup", post(handle_signup))
        .route("/api/auth/signin", post(handle_signin))
        .route("/api/auth/signout", post(handle_signout))
        .route("/api/auth/me", get(handle_me))
        .route("/api/chat", post(handle_chat))
        .route(
            "/api/chat-history",
            get(handle_tab_history).post(handle_save_history),
        )
        .route("/api/chat/history", get(handle_user_history))
        .route("/api/conversation", get(handle_snapshot))
        .route("/api/conversation/sessions", post(handle_create_session))
        .route(
            "/api/conversation/sessions/{id}",
            patch(handle_rename_session).delete(handle_delete_session),
        )
        .route(
            "/api/conversation/sessions/{id}/select",
            post(handle_select_session),
        )
        .route(
            "/api/conversation/sessions/{id}/clear",
            post(handle_clear_session),
        )
        .route("/api/conversation/messages", post(handle_send));

    let mut app = app
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ));

    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    app
}
