#![allow(dead_code)]

use clubllm::config::Config;
use clubllm::gateway::run_gateway_with_listener;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PASSWORD: &str = "hunter22";

/// A gateway on an ephemeral port, talking to a mock completion endpoint.
pub struct TestGateway {
    port: u16,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    pub llm: MockServer,
    pub client: reqwest::Client,
    _workspace: TempDir,
}

impl TestGateway {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customize: impl FnOnce(&mut Config)) -> Self {
        let workspace = TempDir::new().expect("temp workspace should be created");
        let llm = MockServer::start().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral gateway listener should bind");
        let port = listener
            .local_addr()
            .expect("ephemeral gateway listener should expose local address")
            .port();

        let mut config = Config::default();
        config.workspace_dir = workspace.path().to_path_buf();
        config.config_path = workspace.path().join("config.toml");
        config.api_key = Some("sk-test-key".to_string());
        config.provider.base_url = llm.uri();
        config.persistence.base_backoff_ms = 10;
        customize(&mut config);

        let config = Arc::new(config);
        let host = "127.0.0.1".to_string();
        let handle =
            tokio::spawn(async move { run_gateway_with_listener(&host, listener, config).await });

        wait_until_gateway_ready(port).await;

        Self {
            port,
            handle,
            llm,
            client: reqwest::Client::new(),
            _workspace: workspace,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// Make every completion answer `reply`.
    pub async fn reply_with(&self, reply: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": reply } }]
            })))
            .mount(&self.llm)
            .await;
    }

    /// Make every completion answer `reply`, but only after `delay`.
    pub async fn reply_after(&self, reply: &str, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "choices": [{ "message": { "role": "assistant", "content": reply } }]
                    }))
                    .set_delay(delay),
            )
            .mount(&self.llm)
            .await;
    }

    /// Sign an existing account in and return a fresh session token.
    pub async fn sign_in(&self, email: &str) -> String {
        let response = self
            .client
            .post(self.url("/api/auth/signin"))
            .json(&json!({ "email": email, "password": PASSWORD }))
            .send()
            .await
            .expect("signin request should complete");
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.expect("signin body should be json");
        body["token"]
            .as_str()
            .expect("signin should return a token")
            .to_string()
    }

    /// Make every completion fail upstream.
    pub async fn fail_completions(&self) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(502).set_body_string(r#"{"error":"upstream down"}"#),
            )
            .mount(&self.llm)
            .await;
    }

    /// Register an account and return its session token.
    pub async fn sign_up(&self, email: &str) -> String {
        let response = self
            .client
            .post(self.url("/api/auth/signup"))
            .json(&json!({ "email": email, "password": PASSWORD, "name": "Test" }))
            .send()
            .await
            .expect("signup request should complete");
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.expect("signup body should be json");
        body["token"]
            .as_str()
            .expect("signup should return a token")
            .to_string()
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("GET should complete")
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("POST should complete")
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn wait_until_gateway_ready(port: u16) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .expect("reqwest client should be built");

    for _ in 0..200 {
        let health = client
            .get(format!("http://127.0.0.1:{port}/api/health"))
            .send()
            .await;
        if matches!(health, Ok(resp) if resp.status() == StatusCode::OK) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("gateway did not become ready on port {port}");
}

pub fn error_message(body: &Value) -> &str {
    body.get("error").and_then(Value::as_str).unwrap_or_default()
}
