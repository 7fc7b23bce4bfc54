use super::harness::{TestGateway, error_message};
use clubllm::conversation::APOLOGY_TEXT;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;

async fn snapshot(gw: &TestGateway, token: &str) -> Value {
    let response = gw.get("/api/conversation", token).await;
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

fn active_id(snapshot: &Value) -> String {
    snapshot["activeSessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn conversation_requires_auth() {
    let gw = TestGateway::start().await;
    let response = gw.client.get(gw.url("/api/conversation")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_resolves_reply_and_persists_exchange() {
    let gw = TestGateway::start().await;
    gw.reply_with("Hi there").await;
    let token = gw.sign_up("erin@example.com").await;

    let initial = snapshot(&gw, &token).await;
    assert_eq!(initial["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(initial["isSending"], false);
    let session_id = active_id(&initial);

    let sent = gw
        .post("/api/conversation/messages", &token, json!({ "text": "Hello" }))
        .await;
    assert_eq!(sent.status(), StatusCode::OK);
    let body: Value = sent.json().await.unwrap();
    assert_eq!(body["message"]["role"], "assistant");
    assert_eq!(body["message"]["status"], "sent");
    assert_eq!(body["message"]["text"], "Hi there");
    let messages = body["state"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["text"], "Hello");

    // The exchange is written in the background.
    let path = format!("/api/chat-history?tabId={session_id}");
    let mut history = Vec::new();
    for _ in 0..100 {
        let body: Value = gw.get(&path, &token).await.json().await.unwrap();
        history = body["history"].as_array().cloned().unwrap_or_default();
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["message"], "Hello");
    assert_eq!(history[0]["response"], "Hi there");
}

#[tokio::test]
async fn failed_send_shows_apology_and_is_not_persisted() {
    let gw = TestGateway::start().await;
    gw.fail_completions().await;
    let token = gw.sign_up("frank@example.com").await;
    let session_id = active_id(&snapshot(&gw, &token).await);

    let body: Value = gw
        .post("/api/conversation/messages", &token, json!({ "text": "timeout" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["message"]["status"], "error");
    assert_eq!(body["message"]["text"], APOLOGY_TEXT);
    assert!(body["message"]["errorMessage"].is_string());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let history: Value = gw
        .get(&format!("/api/chat-history?tabId={session_id}"), &token)
        .await
        .json()
        .await
        .unwrap();
    assert!(history["history"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let gw = TestGateway::start().await;
    let token = gw.sign_up("gail@example.com").await;

    let response = gw
        .post("/api/conversation/messages", &token, json!({ "text": "   " }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(error_message(&body), "Message is empty");
    assert!(snapshot(&gw, &token).await["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn session_management_routes() {
    let gw = TestGateway::start().await;
    let token = gw.sign_up("hank@example.com").await;
    let first = active_id(&snapshot(&gw, &token).await);

    let created = gw
        .post("/api/conversation/sessions", &token, json!({}))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created: Value = created.json().await.unwrap();
    let second = active_id(&created);
    assert_ne!(first, second);
    assert_eq!(created["sessions"].as_array().unwrap().len(), 2);

    let selected = gw
        .post(&format!("/api/conversation/sessions/{first}/select"), &token, json!({}))
        .await;
    assert_eq!(selected.status(), StatusCode::OK);
    assert_eq!(active_id(&selected.json().await.unwrap()), first);

    let unknown = gw
        .post("/api/conversation/sessions/nope/select", &token, json!({}))
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(active_id(&snapshot(&gw, &token).await), first);

    let renamed = gw
        .client
        .patch(gw.url(&format!("/api/conversation/sessions/{second}")))
        .bearer_auth(&token)
        .json(&json!({ "name": "Work" }))
        .send()
        .await
        .unwrap();
    assert_eq!(renamed.status(), StatusCode::OK);
    let renamed: Value = renamed.json().await.unwrap();
    assert!(
        renamed["sessions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["id"] == second.as_str() && s["name"] == "Work")
    );

    let blank = gw
        .client
        .patch(gw.url(&format!("/api/conversation/sessions/{second}")))
        .bearer_auth(&token)
        .json(&json!({ "name": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let deleted = gw
        .client
        .delete(gw.url(&format!("/api/conversation/sessions/{first}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    let deleted: Value = deleted.json().await.unwrap();
    assert_eq!(active_id(&deleted), second);
    assert_eq!(deleted["sessions"].as_array().unwrap().len(), 1);

    let again = gw
        .client
        .delete(gw.url(&format!("/api/conversation/sessions/{first}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clear_empties_the_session() {
    let gw = TestGateway::start().await;
    gw.reply_with("pong").await;
    let token = gw.sign_up("ivy@example.com").await;
    let session_id = active_id(&snapshot(&gw, &token).await);

    gw.post("/api/conversation/messages", &token, json!({ "text": "ping" }))
        .await;
    let cleared = gw
        .post(
            &format!("/api/conversation/sessions/{session_id}/clear"),
            &token,
            json!({}),
        )
        .await;
    assert_eq!(cleared.status(), StatusCode::OK);
    let cleared: Value = cleared.json().await.unwrap();
    assert!(cleared["messages"].as_array().unwrap().is_empty());
    assert_eq!(cleared["sessions"][0]["messageCount"], 0);
}

#[tokio::test]
async fn stalled_completion_resolves_to_apology_before_http_timeout() {
    let gw = TestGateway::start_with(|config| config.conversation.send_timeout_secs = 1).await;
    gw.reply_after("too late", Duration::from_secs(3)).await;
    let token = gw.sign_up("jude@example.com").await;

    let response = gw
        .post("/api/conversation/messages", &token, json!({ "text": "anyone there?" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"]["status"], "error");
    assert_eq!(body["message"]["text"], APOLOGY_TEXT);
    assert!(
        body["message"]["errorMessage"]
            .as_str()
            .unwrap()
            .contains("timed out")
    );
    assert_eq!(body["state"]["isSending"], false);
}

#[tokio::test]
async fn signout_drops_in_memory_sessions() {
    let gw = TestGateway::start().await;
    let token = gw.sign_up("kim@example.com").await;
    let first = active_id(&snapshot(&gw, &token).await);
    gw.post("/api/conversation/sessions", &token, json!({})).await;
    assert_eq!(
        snapshot(&gw, &token).await["sessions"].as_array().unwrap().len(),
        2
    );

    let signout = gw
        .client
        .post(gw.url("/api/auth/signout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(signout.status(), StatusCode::OK);

    let token = gw.sign_in("kim@example.com").await;
    let fresh = snapshot(&gw, &token).await;
    assert_eq!(fresh["sessions"].as_array().unwrap().len(), 1);
    assert_ne!(active_id(&fresh), first);
}
