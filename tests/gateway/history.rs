use super::harness::{TestGateway, error_message};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn saved_exchanges_are_scoped_to_user_and_tab() {
    let gw = TestGateway::start().await;
    let alice = gw.sign_up("alice@example.com").await;
    let bob = gw.sign_up("bob@example.com").await;

    for (message, tab) in [("first", "tab-1"), ("second", "tab-1"), ("elsewhere", "tab-2")] {
        let saved = gw
            .post(
                "/api/chat-history",
                &alice,
                json!({ "message": message, "response": format!("re: {message}"), "tabId": tab }),
            )
            .await;
        assert_eq!(saved.status(), StatusCode::CREATED);
        let body: Value = saved.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["exchange"]["tabId"], tab);
    }

    let tab = gw.get("/api/chat-history?tabId=tab-1", &alice).await;
    assert_eq!(tab.status(), StatusCode::OK);
    let body: Value = tab.json().await.unwrap();
    let history = body["history"].as_array().unwrap();
    let messages: Vec<&str> = history.iter().map(|e| e["message"].as_str().unwrap()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert_eq!(history[0]["response"], "re: first");
    assert!(history[0]["timestamp"].is_string());

    let all: Value = gw.get("/api/chat/history", &alice).await.json().await.unwrap();
    let messages: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["elsewhere", "second", "first"]);

    let others: Value = gw.get("/api/chat/history", &bob).await.json().await.unwrap();
    assert!(others.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn history_requires_auth_and_fields() {
    let gw = TestGateway::start().await;
    let token = gw.sign_up("dana@example.com").await;

    let anonymous = gw
        .client
        .get(gw.url("/api/chat-history?tabId=tab-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let no_tab = gw.get("/api/chat-history", &token).await;
    assert_eq!(no_tab.status(), StatusCode::BAD_REQUEST);
    let body: Value = no_tab.json().await.unwrap();
    assert_eq!(error_message(&body), "Tab ID is required");

    let incomplete = gw
        .post("/api/chat-history", &token, json!({ "message": "hi", "tabId": "t" }))
        .await;
    assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);
    let body: Value = incomplete.json().await.unwrap();
    assert_eq!(error_message(&body), "Message, response, and tabId are required");
}
