use super::harness::{TestGateway, error_message};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn chat_proxy_returns_completion() {
    let gw = TestGateway::start().await;
    gw.reply_with("Hi there").await;

    let response = gw
        .client
        .post(gw.url("/api/chat"))
        .json(&json!({ "message": "Hello", "chatId": "tab-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["response"], "Hi there");

    let requests = gw.llm.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.last().unwrap()["content"], "Hello");
}

#[tokio::test]
async fn chat_proxy_keeps_history_per_chat_id() {
    let gw = TestGateway::start().await;
    gw.reply_with("ok").await;

    for (message, chat_id) in [("one", json!(7)), ("two", json!("7")), ("other", json!("8"))] {
        let response = gw
            .client
            .post(gw.url("/api/chat"))
            .json(&json!({ "message": message, "tabId": chat_id }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let requests = gw.llm.received_requests().await.unwrap();
    let message_counts: Vec<usize> = requests
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["messages"].as_array().unwrap().len()
        })
        .collect();
    // system + user, then system + 2 history + user, then a fresh chat.
    assert_eq!(message_counts, vec![2, 4, 2]);
}

#[tokio::test]
async fn chat_proxy_validates_and_hides_upstream_errors() {
    let gw = TestGateway::start().await;

    let missing = gw
        .client
        .post(gw.url("/api/chat"))
        .json(&json!({ "message": "Hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(error_message(&body), "Message and chatId are required");

    gw.fail_completions().await;
    let failed = gw
        .client
        .post(gw.url("/api/chat"))
        .json(&json!({ "message": "Hello", "chatId": "tab-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = failed.json().await.unwrap();
    assert_eq!(error_message(&body), "An error occurred processing your request");
    assert!(!body.to_string().contains("upstream down"));
}
