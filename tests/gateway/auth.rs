use super::harness::{PASSWORD, TestGateway, error_message};
use reqwest::StatusCode;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::{Value, json};

#[tokio::test]
async fn signup_signin_me_and_signout_round_trip() {
    let gw = TestGateway::start().await;

    let signup = gw
        .client
        .post(gw.url("/api/auth/signup"))
        .json(&json!({ "email": "  Ada@Example.com ", "password": PASSWORD, "name": "Ada" }))
        .send()
        .await
        .expect("signup should complete");
    assert_eq!(signup.status(), StatusCode::OK);
    let cookie = signup
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("signup should set the auth cookie")
        .to_string();
    assert!(cookie.starts_with("auth-token=cl_"));
    assert!(cookie.contains("HttpOnly"));
    let body: Value = signup.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["user"]["name"], "Ada");
    assert!(body["user"].get("passwordHash").is_none());

    let signin = gw
        .client
        .post(gw.url("/api/auth/signin"))
        .json(&json!({ "email": "ada@example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(signin.status(), StatusCode::OK);
    let token = signin.json::<Value>().await.unwrap()["token"]
        .as_str()
        .unwrap()
        .to_string();

    // Cookie and bearer token both authenticate.
    let cookie_pair = cookie.split(';').next().unwrap().to_string();
    let me = gw
        .client
        .get(gw.url("/api/auth/me"))
        .header(COOKIE, cookie_pair.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
    assert_eq!(me.json::<Value>().await.unwrap()["user"]["email"], "ada@example.com");
    assert_eq!(gw.get("/api/auth/me", &token).await.status(), StatusCode::OK);

    let signout = gw
        .client
        .post(gw.url("/api/auth/signout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(signout.status(), StatusCode::OK);
    assert!(
        signout
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("Max-Age=0"))
    );
    assert_eq!(
        gw.get("/api/auth/me", &token).await.status(),
        StatusCode::UNAUTHORIZED
    );

    // The signup session is independent of the revoked one.
    let still = gw
        .client
        .get(gw.url("/api/auth/me"))
        .header(COOKIE, cookie_pair.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(still.status(), StatusCode::OK);
}

#[tokio::test]
async fn signup_validation_and_duplicates() {
    let gw = TestGateway::start().await;

    let missing = gw
        .client
        .post(gw.url("/api/auth/signup"))
        .json(&json!({ "email": "", "password": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(error_message(&body), "Email and password are required");

    let short = gw
        .client
        .post(gw.url("/api/auth/signup"))
        .json(&json!({ "email": "bob@example.com", "password": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);
    let body: Value = short.json().await.unwrap();
    assert!(error_message(&body).contains("at least 6"));

    gw.sign_up("bob@example.com").await;
    let duplicate = gw
        .client
        .post(gw.url("/api/auth/signup"))
        .json(&json!({ "email": "BOB@example.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn bad_credentials_and_missing_tokens_are_unauthorized() {
    let gw = TestGateway::start().await;
    gw.sign_up("carol@example.com").await;

    for (email, password) in [("carol@example.com", "wrong-pass"), ("nobody@example.com", PASSWORD)] {
        let response = gw
            .client
            .post(gw.url("/api/auth/signin"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(error_message(&body), "Invalid email or password");
    }

    let anonymous = gw.client.get(gw.url("/api/auth/me")).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        gw.get("/api/auth/me", "cl_not-a-real-token").await.status(),
        StatusCode::UNAUTHORIZED
    );
}
