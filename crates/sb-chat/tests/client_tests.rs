//! HTTP chat client tests
//!
//! Tests for:
//! - Successful reply delivery
//! - Retry on 5xx
//! - No retry on 4xx config errors
//! - Typing toggle endpoint

use std::time::Duration;

use sb_chat::{ChatClient, ChatError, HttpChatClient, HttpChatClientConfig};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpChatClient {
    HttpChatClient::new(HttpChatClientConfig {
        base_url: server.uri(),
        account_id: "1".to_string(),
        api_token: "test-token".to_string(),
        timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        max_retries: 3,
        retry_delays: vec![Duration::from_millis(10), Duration::from_millis(10)],
        gate_trip_after: 10,
        gate_cool_off: Duration::from_secs(1),
    })
}

#[tokio::test]
async fn send_reply_posts_outgoing_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/1/conversations/C1/messages"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.send_reply("C1", "hola").await.unwrap();
}

#[tokio::test]
async fn transient_error_is_retried() {
    let server = MockServer::start().await;

    // First two attempts fail with 500, third succeeds.
    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/1/conversations/C1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/1/conversations/C1/messages"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.send_reply("C1", "hola").await.unwrap();
}

#[tokio::test]
async fn config_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/1/conversations/C1/messages"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.send_reply("C1", "hola").await.unwrap_err();
    match err {
        ChatError::Config { status, .. } => assert_eq!(status, 404),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[tokio::test]
async fn typing_toggle_hits_status_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/1/conversations/C1/toggle_typing_status"))
        .and(query_param("typing_status", "on"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.set_typing("C1", true).await.unwrap();
}

#[tokio::test]
async fn apology_uses_fixed_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/1/conversations/C9/messages"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.send_apology("C9").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["content"], sb_chat::APOLOGY_MESSAGE);
    assert_eq!(body["message_type"], "outgoing");
}
