// Integration tests for the National Grid client
//
// These tests run the full stack (token cache, session manager, retry executor
// and client facade) against a mockito HTTP server.

mod common;

use std::sync::Arc;

use mockito::Matcher;
use serde_json::json;
use tracing::Level;
use tracing_subscriber::prelude::*;

use common::{test_config, CaptureLayer, CountingExchange};
use natgrid_client::{
    GraphQlRequest, NatGridError, NationalGridClient, RestRequest, RetryPolicy,
};

fn client(server_url: &str, exchange: Arc<CountingExchange>) -> NationalGridClient {
    NationalGridClient::with_exchange(test_config(server_url), exchange).unwrap()
}

fn accounts_query() -> GraphQlRequest {
    GraphQlRequest::new("query Accounts { user { accountLinks { nodes { billingAccountId } } } }")
}

// ==================================================================================================
// GraphQL
// ==================================================================================================

#[tokio::test]
async fn test_graphql_request_carries_auth_and_subscription_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .match_header("authorization", "Bearer token-1")
        .match_header("ocp-apim-subscription-key", "test-subscription-key")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "query": "query Accounts { user { accountLinks { nodes { billingAccountId } } } }"
        })))
        .with_status(200)
        .with_body(r#"{"data": {"user": {"accountLinks": {"nodes": []}}}}"#)
        .expect(2)
        .create_async()
        .await;

    let exchange = CountingExchange::new();
    let client = client(&server.url(), exchange.clone());

    let first = client.execute_graphql(&accounts_query()).await.unwrap();
    let second = client.execute_graphql(&accounts_query()).await.unwrap();

    assert!(!first.has_errors());
    assert_eq!(first, second);
    assert_eq!(exchange.calls(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_graphql_errors_are_returned_as_data() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(
            json!({
                "data": null,
                "errors": [{"message": "denied", "extensions": {"code": "FORBIDDEN"}}]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let response = client.execute_graphql(&accounts_query()).await.unwrap();

    assert!(response.has_errors());
    match response.raise_on_errors() {
        Err(NatGridError::GraphQl { count, codes }) => {
            assert_eq!(count, 1);
            assert_eq!(codes, vec!["FORBIDDEN".to_string()]);
        }
        other => panic!("expected GraphQl error, got {:?}", other),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_graphql_endpoint_override() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/other-gql")
        .with_status(200)
        .with_body(r#"{"data": {"ok": true}}"#)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let request = accounts_query().with_endpoint(format!("{}/other-gql", server.url()));
    let response = client.execute_graphql(&request).await.unwrap();

    assert_eq!(response.data, Some(json!({"ok": true})));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_ping() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .match_body(Matcher::PartialJson(json!({"query": "query Ping { __typename }"})))
        .with_status(200)
        .with_body(r#"{"data": {"__typename": "Query"}}"#)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    assert!(client.ping().await.unwrap());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_login_context_records_subject() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(r#"{"data": {}}"#)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::with_subject("user-42"));
    assert!(client.login_context().await.is_empty());

    client.execute_graphql(&accounts_query()).await.unwrap();
    assert_eq!(client.login_context().await.subject(), Some("user-42"));
}

#[tokio::test]
async fn test_undecodable_body_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let err = client.execute_graphql(&accounts_query()).await.unwrap_err();

    assert_eq!(err.category(), "data_shape");
    mock.assert_async().await;
}

// ==================================================================================================
// Re-authentication
// ==================================================================================================

#[tokio::test]
async fn test_unauthorized_triggers_exactly_one_reauthentication() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("POST", "/graphql")
        .match_header("authorization", "Bearer token-1")
        .with_status(401)
        .with_body("expired")
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/graphql")
        .match_header("authorization", "Bearer token-2")
        .with_status(200)
        .with_body(r#"{"data": {"ok": true}}"#)
        .expect(1)
        .create_async()
        .await;

    let exchange = CountingExchange::new();
    let client = client(&server.url(), exchange.clone());
    let response = client.execute_graphql(&accounts_query()).await.unwrap();

    assert_eq!(response.data, Some(json!({"ok": true})));
    assert_eq!(exchange.calls(), 2);
    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_repeated_unauthorized_is_raised() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(401)
        .with_body("still unauthorized")
        .expect(2)
        .create_async()
        .await;

    let exchange = CountingExchange::new();
    let client = client(&server.url(), exchange.clone());
    let err = client.execute_graphql(&accounts_query()).await.unwrap_err();

    assert!(matches!(err, NatGridError::ClientRequest { status: 401, .. }));
    assert_eq!(err.category(), "unauthorized");
    assert_eq!(exchange.calls(), 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_requests_share_one_token_refresh() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .match_header("authorization", "Bearer token-1")
        .with_status(200)
        .with_body(r#"{"data": {}}"#)
        .expect(8)
        .create_async()
        .await;

    let exchange = CountingExchange::new();
    let client = Arc::new(client(&server.url(), exchange.clone()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.execute_graphql(&accounts_query()).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(exchange.calls(), 1);
    assert_eq!(client.sessions().sessions_created(), 1);
    mock.assert_async().await;
}

// ==================================================================================================
// Retry
// ==================================================================================================

#[tokio::test]
async fn test_client_error_short_circuits() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(400)
        .with_body("bad request")
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let err = client.execute_graphql(&accounts_query()).await.unwrap_err();

    match err {
        NatGridError::ClientRequest {
            status,
            attempt,
            ref context,
            ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(attempt, 1);
            assert_eq!(context.method, "POST");
            assert_eq!(context.operation.as_deref(), Some("Accounts"));
        }
        ref other => panic!("expected ClientRequest, got {:?}", other),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("POST", "/graphql")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let recovered = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(r#"{"data": {"ok": true}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let response = client.execute_graphql(&accounts_query()).await.unwrap();

    assert_eq!(response.data, Some(json!({"ok": true})));
    failing.assert_async().await;
    recovered.assert_async().await;
}

#[tokio::test]
async fn test_retry_exhaustion() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(503)
        .with_body("unavailable")
        .expect(3)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let err = client.execute_graphql(&accounts_query()).await.unwrap_err();

    match err {
        NatGridError::RetryExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last_error,
                NatGridError::TransientServer { status: 503, attempt: 3, .. }
            ));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_mutation_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let request = GraphQlRequest::new("mutation UpdateNickname { ok }");
    let err = client.execute_graphql(&request).await.unwrap_err();

    assert!(matches!(err, NatGridError::TransientServer { status: 503, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_connection_refused_is_retried() {
    // Reserve a port, then free it so nothing is listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let config = test_config(&url).with_retry(RetryPolicy {
        max_attempts: 2,
        initial_delay: std::time::Duration::from_millis(5),
        max_delay: std::time::Duration::from_millis(10),
        ..RetryPolicy::default()
    });
    let client = NationalGridClient::with_exchange(config, CountingExchange::new()).unwrap();
    let err = client.execute_graphql(&accounts_query()).await.unwrap_err();

    match err {
        NatGridError::RetryExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_error.category(), "connectivity");
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
}

// ==================================================================================================
// REST
// ==================================================================================================

#[tokio::test]
async fn test_rest_get_with_params() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/amiadapter-cu-uwp-sys/v1/interval/reads/1001/2002")
        .match_header("authorization", "Bearer token-1")
        .match_query(Matcher::UrlEncoded(
            "StartDateTime".into(),
            "2024-01-01 00:00:00".into(),
        ))
        .with_status(200)
        .with_header("x-request-id", "abc")
        .with_body(r#"[{"value": 1.5}]"#)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let request = RestRequest::get("amiadapter-cu-uwp-sys/v1/interval/reads/1001/2002")
        .with_param("StartDateTime", "2024-01-01 00:00:00");
    let response = client.execute_rest(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.data, json!([{"value": 1.5}]));
    assert_eq!(response.headers.get("x-request-id").map(String::as_str), Some("abc"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rest_empty_body_is_null() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("DELETE", "/api/items/1")
        .with_status(204)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let response = client
        .execute_rest(&RestRequest::new(reqwest::Method::DELETE, "/items/1"))
        .await
        .unwrap();

    assert_eq!(response.status, 204);
    assert!(response.data.is_null());
}

#[tokio::test]
async fn test_rest_post_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/orders")
        .match_body(Matcher::Json(json!({"quantity": 1})))
        .with_status(502)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), CountingExchange::new());
    let request = RestRequest::post("orders")
        .with_json(&json!({"quantity": 1}))
        .unwrap();
    let err = client.execute_rest(&request).await.unwrap_err();

    assert_eq!(err.status(), Some(502));
    assert_eq!(err.category(), "transient_server");
    mock.assert_async().await;
}

// ==================================================================================================
// Session lifecycle
// ==================================================================================================

#[tokio::test]
async fn test_closed_session_is_recreated() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(r#"{"data": {}}"#)
        .expect(2)
        .create_async()
        .await;

    let exchange = CountingExchange::new();
    let client = client(&server.url(), exchange.clone());

    client.execute_graphql(&accounts_query()).await.unwrap();
    assert_eq!(client.sessions().current_generation().await, Some(1));

    client.close().await;
    assert_eq!(client.sessions().current_generation().await, None);

    client.execute_graphql(&accounts_query()).await.unwrap();
    assert_eq!(client.sessions().current_generation().await, Some(2));
    assert_eq!(client.sessions().sessions_created(), 2);

    // Closing the session keeps the token
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn test_anonymous_client_sends_no_authorization() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(r#"{"data": {}}"#)
        .create_async()
        .await;

    let config = natgrid_client::ClientConfig::default()
        .with_endpoint(format!("{}/graphql", server.url()));
    let client = NationalGridClient::new(config).unwrap();
    client.execute_graphql(&accounts_query()).await.unwrap();

    mock.assert_async().await;
}

// ==================================================================================================
// Logging
// ==================================================================================================

#[tokio::test]
async fn test_logs_never_contain_secrets() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/graphql")
        .match_header("authorization", "Bearer token-1")
        .with_status(401)
        .with_body("SENSITIVE-BODY-401")
        .create_async()
        .await;
    server
        .mock("POST", "/graphql")
        .match_header("authorization", "Bearer token-2")
        .with_status(400)
        .with_body("SENSITIVE-BODY-400")
        .create_async()
        .await;

    let capture = CaptureLayer::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let client = client(&server.url(), CountingExchange::new());
    let err = client.execute_graphql(&accounts_query()).await.unwrap_err();
    assert_eq!(err.status(), Some(400));

    let events = capture.events();
    assert!(!events.is_empty());
    for event in &events {
        assert!(!event.text.contains("token-1"), "token leaked: {}", event.text);
        assert!(!event.text.contains("token-2"), "token leaked: {}", event.text);
        assert!(!event.text.contains("hunter2"), "password leaked: {}", event.text);
    }

    // Bodies only at debug
    for event in capture.at_least(Level::INFO) {
        assert!(!event.text.contains("SENSITIVE-BODY"), "body leaked: {}", event.text);
    }
    assert!(events
        .iter()
        .any(|event| event.level == Level::DEBUG && event.text.contains("SENSITIVE-BODY-400")));

    // Failures are summarized at warn with their category
    let warnings = capture.at_least(Level::WARN);
    assert!(warnings.iter().any(|event| event.text.contains("category=unauthorized")));
    assert!(warnings.iter().any(|event| event.text.contains("category=client_request")));
}

#[tokio::test]
async fn test_graphql_error_payload_is_only_logged_at_debug() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(
            json!({
                "data": null,
                "errors": [{
                    "message": "account 1001 belongs to SENSITIVE-HOLDER",
                    "extensions": {"code": "FORBIDDEN"}
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let capture = CaptureLayer::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let client = client(&server.url(), CountingExchange::new());
    let response = client.execute_graphql(&accounts_query()).await.unwrap();
    assert!(response.has_errors());

    for event in capture.at_least(Level::INFO) {
        assert!(!event.text.contains("SENSITIVE-HOLDER"), "payload leaked: {}", event.text);
    }

    let warnings = capture.at_least(Level::WARN);
    assert!(warnings
        .iter()
        .any(|event| event.text.contains("count=1") && event.text.contains("FORBIDDEN")));

    assert!(capture
        .events()
        .iter()
        .any(|event| event.level == Level::DEBUG && event.text.contains("SENSITIVE-HOLDER")));
}
