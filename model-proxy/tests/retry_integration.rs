//! End-to-end retry-policy tests for the model service proxy (component J),
//! matching §8 scenario 5: a `429` is retried until the upstream recovers,
//! while a non-retryable status (`401`) is returned to the client unchanged
//! after exactly one upstream call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde_json::{Value, json};

use model_proxy::{AppState, ProxyConfig, ProxyRule, build_router};

#[derive(Clone)]
struct FlakyUpstream {
    calls: Arc<AtomicU32>,
    /// Number of leading calls that should return 429 before succeeding.
    fail_first_n: u32,
    always_unauthorized: bool,
}

async fn mock_completions(State(upstream): State<FlakyUpstream>, Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
    let call = upstream.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if upstream.always_unauthorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid api key"})));
    }
    if call <= upstream.fail_first_n {
        (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "rate limited"})))
    } else {
        (StatusCode::OK, Json(json!({"id": "chatcmpl-1", "choices": []})))
    }
}

async fn spawn_upstream(fail_first_n: u32, unauthorized: bool) -> (SocketAddr, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let state = FlakyUpstream { calls: calls.clone(), fail_first_n, always_unauthorized: unauthorized };
    let app = Router::new().route("/v1/chat/completions", post(mock_completions)).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls)
}

async fn spawn_proxy(upstream_url: String) -> SocketAddr {
    let config = ProxyConfig {
        host: "127.0.0.1".into(),
        port: 0,
        rules: vec![ProxyRule { model_substring: "gpt".into(), url: upstream_url }],
        default_url: None,
        base_url: None,
        retryable_status_codes: vec![429],
        request_timeout: Duration::from_secs(5),
        max_attempts: 3,
    };
    let state = AppState::new(config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn retries_429_until_upstream_recovers() {
    let (upstream_addr, calls) = spawn_upstream(1, false).await;
    let proxy_addr = spawn_proxy(format!("http://{upstream_addr}/v1/chat/completions")).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{proxy_addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(calls.load(Ordering::SeqCst) >= 2, "expected at least one retry before success");
}

#[tokio::test]
async fn non_retryable_status_is_returned_after_exactly_one_call() {
    let (upstream_addr, calls) = spawn_upstream(0, true).await;
    let proxy_addr = spawn_proxy(format!("http://{upstream_addr}/v1/chat/completions")).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{proxy_addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
