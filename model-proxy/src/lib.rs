//! Model service proxy (component J): a small HTTP layer that forwards
//! `/v1/chat/completions` requests to an upstream LLM endpoint chosen by
//! substring-matching the request's `model` field against an ordered rule
//! list, retrying transient upstream failures with exponential backoff.
//! Grounded on `rock/sdk/model/server/api/proxy.py` and
//! `rock/sdk/model/service.py`; the axum router shape follows the same
//! pattern used for the sandbox admin surface.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::TryStreamExt;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::{ProxyConfig, ProxyRule};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build proxy http client");
        Self { config: Arc::new(config), client }
    }
}

/// Headers dropped when forwarding a request upstream or a response back to
/// the caller: recomputed by the HTTP layer on each hop
/// (`rock/sdk/model/server/api/proxy.py` filters the same four).
const STRIP_HEADERS: &[&str] = &["content-length", "content-type", "host", "transfer-encoding"];

fn filtered_headers(headers: &HeaderMap) -> Vec<(HeaderName, axum::http::HeaderValue)> {
    headers
        .iter()
        .filter(|(name, _)| !STRIP_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/{*target_path}", get(passthrough_get))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

async fn send_with_retry(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: &str,
    headers: Vec<(HeaderName, axum::http::HeaderValue)>,
    body: Bytes,
    retryable_status_codes: &[u16],
    max_attempts: u32,
) -> Result<reqwest::Response, SandboxProxyError> {
    let mut last_err: Option<reqwest::Error> = None;

    for attempt in 1..=max_attempts.max(1) {
        let mut request = client.request(method.clone(), url);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body.clone());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let retryable = retryable_status_codes.contains(&status.as_u16());
                if status.is_success() || !retryable || attempt == max_attempts {
                    return Ok(response);
                }
                warn!(%status, attempt, "upstream returned retryable status, backing off");
            }
            Err(err) => {
                if attempt == max_attempts {
                    return Err(SandboxProxyError::Upstream(err.to_string()));
                }
                warn!(error = %err, attempt, "upstream request failed, backing off");
                last_err = Some(err);
            }
        }

        let backoff = Duration::from_millis(100 * 2u64.pow(attempt.saturating_sub(1)));
        tokio::time::sleep(backoff).await;
    }

    Err(SandboxProxyError::Upstream(
        last_err.map(|e| e.to_string()).unwrap_or_else(|| "retries exhausted".to_string()),
    ))
}

#[derive(Debug)]
pub enum SandboxProxyError {
    NoUpstream,
    Upstream(String),
}

impl IntoResponse for SandboxProxyError {
    fn into_response(self) -> Response {
        match self {
            SandboxProxyError::NoUpstream => {
                (StatusCode::BAD_GATEWAY, Json(json!({"error": "no upstream configured for model"}))).into_response()
            }
            SandboxProxyError::Upstream(err) => {
                (StatusCode::BAD_GATEWAY, Json(json!({"error": format!("upstream request failed: {err}")}))).into_response()
            }
        }
    }
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, SandboxProxyError> {
    let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let model = parsed.get("model").and_then(Value::as_str).unwrap_or("");
    let stream_requested = parsed.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let upstream_url = state.config.resolve_upstream(model).ok_or(SandboxProxyError::NoUpstream)?.to_string();

    let forward_headers = filtered_headers(&headers);
    let response = send_with_retry(
        &state.client,
        reqwest::Method::POST,
        &upstream_url,
        forward_headers,
        body,
        &state.config.retryable_status_codes,
        state.config.max_attempts,
    )
    .await?;

    build_passthrough_response(response, stream_requested)
}

async fn passthrough_get(
    State(state): State<AppState>,
    Path(target_path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, SandboxProxyError> {
    let base = state.config.base_url.as_deref().or(state.config.default_url.as_deref()).ok_or(SandboxProxyError::NoUpstream)?;
    let url = format!("{}/{}", base.trim_end_matches('/'), target_path.trim_start_matches('/'));

    let forward_headers = filtered_headers(&headers);
    let response = send_with_retry(
        &state.client,
        reqwest::Method::GET,
        &url,
        forward_headers,
        Bytes::new(),
        &state.config.retryable_status_codes,
        state.config.max_attempts,
    )
    .await?;

    build_passthrough_response(response, false)
}

/// Builds the downstream response from an upstream `reqwest::Response`,
/// streaming the body live rather than buffering it whole — required for
/// `stream: true` chat completions, but harmless for ordinary JSON bodies
/// too (§4.J: "forward the response, streaming if requested").
fn build_passthrough_response(response: reqwest::Response, _stream_requested: bool) -> Result<Response, SandboxProxyError> {
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers().iter() {
        if STRIP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    builder
        .body(Body::from_stream(stream))
        .map_err(|err| SandboxProxyError::Upstream(format!("failed to build response: {err}")))
}

pub async fn wait_service_available(base_url: &str, client: &reqwest::Client, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let health_url = format!("{}/health", base_url.trim_end_matches('/'));
    loop {
        if let Ok(resp) = client.get(&health_url).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

pub fn log_startup(config: &ProxyConfig) {
    info!(
        host = %config.host,
        port = config.port,
        rules = config.rules.len(),
        has_default = config.default_url.is_some(),
        "model proxy configured"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_and_framing_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", "10".parse().unwrap());
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        let filtered = filtered_headers(&headers);
        assert!(filtered.iter().all(|(n, _)| n != "content-length"));
        assert!(filtered.iter().any(|(n, _)| n == "authorization"));
    }
}
