//! The HTTP admin surface (component K): a thin REST layer serializing the
//! manager/proxy API onto the paths in §6 of the accompanying specification.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use sandbox_runtime::auth::extract_bearer_token;
use sandbox_runtime::error::{Result, SandboxError};
use sandbox_runtime::rate_limit::{read_rate_limit, write_rate_limit};
use sandbox_runtime::types::{DeploymentConfig, UserInfo};
use sandbox_runtime::worker_client::{BashAction, CloseBashSessionRequest, CreateBashSessionRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Headers that must not be forwarded across the proxy boundary, either
/// request- or response-side (§4.H: "strip hop-by-hop").
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let read_routes = Router::new()
        .route("/sandboxes/{id}/status", get(get_status))
        .route("/sandboxes/{id}/mount", get(get_mount))
        .route("/sandboxes/{id}/statistics", get(get_statistics))
        .route_layer(middleware::from_fn(read_rate_limit));

    let write_routes = Router::new()
        .route("/sandboxes", post(submit))
        .route("/sandboxes/{id}/stop", post(stop))
        .route("/sandboxes/{id}/commit", post(commit))
        .route("/sandboxes/{id}/sessions", post(create_session))
        .route("/sandboxes/{id}/sessions/run", post(run_in_session))
        .route("/sandboxes/{id}/sessions/close", post(close_session))
        .route("/sandboxes/{id}/execute", post(execute))
        .route("/sandboxes/{id}/read_file", post(read_file))
        .route("/sandboxes/{id}/write_file", post(write_file))
        .route("/sandboxes/{id}/upload", post(upload))
        .route("/sandboxes/{id}/proxy/{*target_path}", post(proxy_passthrough))
        .route_layer(middleware::from_fn(write_rate_limit));

    let authenticated = Router::new()
        .merge(read_routes)
        .merge(write_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_auth));

    let ambient = Router::new().route("/health", get(health)).route("/metrics", get(metrics));

    Router::new()
        .merge(authenticated)
        .merge(ambient)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(cors)
}

async fn require_bearer_auth(State(state): State<AppState>, request: axum::extract::Request, next: Next) -> Response {
    if state.admin_tokens.is_disabled() {
        // No tokens configured: auth is disabled (local development only).
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match extract_bearer_token(header) {
        Ok(token) if state.admin_tokens.accepts(token) => next.run(request).await,
        Ok(_) => SandboxError::Auth("invalid bearer token".into()).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "uptime_secs": sandbox_runtime::metrics::uptime_secs()}))
}

async fn metrics() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        sandbox_runtime::metrics::metrics().render_prometheus(),
    )
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(flatten)]
    config: DeploymentConfig,
    #[serde(default)]
    user_info: UserInfo,
}

async fn submit(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> Result<impl IntoResponse> {
    let response = state.manager.submit(req.config, req.user_info).await?;
    Ok(Json(response))
}

async fn get_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let response = state.manager.get_status(&id).await?;
    Ok(Json(response))
}

async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    state.manager.stop(&id).await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
struct CommitRequest {
    image_tag: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn commit(State(state): State<AppState>, Path(id): Path<String>, Json(req): Json<CommitRequest>) -> Result<impl IntoResponse> {
    let result = state.manager.commit(&id, &req.image_tag, &req.username, &req.password).await?;
    Ok(Json(result))
}

async fn get_mount(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let mount = state.manager.get_mount(&id).await?;
    Ok(Json(mount))
}

async fn get_statistics(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let stats = state.manager.get_sandbox_statistics(&id).await?;
    Ok(Json(stats))
}

async fn create_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateBashSessionRequest>,
) -> Result<impl IntoResponse> {
    let response = state.proxy.create_session(&id, &req.session_name).await?;
    Ok(Json(response))
}

async fn run_in_session(State(state): State<AppState>, Path(id): Path<String>, Json(action): Json<BashAction>) -> Result<impl IntoResponse> {
    // run_in_session accepts long-poll durations of minutes (§4.H); the
    // caller's own `timeout_secs` field (if present) governs the wait.
    let long_poll = action.timeout_secs.map(Duration::from_secs);
    let observation = state.proxy.run_in_session(&id, action, long_poll).await?;
    Ok(Json(observation))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CloseBashSessionRequest>,
) -> Result<impl IntoResponse> {
    let response = state.proxy.close_session(&id, &req.session_name).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    command: String,
}

async fn execute(State(state): State<AppState>, Path(id): Path<String>, Json(req): Json<ExecuteRequest>) -> Result<impl IntoResponse> {
    let result = state.proxy.execute(&id, &req.command).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ReadFileRequest {
    path: String,
}

async fn read_file(State(state): State<AppState>, Path(id): Path<String>, Json(req): Json<ReadFileRequest>) -> Result<impl IntoResponse> {
    let response = state.proxy.read_file(&id, &req.path).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct WriteFileRequest {
    path: String,
    content: String,
}

async fn write_file(State(state): State<AppState>, Path(id): Path<String>, Json(req): Json<WriteFileRequest>) -> Result<impl IntoResponse> {
    let response = state.proxy.write_file(&id, &req.path, &req.content).await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    bytes_written: usize,
}

async fn upload(State(state): State<AppState>, Path(id): Path<String>, mut multipart: Multipart) -> Result<impl IntoResponse> {
    let mut target_path: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| SandboxError::BadRequest(format!("invalid multipart body: {err}")))? {
        match field.name() {
            Some("target_path") => {
                target_path = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| SandboxError::BadRequest(format!("invalid target_path field: {err}")))?,
                );
            }
            Some("file") => {
                content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| SandboxError::BadRequest(format!("invalid file field: {err}")))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let target_path = target_path.ok_or_else(|| SandboxError::BadRequest("missing target_path field".into()))?;
    let content = content.ok_or_else(|| SandboxError::BadRequest("missing file field".into()))?;

    let response = state.proxy.upload(&id, &target_path, &content).await?;
    Ok(Json(UploadResponse { bytes_written: response.bytes_written }))
}

/// Generic pass-through POST (§4.H): preserves method, body and headers, and
/// never buffers the response whole so SSE/chunked upstream responses
/// stream to the client live.
async fn proxy_passthrough(
    State(state): State<AppState>,
    Path((id, target_path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let forward_headers = strip_hop_by_hop(&headers);

    let byte_stream = body
        .into_data_stream()
        .map_err(|err| std::io::Error::other(err.to_string()));
    let reqwest_body = reqwest::Body::wrap_stream(byte_stream);

    let (status, response_headers, stream) = state.proxy.post_proxy(&id, &target_path, reqwest_body, forward_headers).await?;

    let mut builder = Response::builder().status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in response_headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
            builder = builder.header(name, value.clone());
        }
    }

    let body_stream = stream.map_err(std::io::Error::other);
    let response = builder
        .body(Body::from_stream(body_stream))
        .map_err(|err| SandboxError::Internal(format!("failed to build proxy response: {err}")))?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("x-custom", "value".parse().unwrap());
        let stripped = strip_hop_by_hop(&headers);
        assert!(stripped.get("connection").is_none());
        assert_eq!(stripped.get("x-custom").unwrap(), "value");
    }
}
