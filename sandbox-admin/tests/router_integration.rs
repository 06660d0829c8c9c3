//! HTTP-level integration tests for the admin surface's router (component K),
//! exercised through a real `tower::ServiceExt::oneshot` call against
//! `sandbox_admin::router::build_router` rather than the handler unit tests
//! already in `router.rs`. No Docker and no KV store are involved: the
//! quota-validation path in `SandboxManager::submit` rejects an oversized
//! request before the deployment service ever reaches the operator, so a
//! `DockerOperator` can sit behind the manager unused.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sandbox_runtime::auth::AdminTokens;
use sandbox_runtime::config::RuntimeConfig;
use sandbox_runtime::operator::DockerOperator;
use sandbox_runtime::worker_client::WorkerClient;
use sandbox_runtime::{DeploymentService, SandboxManager, SandboxProxy};
use tower::ServiceExt;

use sandbox_admin::router::build_router;
use sandbox_admin::state::AppState;

fn app() -> Router {
    let deployment = Arc::new(DeploymentService::new(
        Arc::new(DockerOperator::new()),
        WorkerClient::default(),
        Duration::from_secs(1),
    ));
    let manager = Arc::new(SandboxManager::new(deployment.clone(), None, RuntimeConfig::load()));
    let proxy = Arc::new(SandboxProxy::new(manager.clone(), WorkerClient::default()));
    // No SANDBOX_ADMIN_TOKENS set in this process: auth is disabled, matching
    // the "local development only" mode documented in main.rs.
    let state = AppState { manager, proxy, admin_tokens: AdminTokens::from_env() };
    build_router(state)
}

#[tokio::test]
async fn health_is_reachable_without_a_bearer_token() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let response = app()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("sandbox"));
}

#[tokio::test]
async fn submit_with_cpus_over_the_limit_is_rejected_before_touching_docker() {
    let max_cpus = RuntimeConfig::load().max_allowed.max_cpus;
    let body = serde_json::json!({
        "image": "python:3.11",
        "cpus": max_cpus + 1.0,
        "memory": "1g",
    });

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sandboxes")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "Failed");
}

#[tokio::test]
async fn status_for_an_unknown_sandbox_is_not_found() {
    let response = app()
        .oneshot(Request::builder().uri("/sandboxes/does-not-exist/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
