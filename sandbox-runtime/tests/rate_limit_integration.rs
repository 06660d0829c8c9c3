//! HTTP-level integration test for the rate-limit middleware (used by the
//! admin surface's read/write route groups), exercised through a real axum
//! `Router` + `tower::ServiceExt::oneshot` rather than calling `RateLimiter`
//! directly, so the middleware wiring itself — not just the bucket logic —
//! is under test.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware;
use axum::routing::get;
use http_body_util::BodyExt;
use tower::ServiceExt;

use sandbox_runtime::rate_limit::write_rate_limit;

async fn ok() -> &'static str {
    "ok"
}

fn app() -> Router {
    Router::new().route("/", get(ok)).route_layer(middleware::from_fn(write_rate_limit))
}

fn request_from(ip: &str) -> Request<Body> {
    Request::builder()
        .uri("/")
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn requests_within_quota_succeed() {
    // A fresh synthetic IP, unused by any other test in this binary, so the
    // global write-tier limiter's 30 req/min bucket starts empty for it.
    let response = app().oneshot(request_from("198.51.100.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn exceeding_quota_returns_429_with_retry_after() {
    let ip = "198.51.100.2";
    let router = app();

    // The write tier allows 30 requests per minute; the 31st from the same
    // IP must be rejected.
    for _ in 0..30 {
        let response = router.clone().oneshot(request_from(ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router.clone().oneshot(request_from(ip)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("retry-after").unwrap(), "60");
}

#[tokio::test]
async fn distinct_ips_get_independent_quota() {
    let router = app();
    for _ in 0..30 {
        let response = router.clone().oneshot(request_from("198.51.100.3")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    // A different IP's quota is untouched by 198.51.100.3 exhausting its own.
    let response = router.clone().oneshot(request_from("198.51.100.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
