//! Integration tests for the worker HTTP client (component B) against a
//! real mock worker server, rather than the unit-level header/status tests
//! in `worker_client.rs`'s own `#[cfg(test)]` module.
//!
//! The mock server stands in for the out-of-scope worker-side runtime
//! (§1's "worker-side shell-session runtime ... we depend on its HTTP
//! contract only"): it implements just enough of that contract — session
//! create/run/close with 409/404 on conflict/absence, and a file store
//! backed by a temp directory — to exercise the client's status-code
//! mapping and structured-output behavior end to end.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use sandbox_runtime::error::SandboxError;
use sandbox_runtime::worker_client::{BashAction, CreateBashSessionRequest, CloseBashSessionRequest, WorkerClient};

#[derive(Clone)]
struct MockWorker {
    dir: Arc<tempfile::TempDir>,
    sessions: Arc<Mutex<HashSet<String>>>,
}

async fn execute(Json(body): Json<Value>) -> Json<Value> {
    let command = body.get("command").and_then(Value::as_str).unwrap_or("");
    if command.contains("fail") {
        Json(json!({"stdout": "", "stderr": "boom\n", "exit_code": 1}))
    } else {
        Json(json!({"stdout": format!("{command}\n"), "stderr": "", "exit_code": 0}))
    }
}

async fn write_file(State(mock): State<MockWorker>, Json(body): Json<Value>) -> Json<Value> {
    let path = body.get("path").and_then(Value::as_str).unwrap_or("out.txt");
    let content = body.get("content").and_then(Value::as_str).unwrap_or("");
    std::fs::write(mock.dir.path().join(path), content).unwrap();
    Json(json!({"bytes_written": content.len()}))
}

async fn read_file(State(mock): State<MockWorker>, Json(body): Json<Value>) -> Json<Value> {
    let path = body.get("path").and_then(Value::as_str).unwrap_or("out.txt");
    match std::fs::read_to_string(mock.dir.path().join(path)) {
        Ok(content) => Json(json!({"content": content})),
        Err(_) => Json(json!({"content": Value::Null})),
    }
}

async fn create_session(State(mock): State<MockWorker>, Json(req): Json<CreateBashSessionRequest>) -> (StatusCode, Json<Value>) {
    let mut sessions = mock.sessions.lock().unwrap();
    if sessions.contains(&req.session_name) {
        return (StatusCode::CONFLICT, Json(json!({"error": "session already exists"})));
    }
    sessions.insert(req.session_name.clone());
    (StatusCode::OK, Json(json!({"session_name": req.session_name})))
}

async fn run_in_session(State(mock): State<MockWorker>, Json(action): Json<BashAction>) -> (StatusCode, Json<Value>) {
    let sessions = mock.sessions.lock().unwrap();
    if !sessions.contains(&action.session_name) {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "session does not exist"})));
    }
    (StatusCode::OK, Json(json!({"output": format!("ran: {}\n", action.command), "exit_code": 0})))
}

async fn close_session(State(mock): State<MockWorker>, Json(req): Json<CloseBashSessionRequest>) -> (StatusCode, Json<Value>) {
    let mut sessions = mock.sessions.lock().unwrap();
    if !sessions.remove(&req.session_name) {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "session does not exist"})));
    }
    (StatusCode::OK, Json(json!({"closed": true})))
}

async fn spawn_mock_worker() -> SocketAddr {
    let mock = MockWorker {
        dir: Arc::new(tempfile::tempdir().unwrap()),
        sessions: Arc::new(Mutex::new(HashSet::new())),
    };

    let app = Router::new()
        .route("/execute", post(execute))
        .route("/write_file", post(write_file))
        .route("/read_file", post(read_file))
        .route("/sessions", post(create_session))
        .route("/sessions/run", post(run_in_session))
        .route("/sessions/close", post(close_session))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn nonzero_exit_is_structured_output_not_an_error() {
    let addr = spawn_mock_worker().await;
    let client = WorkerClient::new(Duration::from_secs(5));

    let ok = client.execute(&addr.ip().to_string(), addr.port(), "sbx-1", "echo hi").await.unwrap();
    assert_eq!(ok.exit_code, 0);
    assert_eq!(ok.stdout, "echo hi\n");

    let failed = client.execute(&addr.ip().to_string(), addr.port(), "sbx-1", "false-command-fail").await.unwrap();
    assert_eq!(failed.exit_code, 1);
    assert_eq!(failed.stderr, "boom\n");
}

#[tokio::test]
async fn write_then_read_file_round_trips() {
    let addr = spawn_mock_worker().await;
    let client = WorkerClient::new(Duration::from_secs(5));
    let ip = addr.ip().to_string();

    client.write_file(&ip, addr.port(), "sbx-1", "notes.txt", "hello world").await.unwrap();
    let read = client.read_file(&ip, addr.port(), "sbx-1", "notes.txt").await.unwrap();
    assert_eq!(read.content.as_deref(), Some("hello world"));
}

#[tokio::test]
async fn duplicate_session_create_is_conflict() {
    let addr = spawn_mock_worker().await;
    let client = WorkerClient::new(Duration::from_secs(5));
    let ip = addr.ip().to_string();

    client
        .create_session(&ip, addr.port(), "sbx-1", CreateBashSessionRequest { session_name: "default".into() })
        .await
        .unwrap();

    let err = client
        .create_session(&ip, addr.port(), "sbx-1", CreateBashSessionRequest { session_name: "default".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Conflict(_)));
}

#[tokio::test]
async fn run_after_close_raises_not_found_both_times() {
    let addr = spawn_mock_worker().await;
    let client = WorkerClient::new(Duration::from_secs(5));
    let ip = addr.ip().to_string();

    client
        .create_session(&ip, addr.port(), "sbx-1", CreateBashSessionRequest { session_name: "s".into() })
        .await
        .unwrap();
    client
        .close_session(&ip, addr.port(), "sbx-1", CloseBashSessionRequest { session_name: "s".into() })
        .await
        .unwrap();

    let run_err = client
        .run_in_session(&ip, addr.port(), "sbx-1", BashAction { session_name: "s".into(), command: "echo hi".into(), timeout_secs: None }, None)
        .await
        .unwrap_err();
    assert!(matches!(run_err, SandboxError::NotFound(_)));

    let close_err = client
        .close_session(&ip, addr.port(), "sbx-1", CloseBashSessionRequest { session_name: "s".into() })
        .await
        .unwrap_err();
    assert!(matches!(close_err, SandboxError::NotFound(_)));
}
