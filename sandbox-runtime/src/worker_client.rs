//! Low-level HTTP client for one worker host (component B).
//!
//! Every call carries an `X-Sandbox-Id` header and a fresh `X-Request-Id`
//! for cross-host log correlation, matching the original `worker_client.py`.
//! A non-2xx response is raised as [`SandboxError::Upstream`]; a 200 with
//! `exit_code != 0` is returned as structured output — the command ran and
//! failed, which is not a transport-layer error.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SandboxError};
use crate::util::http_client;

const SANDBOX_ID_HEADER: &str = "x-sandbox-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileResponse {
    pub bytes_written: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileResponse {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBashSessionRequest {
    pub session_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBashSessionResponse {
    pub session_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashAction {
    pub session_name: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashObservation {
    pub output: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseBashSessionRequest {
    pub session_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseBashSessionResponse {
    pub closed: bool,
}

/// Client for one worker host's proxy port. Stateless — reuses the shared
/// process-wide `reqwest::Client`.
#[derive(Clone)]
pub struct WorkerClient {
    timeout: Duration,
}

impl Default for WorkerClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS))
    }
}

impl WorkerClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn base_url(&self, host_ip: &str, port: u16) -> String {
        format!("http://{host_ip}:{port}")
    }

    fn headers(sandbox_id: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(SANDBOX_ID_HEADER),
            HeaderValue::from_str(sandbox_id)
                .map_err(|_| SandboxError::BadRequest("invalid sandbox id header value".into()))?,
        );
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).expect("uuid is header-safe"),
        );
        Ok(headers)
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        host_ip: &str,
        port: u16,
        path: &str,
        sandbox_id: &str,
        body: Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url(host_ip, port), path.trim_start_matches('/'));
        let response = http_client()?
            .post(&url)
            .headers(Self::headers(sandbox_id)?)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_status_err(status, &url, &text));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| SandboxError::Upstream(format!("invalid worker response from {url}: {err}")))
    }

    /// Translate a worker HTTP status to our error taxonomy rather than
    /// collapsing every non-2xx into `Upstream`: session conflicts and
    /// "session does not exist" are typed errors surfaced unchanged to the
    /// client (§7, §8's session-lifecycle properties), not transport noise.
    fn map_status_err(status: StatusCode, url: &str, body: &str) -> SandboxError {
        match status {
            StatusCode::CONFLICT => SandboxError::Conflict(format!("{url}: {body}")),
            StatusCode::NOT_FOUND => SandboxError::NotFound(format!("{url}: {body}")),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                SandboxError::Timeout(format!("{url}: {body}"))
            }
            _ => SandboxError::Upstream(format!("worker {url} returned {status}: {body}")),
        }
    }

    fn map_reqwest_err(err: reqwest::Error) -> SandboxError {
        if err.is_timeout() {
            SandboxError::Timeout(err.to_string())
        } else {
            SandboxError::Upstream(err.to_string())
        }
    }

    /// Run a one-shot shell command. 200 with non-zero `exit_code` is a
    /// normal return, not an error.
    pub async fn execute(&self, host_ip: &str, port: u16, sandbox_id: &str, command: &str) -> Result<CommandResult> {
        self.post_json(
            host_ip,
            port,
            "execute",
            sandbox_id,
            serde_json::json!({"command": command, "shell": true}),
        )
        .await
    }

    pub async fn read_file(&self, host_ip: &str, port: u16, sandbox_id: &str, path: &str) -> Result<ReadFileResponse> {
        self.post_json(host_ip, port, "read_file", sandbox_id, serde_json::json!({"path": path}))
            .await
    }

    pub async fn write_file(
        &self,
        host_ip: &str,
        port: u16,
        sandbox_id: &str,
        path: &str,
        content: &str,
    ) -> Result<WriteFileResponse> {
        self.post_json(
            host_ip,
            port,
            "write_file",
            sandbox_id,
            serde_json::json!({"path": path, "content": content}),
        )
        .await
    }

    /// True if the worker responds successfully to a liveness probe.
    pub async fn is_alive(&self, host_ip: &str, port: u16, sandbox_id: &str) -> bool {
        let url = format!("{}/is_alive", self.base_url(host_ip, port));
        match http_client() {
            Ok(client) => client
                .get(&url)
                .headers(Self::headers(sandbox_id).unwrap_or_default())
                .timeout(self.timeout)
                .send()
                .await
                .map(|resp| resp.status() == StatusCode::OK)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn create_session(
        &self,
        host_ip: &str,
        port: u16,
        sandbox_id: &str,
        req: CreateBashSessionRequest,
    ) -> Result<CreateBashSessionResponse> {
        self.post_json(host_ip, port, "sessions", sandbox_id, serde_json::to_value(req).unwrap())
            .await
    }

    pub async fn run_in_session(
        &self,
        host_ip: &str,
        port: u16,
        sandbox_id: &str,
        action: BashAction,
        long_poll_timeout: Option<Duration>,
    ) -> Result<BashObservation> {
        let mut client_for_call = self.clone();
        if let Some(timeout) = long_poll_timeout {
            client_for_call.timeout = timeout;
        }
        client_for_call
            .post_json(host_ip, port, "sessions/run", sandbox_id, serde_json::to_value(action).unwrap())
            .await
    }

    pub async fn close_session(
        &self,
        host_ip: &str,
        port: u16,
        sandbox_id: &str,
        req: CloseBashSessionRequest,
    ) -> Result<CloseBashSessionResponse> {
        self.post_json(host_ip, port, "sessions/close", sandbox_id, serde_json::to_value(req).unwrap())
            .await
    }

    /// Generic streaming pass-through POST used by [`crate::proxy`]. Returns the
    /// upstream status and a byte stream that is never buffered whole, so SSE
    /// and chunked responses pass through live.
    pub async fn post_proxy_stream(
        &self,
        host_ip: &str,
        port: u16,
        sandbox_id: &str,
        target_path: &str,
        body: reqwest::Body,
        headers: HeaderMap,
    ) -> Result<(StatusCode, HeaderMap, impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>>)> {
        let url = format!(
            "{}/{}",
            self.base_url(host_ip, port),
            target_path.trim_start_matches('/')
        );
        let mut req_headers = Self::headers(sandbox_id)?;
        req_headers.extend(headers);

        let response = http_client()?
            .request(Method::POST, &url)
            .headers(req_headers)
            .body(body)
            .send()
            .await
            .map_err(Self::map_reqwest_err)?;

        let status = response.status();
        let response_headers = response.headers().clone();
        Ok((status, response_headers, response.bytes_stream().map(|chunk| chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_carry_sandbox_and_request_id() {
        let headers = WorkerClient::headers("sbx-1").unwrap();
        assert_eq!(headers.get(SANDBOX_ID_HEADER).unwrap(), "sbx-1");
        assert!(headers.get(REQUEST_ID_HEADER).is_some());
    }

    #[test]
    fn session_conflict_maps_to_typed_conflict_error() {
        let err = WorkerClient::map_status_err(StatusCode::CONFLICT, "http://w/sessions", "session 's' already exists");
        assert!(matches!(err, SandboxError::Conflict(_)));
    }

    #[test]
    fn session_not_found_maps_to_typed_not_found_error() {
        let err = WorkerClient::map_status_err(StatusCode::NOT_FOUND, "http://w/sessions/run", "no such session");
        assert!(matches!(err, SandboxError::NotFound(_)));
    }

    #[test]
    fn other_non_2xx_maps_to_upstream_error() {
        let err = WorkerClient::map_status_err(StatusCode::INTERNAL_SERVER_ERROR, "http://w/execute", "boom");
        assert!(matches!(err, SandboxError::Upstream(_)));
    }
}
