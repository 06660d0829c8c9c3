//! The Sandbox Proxy (component H): per-sandbox pass-through of session and
//! file-I/O verbs to the worker host that owns the sandbox (§4.H).
//!
//! Every verb resolves `(host_ip, proxy_port)` via the manager's merged
//! `SandboxInfo` (KV-cached where available, live otherwise) before calling
//! through to [`crate::worker_client::WorkerClient`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::error::{Result, SandboxError};
use crate::manager::SandboxManager;
use crate::worker_client::{
    BashAction, BashObservation, CloseBashSessionRequest, CloseBashSessionResponse, CommandResult,
    CreateBashSessionRequest, CreateBashSessionResponse, ReadFileResponse, WorkerClient, WriteFileResponse,
};

pub struct SandboxProxy {
    manager: Arc<SandboxManager>,
    worker: WorkerClient,
}

impl SandboxProxy {
    pub fn new(manager: Arc<SandboxManager>, worker: WorkerClient) -> Self {
        Self { manager, worker }
    }

    async fn resolve(&self, sandbox_id: &str) -> Result<(String, u16)> {
        let info = self.manager.get_status(sandbox_id).await?;
        let port = info
            .proxy_port()
            .ok_or_else(|| SandboxError::Internal(format!("sandbox '{sandbox_id}' has no proxy port mapping")))?;
        Ok((info.host_ip, port))
    }

    pub async fn execute(&self, sandbox_id: &str, command: &str) -> Result<CommandResult> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        crate::metrics::metrics().record_proxy_request();
        let result = self.worker.execute(&host_ip, port, sandbox_id, command).await;
        if result.is_err() {
            crate::metrics::metrics().record_proxy_error();
        }
        result
    }

    pub async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<ReadFileResponse> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        self.worker.read_file(&host_ip, port, sandbox_id, path).await
    }

    pub async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> Result<WriteFileResponse> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        self.worker.write_file(&host_ip, port, sandbox_id, path, content).await
    }

    /// Upload is a write to `target_path` carrying the already-decoded file
    /// body — the HTTP admin surface decodes the multipart body before
    /// calling through.
    pub async fn upload(&self, sandbox_id: &str, target_path: &str, content: &[u8]) -> Result<WriteFileResponse> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        let text = String::from_utf8_lossy(content);
        self.worker.write_file(&host_ip, port, sandbox_id, target_path, &text).await
    }

    pub async fn create_session(&self, sandbox_id: &str, session_name: &str) -> Result<CreateBashSessionResponse> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        self.worker
            .create_session(&host_ip, port, sandbox_id, CreateBashSessionRequest { session_name: session_name.to_string() })
            .await
    }

    /// `run_in_session` permits long-poll durations of minutes (§4.H).
    pub async fn run_in_session(&self, sandbox_id: &str, action: BashAction, long_poll_timeout: Option<Duration>) -> Result<BashObservation> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        self.worker.run_in_session(&host_ip, port, sandbox_id, action, long_poll_timeout).await
    }

    pub async fn close_session(&self, sandbox_id: &str, session_name: &str) -> Result<CloseBashSessionResponse> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        self.worker
            .close_session(&host_ip, port, sandbox_id, CloseBashSessionRequest { session_name: session_name.to_string() })
            .await
    }

    /// Generic pass-through POST. Preserves streaming: the caller (the HTTP
    /// admin surface) forwards the returned status/headers/stream without
    /// buffering the body whole, so SSE and chunked upstream responses pass
    /// through live (§4.H, §8's streaming boundary behavior).
    pub async fn post_proxy(
        &self,
        sandbox_id: &str,
        target_path: &str,
        body: reqwest::Body,
        headers: HeaderMap,
    ) -> Result<(StatusCode, HeaderMap, impl Stream<Item = reqwest::Result<Bytes>>)> {
        let (host_ip, port) = self.resolve(sandbox_id).await?;
        crate::metrics::metrics().record_proxy_request();
        self.worker.post_proxy_stream(&host_ip, port, sandbox_id, target_path, body, headers).await
    }
}
