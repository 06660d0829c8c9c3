//! The Sandbox Actor (component E): the single-consumer object that owns one
//! sandbox's lifecycle and mediates every mutation to it.
//!
//! Realized here as a plain struct guarded by a pair of `tokio::sync::Mutex`es
//! rather than a message-passing task — per §9's note that both are
//! equally valid realizations of "actor" as long as mutations serialize
//! through one owner. `start`/`stop` each take their own lock so a `stop`
//! racing an in-flight `start` doesn't deadlock against `get_status`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{Result, SandboxError};
use crate::operator::{Operator, wait_for_gateway_ready};
use crate::service_status::{PhaseState, ServiceStatus, resolve_alive};
use crate::types::{DeploymentConfig, MountInfo, ResourceMetrics, SandboxInfo, SandboxState, UserInfo};
use crate::worker_client::{CommandResult, WorkerClient};

/// One sandbox's lifecycle state machine: `image_pull -> docker_run ->
/// gateway_ready -> RUNNING` (§4.E). Phase transitions are serialized through
/// `status`; `stopped` guards the idempotent-stop contract.
pub struct SandboxActor {
    sandbox_id: String,
    operator: Arc<dyn Operator>,
    worker: WorkerClient,
    status: Mutex<ServiceStatus>,
    stopped: Mutex<bool>,
}

impl SandboxActor {
    pub fn new(sandbox_id: String, operator: Arc<dyn Operator>, worker: WorkerClient) -> Self {
        Self {
            sandbox_id,
            operator,
            worker,
            status: Mutex::new(ServiceStatus::new()),
            stopped: Mutex::new(false),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Run the CREATE lifecycle: pull the image, run the container, wait for
    /// the in-container gateway, then mark RUNNING. Partial failure after the
    /// container exists but before readiness rolls back the container before
    /// raising (§4.D).
    pub async fn start(
        &self,
        config: &DeploymentConfig,
        user_info: &UserInfo,
        gateway_timeout: Duration,
    ) -> Result<SandboxInfo> {
        {
            let mut status = self.status.lock().await;
            status.advance("image_pull", PhaseState::Running);
        }

        let mut info = match self.operator.submit(config, &self.sandbox_id, user_info).await {
            Ok(info) => info,
            Err(err) => {
                let mut status = self.status.lock().await;
                status.advance("image_pull", PhaseState::Failed);
                return Err(err);
            }
        };

        {
            let mut status = self.status.lock().await;
            status.advance("image_pull", PhaseState::Succeeded);
            status.advance("docker_run", PhaseState::Succeeded);
            status.advance("gateway_ready", PhaseState::Running);
        }

        let gateway_ok = match info.proxy_port() {
            Some(port) => wait_for_gateway_ready(&info.host_ip, port, gateway_timeout).await,
            None => false,
        };

        let snapshot = {
            let mut status = self.status.lock().await;
            if gateway_ok {
                status.advance("gateway_ready", PhaseState::Succeeded);
            } else {
                status.advance("gateway_ready", PhaseState::Failed);
            }
            status.clone()
        };

        if !gateway_ok {
            // Roll back the half-created container rather than leaving it
            // running with no reachable gateway.
            let _ = self.operator.stop(&self.sandbox_id).await;
            return Err(SandboxError::Internal(format!(
                "sandbox '{}' never reached gateway_ready within {:?}",
                self.sandbox_id, gateway_timeout
            )));
        }

        // Best-effort: persist the phase snapshot inside the container so a
        // host-side reader can see it even if this process dies. The worker
        // write path is out of scope to emulate exactly; failure here doesn't
        // fail `start` since the in-memory status is still authoritative for
        // this process's own reads.
        if let Some(port) = info.proxy_port() {
            if let Ok(payload) = serde_json::to_string(&snapshot) {
                let _ = self
                    .worker
                    .write_file(&info.host_ip, port, &self.sandbox_id, crate::service_status::SERVICE_STATUS_PATH, &payload)
                    .await;
            }
        }

        info.state = SandboxState::Running;
        info.alive = true;
        info.phases = snapshot;
        Ok(info)
    }

    /// Merge the operator's live view with this actor's phase history,
    /// applying the §4.C tie-break: host-side `alive = false` wins even if
    /// the last observed phase was `RUNNING`.
    pub async fn get_status(&self) -> Result<SandboxInfo> {
        let mut info = self.operator.get_status(&self.sandbox_id).await?;
        let status = self.status.lock().await.clone();
        let alive = resolve_alive(&status, info.alive);
        info.alive = alive;
        info.state = if alive { SandboxState::Running } else { SandboxState::Stopped };
        info.phases = status;
        Ok(info)
    }

    /// Idempotent: concurrent callers converge on a single underlying
    /// container-stop (§4.E, §8 scenario 6).
    pub async fn stop(&self) -> Result<bool> {
        let mut stopped = self.stopped.lock().await;
        if *stopped {
            return Ok(true);
        }
        let result = self.operator.stop(&self.sandbox_id).await?;
        *stopped = true;
        Ok(result)
    }

    pub async fn is_alive(&self) -> bool {
        self.get_status().await.map(|info| info.alive).unwrap_or(false)
    }

    pub async fn get_mount(&self) -> Result<MountInfo> {
        self.operator.get_mount(&self.sandbox_id).await
    }

    pub async fn get_statistics(&self) -> Result<ResourceMetrics> {
        self.operator.get_statistics(&self.sandbox_id).await
    }

    pub async fn commit(&self, tag: &str, username: &str, password: &str) -> Result<CommandResult> {
        self.operator.commit(&self.sandbox_id, tag, username, password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DockerOperator;

    #[test]
    fn new_actor_starts_unstopped() {
        let actor = SandboxActor::new(
            "sbx-1".to_string(),
            Arc::new(DockerOperator::new()),
            WorkerClient::default(),
        );
        assert_eq!(actor.sandbox_id(), "sbx-1");
    }
}
