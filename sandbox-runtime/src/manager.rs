//! The Sandbox Manager (component G): the public API surface — validation,
//! quota enforcement, KV persistence, delegation to the deployment service,
//! TTL bookkeeping, and status merge (§4.G).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::RuntimeConfig;
use crate::deployment::DeploymentService;
use crate::error::{Result, SandboxError};
use crate::store::{KvStore, alive_key, timeout_key};
use crate::types::{
    DeploymentConfig, MountInfo, ResourceMetrics, SandboxInfo, SandboxStartResponse, SandboxState,
    SandboxStatusResponse, SystemResourceMetrics, TtlRecord, UserInfo,
};
use crate::util::{now_ts, parse_memory_bytes};
use crate::worker_client::CommandResult;

pub struct SandboxManager {
    deployment: Arc<DeploymentService>,
    kv: Option<Arc<KvStore>>,
    config: &'static RuntimeConfig,
    /// Per-sandbox-id locks enforcing program-order for submit/status/stop
    /// from a single client (§5's ordering guarantee).
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SandboxManager {
    pub fn new(deployment: Arc<DeploymentService>, kv: Option<Arc<KvStore>>, config: &'static RuntimeConfig) -> Self {
        Self { deployment, kv, config, locks: DashMap::new() }
    }

    fn lock_for(&self, sandbox_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(sandbox_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Deterministic, referentially transparent given `config`: validate
    /// `config` against `runtime.max_allowed` (§4.G step 1). Never clamps —
    /// any overage is a `BadRequest`.
    fn validate_sandbox_spec(&self, config: &DeploymentConfig) -> Result<u64> {
        if config.image.trim().is_empty() {
            return Err(SandboxError::BadRequest("image must not be empty".into()));
        }
        if config.cpus <= 0.0 {
            return Err(SandboxError::BadRequest(format!("cpus must be positive, got {}", config.cpus)));
        }
        if config.cpus > self.config.max_allowed.max_cpus {
            return Err(SandboxError::BadRequest(format!(
                "cpus {} exceeds max allowed {}",
                config.cpus, self.config.max_allowed.max_cpus
            )));
        }

        let memory_bytes = parse_memory_bytes(&config.memory)?;
        if memory_bytes == 0 {
            return Err(SandboxError::BadRequest("memory must be positive".into()));
        }
        if memory_bytes > self.config.max_allowed.max_memory_bytes {
            return Err(SandboxError::BadRequest(format!(
                "memory {} exceeds max allowed {} bytes",
                config.memory, self.config.max_allowed.max_memory_bytes
            )));
        }

        let auto_clear = config
            .auto_clear_time_minutes
            .unwrap_or(self.config.default_auto_clear_time_minutes);
        if auto_clear == 0 {
            return Err(SandboxError::BadRequest("auto_clear_time_minutes must be positive".into()));
        }
        if auto_clear > self.config.max_allowed.max_auto_clear_time_minutes {
            return Err(SandboxError::BadRequest(format!(
                "auto_clear_time_minutes {auto_clear} exceeds max allowed {}",
                self.config.max_allowed.max_auto_clear_time_minutes
            )));
        }

        if let Some(max_concurrent) = self.config.max_allowed.max_concurrent_sandboxes {
            if self.deployment.sandbox_ids().len() as u64 >= max_concurrent {
                return Err(SandboxError::BadRequest(format!(
                    "concurrent sandbox limit ({max_concurrent}) reached"
                )));
            }
        }

        Ok(auto_clear)
    }

    async fn sandbox_exists(&self, sandbox_id: &str) -> Result<bool> {
        if let Some(kv) = &self.kv {
            if kv.json_get::<SandboxInfo>(&alive_key(sandbox_id)).await?.is_some() {
                return Ok(true);
            }
        }
        match self.deployment.get_status(sandbox_id).await {
            Ok(_) => Ok(true),
            Err(SandboxError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// §4.G submit algorithm.
    pub async fn submit(&self, mut config: DeploymentConfig, user_info: UserInfo) -> Result<SandboxStartResponse> {
        let auto_clear_time_minutes = self.validate_sandbox_spec(&config)?;
        config.auto_clear_time_minutes = Some(auto_clear_time_minutes);

        let sandbox_id = match config.container_name.clone() {
            Some(id) => {
                if self.sandbox_exists(&id).await? {
                    return Err(SandboxError::BadRequest(format!("sandbox '{id}' already exists")));
                }
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let lock = self.lock_for(&sandbox_id);
        let _guard = lock.lock().await;

        let info = match self.deployment.submit(&config, &sandbox_id, &user_info).await {
            Ok(info) => info,
            Err(err) => {
                // Ensure no half-state persists: neither KV key should exist
                // for a sandbox that failed to start (§8's quantified property).
                if let Some(kv) = &self.kv {
                    let _ = kv.json_delete(&alive_key(&sandbox_id)).await;
                    let _ = kv.json_delete(&timeout_key(&sandbox_id)).await;
                }
                return Err(err);
            }
        };

        if let Some(kv) = &self.kv {
            let ttl = TtlRecord::new(now_ts(), auto_clear_time_minutes);
            kv.json_set(&alive_key(&sandbox_id), &info, None).await?;
            kv.json_set(&timeout_key(&sandbox_id), &ttl, None).await?;
        }

        Ok(SandboxStartResponse {
            sandbox_id: info.sandbox_id,
            host_ip: info.host_ip,
            host_name: info.host_name,
        })
    }

    /// §4.G status algorithm: live view wins for `phases`/`port_mapping`/
    /// `alive`; cached KV record wins for static metadata. Sliding-TTL
    /// refresh happens on every successful call.
    pub async fn get_status(&self, sandbox_id: &str) -> Result<SandboxStatusResponse> {
        let lock = self.lock_for(sandbox_id);
        let _guard = lock.lock().await;

        let live = self.deployment.get_status(sandbox_id).await?;

        let cached: Option<SandboxInfo> = match &self.kv {
            Some(kv) => kv.json_get(&alive_key(sandbox_id)).await?,
            None => None,
        };

        let mut merged = match cached {
            Some(mut cached) => {
                cached.phases = live.phases;
                cached.port_mapping = live.port_mapping;
                cached.alive = live.alive;
                cached.host_ip = live.host_ip;
                cached
            }
            None => live,
        };

        if merged.alive {
            merged.state = SandboxState::Running;
        }

        if let Some(kv) = &self.kv {
            let now = now_ts();
            if let Some(mut ttl) = kv.json_get::<TtlRecord>(&timeout_key(sandbox_id)).await? {
                ttl.refresh(now);
                kv.json_set(&timeout_key(sandbox_id), &ttl, None).await?;
            }
            kv.json_set(&alive_key(sandbox_id), &merged, None).await?;
        }

        Ok(merged)
    }

    /// Idempotent: swallows "actor not found" and still unconditionally
    /// cleans up both KV keys (§4.G stop algorithm, §8 scenario 6).
    pub async fn stop(&self, sandbox_id: &str) -> Result<()> {
        let lock = self.lock_for(sandbox_id);
        let _guard = lock.lock().await;

        let result = self.deployment.stop(sandbox_id).await;

        if let Some(kv) = &self.kv {
            let _ = kv.json_delete(&alive_key(sandbox_id)).await;
            let _ = kv.json_delete(&timeout_key(sandbox_id)).await;
        }

        self.locks.remove(sandbox_id);

        match result {
            Ok(_) => Ok(()),
            Err(SandboxError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn get_sandbox_statistics(&self, sandbox_id: &str) -> Result<ResourceMetrics> {
        self.deployment.get_statistics(sandbox_id).await
    }

    pub async fn get_mount(&self, sandbox_id: &str) -> Result<MountInfo> {
        self.deployment.get_mount(sandbox_id).await
    }

    pub async fn commit(&self, sandbox_id: &str, tag: &str, username: &str, password: &str) -> Result<CommandResult> {
        self.deployment.commit(sandbox_id, tag, username, password).await
    }

    pub async fn collect_system_resource_metrics(&self) -> Result<SystemResourceMetrics> {
        self.deployment.collect_system_resource_metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DockerOperator;
    use crate::worker_client::WorkerClient;
    use std::time::Duration;

    fn test_manager() -> SandboxManager {
        let deployment = Arc::new(DeploymentService::new(
            Arc::new(DockerOperator::new()),
            WorkerClient::default(),
            Duration::from_secs(1),
        ));
        SandboxManager::new(deployment, None, RuntimeConfig::load())
    }

    fn valid_config() -> DeploymentConfig {
        DeploymentConfig {
            image: "python:3.11".to_string(),
            cpus: 1.0,
            memory: "1g".to_string(),
            auto_clear_time_minutes: Some(5),
            pull: crate::types::PullPolicy::Missing,
            container_name: None,
            environment: Default::default(),
            capabilities: vec![],
            network_mode: None,
        }
    }

    #[test]
    fn rejects_cpu_overage() {
        let manager = test_manager();
        let mut config = valid_config();
        config.cpus = manager.config.max_allowed.max_cpus + 1.0;
        assert!(manager.validate_sandbox_spec(&config).is_err());
    }

    #[test]
    fn accepts_cpu_exactly_at_max() {
        let manager = test_manager();
        let mut config = valid_config();
        config.cpus = manager.config.max_allowed.max_cpus;
        assert!(manager.validate_sandbox_spec(&config).is_ok());
    }

    #[test]
    fn rejects_zero_memory() {
        let manager = test_manager();
        let mut config = valid_config();
        config.memory = "0".to_string();
        assert!(manager.validate_sandbox_spec(&config).is_err());
    }

    #[test]
    fn rejects_non_positive_cpus() {
        let manager = test_manager();
        let mut config = valid_config();
        config.cpus = 0.0;
        assert!(manager.validate_sandbox_spec(&config).is_err());
    }
}
