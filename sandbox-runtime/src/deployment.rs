//! The Deployment Service (component F): a thin uniform facade over the
//! operator, resolving the right actor by sandbox id and presenting one
//! async API to the manager and reaper (§4.F).
//!
//! Concurrency discipline: every per-sandbox call takes the read side of
//! `pool_lock`; `quiesce()` takes the write side to drain the whole pool
//! during shutdown, matching §5's "operator pool: read/write lock" model.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::actor::SandboxActor;
use crate::error::{Result, SandboxError};
use crate::operator::Operator;
use crate::types::{DeploymentConfig, MountInfo, ResourceMetrics, SandboxInfo, SystemResourceMetrics, UserInfo};
use crate::worker_client::{CommandResult, WorkerClient};

pub struct DeploymentService {
    operator: Arc<dyn Operator>,
    worker: WorkerClient,
    actors: DashMap<String, Arc<SandboxActor>>,
    gateway_timeout: Duration,
    pool_lock: RwLock<()>,
}

impl DeploymentService {
    pub fn new(operator: Arc<dyn Operator>, worker: WorkerClient, gateway_timeout: Duration) -> Self {
        Self {
            operator,
            worker,
            actors: DashMap::new(),
            gateway_timeout,
            pool_lock: RwLock::new(()),
        }
    }

    fn actor(&self, sandbox_id: &str) -> Result<Arc<SandboxActor>> {
        self.actors
            .get(sandbox_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| SandboxError::NotFound(format!("sandbox '{sandbox_id}' not found")))
    }

    pub async fn submit(&self, config: &DeploymentConfig, sandbox_id: &str, user_info: &UserInfo) -> Result<SandboxInfo> {
        let _guard = self.pool_lock.read().await;
        let actor = Arc::new(SandboxActor::new(sandbox_id.to_string(), self.operator.clone(), self.worker.clone()));
        let info = actor.start(config, user_info, self.gateway_timeout).await?;
        self.actors.insert(sandbox_id.to_string(), actor);
        Ok(info)
    }

    pub async fn get_status(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let _guard = self.pool_lock.read().await;
        self.actor(sandbox_id)?.get_status().await
    }

    /// `false` if no actor exists for `sandbox_id` — the manager still
    /// unconditionally clears its KV keys afterward (§4.G's stop algorithm).
    pub async fn stop(&self, sandbox_id: &str) -> Result<bool> {
        let _guard = self.pool_lock.read().await;
        let Some(actor) = self.actors.get(sandbox_id).map(|entry| entry.clone()) else {
            return Ok(false);
        };
        let result = actor.stop().await?;
        self.actors.remove(sandbox_id);
        crate::metrics::metrics().record_garbage_collected();
        Ok(result)
    }

    pub async fn get_mount(&self, sandbox_id: &str) -> Result<MountInfo> {
        let _guard = self.pool_lock.read().await;
        self.actor(sandbox_id)?.get_mount().await
    }

    pub async fn get_statistics(&self, sandbox_id: &str) -> Result<ResourceMetrics> {
        let _guard = self.pool_lock.read().await;
        self.actor(sandbox_id)?.get_statistics().await
    }

    pub async fn commit(&self, sandbox_id: &str, tag: &str, username: &str, password: &str) -> Result<CommandResult> {
        let _guard = self.pool_lock.read().await;
        self.actor(sandbox_id)?.commit(tag, username, password).await
    }

    pub async fn collect_system_resource_metrics(&self) -> Result<SystemResourceMetrics> {
        let _guard = self.pool_lock.read().await;
        self.operator.collect_system_resource_metrics().await
    }

    /// Quiesce the whole pool (process shutdown): block new per-sandbox
    /// operations until the guard is dropped.
    pub async fn quiesce(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.pool_lock.write().await
    }

    pub fn sandbox_ids(&self) -> Vec<String> {
        self.actors.iter().map(|entry| entry.key().clone()).collect()
    }
}
