//! Wire and domain types shared across the manager, deployment service,
//! operator and proxy (§3 of the data model).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::service_status::ServiceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    Never,
    Always,
    Missing,
}

impl Default for PullPolicy {
    fn default() -> Self {
        PullPolicy::Missing
    }
}

/// The `POST /sandboxes` request shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub image: String,
    pub cpus: f64,
    pub memory: String,
    #[serde(default)]
    pub auto_clear_time_minutes: Option<u64>,
    #[serde(default)]
    pub pull: PullPolicy,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub network_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub experiment_id: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SandboxState {
    Pending,
    Running,
    Stopped,
}

/// The proxy port's key in `SandboxInfo.port_mapping` — the worker-HTTP port
/// used by the Sandbox Proxy (component H) and Worker HTTP Client (B).
pub const PROXY_PORT_KEY: &str = "PROXY";

/// Mutable record of a live sandbox (§3). The actor exclusively owns the
/// truth; the manager holds a cached projection written to the KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub host_name: String,
    pub host_ip: String,
    pub image: String,
    pub cpus: f64,
    pub memory: String,
    pub state: SandboxState,
    pub alive: bool,
    pub port_mapping: HashMap<String, u16>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub experiment_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub phases: ServiceStatus,
    #[serde(default)]
    pub create_time: u64,
}

impl SandboxInfo {
    pub fn proxy_port(&self) -> Option<u16> {
        self.port_mapping.get(PROXY_PORT_KEY).copied()
    }
}

/// The `GET /sandboxes/{id}/status` response — `SandboxInfo` plus `create_time`,
/// matching `rock/actions/sandbox/response.py`'s `SandboxStatusResponse`.
pub type SandboxStatusResponse = SandboxInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStartResponse {
    pub sandbox_id: String,
    pub host_ip: String,
    pub host_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountInfo {
    pub host_path: String,
    pub container_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemResourceMetrics {
    pub total_sandboxes: u64,
    pub running_sandboxes: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// TTL record persisted under `timeout:{sandbox_id}`; sliding expiration —
/// refreshed on every successful status read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlRecord {
    pub auto_clear_time: u64,
    pub expire_time: u64,
}

impl TtlRecord {
    pub fn new(now: u64, auto_clear_time_minutes: u64) -> Self {
        Self {
            auto_clear_time: auto_clear_time_minutes,
            expire_time: now + auto_clear_time_minutes * 60,
        }
    }

    pub fn refresh(&mut self, now: u64) {
        self.expire_time = now + self.auto_clear_time * 60;
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expire_time
    }
}
