//! Sandbox orchestration control plane: the manager, deployment service,
//! sandbox actor, operator backend, worker HTTP client, KV store client,
//! sandbox proxy and reaper that make up the core of a sandbox control
//! plane (§2 of the accompanying specification).

pub mod actor;
pub mod auth;
pub mod config;
pub mod deployment;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod operator;
pub mod proxy;
pub mod rate_limit;
pub mod reaper;
pub mod service_status;
pub mod store;
pub mod types;
pub mod util;
pub mod worker_client;

pub use deployment::DeploymentService;
pub use error::SandboxError;
pub use manager::SandboxManager;
pub use operator::{DockerOperator, Operator};
pub use proxy::SandboxProxy;
pub use reaper::Reaper;

pub const DEFAULT_SIDECAR_IMAGE: &str = "ghcr.io/tangle-network/sidecar:latest";
pub const DEFAULT_SIDECAR_HTTP_PORT: u16 = 8080;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
