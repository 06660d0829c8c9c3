//! Runtime configuration loaded once at process start from environment
//! variables, following the teacher's `SidecarRuntimeConfig::load()`
//! env-var-driven pattern.

use std::env;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::util::parse_memory_bytes;
use crate::{DEFAULT_SIDECAR_HTTP_PORT, DEFAULT_SIDECAR_IMAGE};

/// The resource ceiling `submit` validates a [`crate::manager::DeploymentConfig`]
/// against (§3's `runtime.max_allowed`). Violations are rejected with
/// `BadRequest`, never silently clamped.
#[derive(Clone, Debug)]
pub struct MaxAllowedSpec {
    pub max_cpus: f64,
    pub max_memory_bytes: u64,
    pub max_auto_clear_time_minutes: u64,
    /// Process-wide concurrent-sandbox ceiling. `None` means unbounded.
    /// Supplemented from `rock/sandbox/sandbox_manager.py`'s
    /// `validate_sandbox_spec`, which also bounds sandbox count.
    pub max_concurrent_sandboxes: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub image: String,
    pub proxy_port: u16,
    pub public_host: String,
    pub timeout: Duration,
    pub docker_host: Option<String>,
    pub pull_image: bool,
    pub redis_url: String,
    pub default_auto_clear_time_minutes: u64,
    pub reaper_interval_secs: u64,
    pub reaper_scan_batch: usize,
    pub gateway_ready_timeout: Duration,
    pub max_allowed: MaxAllowedSpec,
}

static RUNTIME_CONFIG: OnceCell<RuntimeConfig> = OnceCell::new();

impl RuntimeConfig {
    fn env_u64(key: &str, default: u64) -> u64 {
        env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn env_f64(key: &str, default: f64) -> f64 {
        env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// Load configuration from environment variables. Cached after the
    /// first call — subsequent calls return the same config.
    pub fn load() -> &'static RuntimeConfig {
        RUNTIME_CONFIG.get_or_init(|| {
            let image = env::var("SANDBOX_IMAGE").unwrap_or_else(|_| DEFAULT_SIDECAR_IMAGE.to_string());
            let public_host = env::var("SANDBOX_PUBLIC_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
            let proxy_port = env::var("SANDBOX_PROXY_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(DEFAULT_SIDECAR_HTTP_PORT);
            let timeout = Self::env_u64("SANDBOX_REQUEST_TIMEOUT_SECS", crate::DEFAULT_TIMEOUT_SECS);
            let docker_host = env::var("DOCKER_HOST").ok();
            let pull_image = env::var("SANDBOX_PULL_IMAGE")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(true);
            let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
            let default_auto_clear_time_minutes = Self::env_u64("SANDBOX_DEFAULT_AUTO_CLEAR_MINUTES", 30);
            let reaper_interval_secs = Self::env_u64("SANDBOX_REAPER_INTERVAL_SECS", 10);
            let reaper_scan_batch = Self::env_u64("SANDBOX_REAPER_SCAN_BATCH", 100) as usize;
            let gateway_ready_timeout =
                Duration::from_secs(Self::env_u64("SANDBOX_GATEWAY_READY_TIMEOUT_SECS", 120));

            let max_cpus = Self::env_f64("SANDBOX_MAX_CPUS", 16.0);
            let max_memory_bytes = env::var("SANDBOX_MAX_MEMORY")
                .ok()
                .and_then(|v| parse_memory_bytes(&v).ok())
                .unwrap_or(64 * 1024 * 1024 * 1024);
            let max_auto_clear_time_minutes = Self::env_u64("SANDBOX_MAX_AUTO_CLEAR_MINUTES", 1440);
            let max_concurrent_sandboxes = env::var("SANDBOX_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse::<u64>().ok());

            RuntimeConfig {
                image,
                proxy_port,
                public_host,
                timeout: Duration::from_secs(timeout),
                docker_host,
                pull_image,
                redis_url,
                default_auto_clear_time_minutes,
                reaper_interval_secs,
                reaper_scan_batch,
                gateway_ready_timeout,
                max_allowed: MaxAllowedSpec {
                    max_cpus,
                    max_memory_bytes,
                    max_auto_clear_time_minutes,
                    max_concurrent_sandboxes,
                },
            }
        })
    }
}
