//! The scheduling backend abstraction (component D) and its Docker
//! implementation, grounded in the teacher's `runtime.rs` docker helpers
//! (`create_sidecar_docker`, `delete_sidecar_docker`, `extract_ports`,
//! `commit_container`).
//!
//! The spec scopes alternate backends (k8s, a distributed actor scheduler)
//! out of this repository — only the Docker variant is implemented, behind
//! the same [`Operator`] trait so a second backend could be added later
//! without touching the manager.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use docktopus::DockerBuilder;
use docktopus::bollard::container::{Config as BollardConfig, InspectContainerOptions, RemoveContainerOptions};
use docktopus::bollard::models::{ContainerInspectResponse, HostConfig, PortBinding, PortMap};
use docktopus::container::Container;
use tokio::sync::OnceCell as AsyncOnceCell;

use crate::error::{Result, SandboxError};
use crate::types::{DeploymentConfig, MountInfo, PullPolicy, ResourceMetrics, SandboxInfo, SandboxState, SystemResourceMetrics, UserInfo, PROXY_PORT_KEY};
use crate::util::{now_ts, parse_memory_bytes, shell_escape};
use crate::worker_client::CommandResult;

/// Internal per-container bookkeeping the Docker backend needs beyond what
/// the manager's KV cache tracks. Not crash-safe by itself — the KV store
/// (component A) is the cross-process source of truth for `alive`/`timeout`
/// records; this is the operator's own working set within one process.
#[derive(Clone, Debug)]
struct DockerSandbox {
    container_id: String,
    host_ip: String,
    proxy_port: u16,
    image: String,
    cpus: f64,
    memory: String,
    auth_token: String,
}

#[async_trait::async_trait]
pub trait Operator: Send + Sync {
    async fn submit(&self, config: &DeploymentConfig, sandbox_id: &str, user_info: &UserInfo) -> Result<SandboxInfo>;
    async fn get_status(&self, sandbox_id: &str) -> Result<SandboxInfo>;
    async fn stop(&self, sandbox_id: &str) -> Result<bool>;
    async fn get_mount(&self, sandbox_id: &str) -> Result<MountInfo>;
    async fn get_statistics(&self, sandbox_id: &str) -> Result<ResourceMetrics>;
    async fn commit(&self, sandbox_id: &str, tag: &str, username: &str, password: &str) -> Result<CommandResult>;
    async fn collect_system_resource_metrics(&self) -> Result<SystemResourceMetrics>;
}

pub struct DockerOperator {
    builder: AsyncOnceCell<DockerBuilder>,
    sandboxes: DashMap<String, DockerSandbox>,
}

impl Default for DockerOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerOperator {
    pub fn new() -> Self {
        Self {
            builder: AsyncOnceCell::new(),
            sandboxes: DashMap::new(),
        }
    }

    async fn builder(&self) -> Result<&DockerBuilder> {
        self.builder
            .get_or_try_init(|| async {
                let config = crate::config::RuntimeConfig::load();
                match config.docker_host.as_deref() {
                    Some(host) => DockerBuilder::with_address(host)
                        .await
                        .map_err(|err| SandboxError::Docker(format!("failed to connect to docker at {host}: {err}"))),
                    None => DockerBuilder::new()
                        .await
                        .map_err(|err| SandboxError::Docker(format!("failed to connect to docker: {err}"))),
                }
            })
            .await
    }

    fn build_docker_config(proxy_port: u16, cpus: f64, memory_bytes: u64) -> BollardConfig<String> {
        let mut port_bindings = PortMap::new();
        port_bindings.insert(
            format!("{proxy_port}/tcp"),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: None,
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(format!("{proxy_port}/tcp"), HashMap::new());

        let mut host_config = HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        };
        if cpus > 0.0 {
            host_config.nano_cpus = Some((cpus * 1_000_000_000.0) as i64);
        }
        if memory_bytes > 0 {
            host_config.memory = Some(memory_bytes as i64);
        }

        BollardConfig {
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn extract_proxy_port(inspect: &ContainerInspectResponse, proxy_port: u16) -> Result<u16> {
        let network = inspect
            .network_settings
            .as_ref()
            .and_then(|settings| settings.ports.as_ref())
            .ok_or_else(|| SandboxError::Docker("missing container port mappings".into()))?;

        let key = format!("{proxy_port}/tcp");
        let bindings = network
            .get(&key)
            .and_then(|v| v.as_ref())
            .ok_or_else(|| SandboxError::Docker(format!("missing port bindings for {key}")))?;
        let host_port = bindings
            .first()
            .and_then(|binding| binding.host_port.as_ref())
            .ok_or_else(|| SandboxError::Docker(format!("missing host port for {key}")))?;
        host_port
            .parse::<u16>()
            .map_err(|_| SandboxError::Docker(format!("invalid host port for {key}")))
    }

    fn record_to_info(&self, sandbox_id: &str, record: &DockerSandbox, user_info: &UserInfo, state: SandboxState, alive: bool) -> SandboxInfo {
        let mut port_mapping = HashMap::new();
        port_mapping.insert(PROXY_PORT_KEY.to_string(), record.proxy_port);
        SandboxInfo {
            sandbox_id: sandbox_id.to_string(),
            host_name: "docker-local".to_string(),
            host_ip: record.host_ip.clone(),
            image: record.image.clone(),
            cpus: record.cpus,
            memory: record.memory.clone(),
            state,
            alive,
            port_mapping,
            user_id: user_info.user_id.clone(),
            experiment_id: user_info.experiment_id.clone(),
            namespace: user_info.namespace.clone(),
            auth_token: record.auth_token.clone(),
            phases: crate::service_status::ServiceStatus::new(),
            create_time: now_ts(),
        }
    }
}

#[async_trait::async_trait]
impl Operator for DockerOperator {
    async fn submit(&self, config: &DeploymentConfig, sandbox_id: &str, user_info: &UserInfo) -> Result<SandboxInfo> {
        let runtime_config = crate::config::RuntimeConfig::load();
        let builder = self.builder().await?;

        if config.pull != PullPolicy::Never {
            builder
                .pull_image(&config.image, None)
                .await
                .map_err(|err| SandboxError::Docker(format!("failed to pull image {}: {err}", config.image)))?;
        }

        let memory_bytes = parse_memory_bytes(&config.memory)?;
        let token = crate::auth::generate_token();
        let container_name = config
            .container_name
            .clone()
            .unwrap_or_else(|| format!("sandbox-{sandbox_id}"));

        let mut env_vars: Vec<String> = config.environment.iter().map(|(k, v)| format!("{k}={v}")).collect();
        env_vars.push(format!("SANDBOX_PROXY_PORT={}", runtime_config.proxy_port));
        env_vars.push(format!("SANDBOX_AUTH_TOKEN={token}"));

        let override_config = Self::build_docker_config(runtime_config.proxy_port, config.cpus, memory_bytes);

        // Partial failure after container creation but before readiness must
        // roll back rather than leave a half-created container (§4.D).
        let create_result: Result<(String, u16)> = async {
            let mut container = Container::new(builder.client(), config.image.clone())
                .with_name(container_name)
                .env(env_vars)
                .config_override(override_config);

            container
                .start(false)
                .await
                .map_err(|err| SandboxError::Docker(format!("failed to start container: {err}")))?;

            let container_id = container
                .id()
                .ok_or_else(|| SandboxError::Docker("missing container id".into()))?
                .to_string();

            let inspect = builder
                .client()
                .inspect_container(&container_id, None::<InspectContainerOptions>)
                .await
                .map_err(|err| SandboxError::Docker(format!("failed to inspect container: {err}")))?;

            let proxy_port = Self::extract_proxy_port(&inspect, runtime_config.proxy_port)?;
            Ok((container_id, proxy_port))
        }
        .await;

        let (container_id, proxy_port) = match create_result {
            Ok(v) => v,
            Err(err) => return Err(err),
        };

        let record = DockerSandbox {
            container_id,
            host_ip: runtime_config.public_host.clone(),
            proxy_port,
            image: config.image.clone(),
            cpus: config.cpus,
            memory: config.memory.clone(),
            auth_token: token,
        };

        let info = self.record_to_info(sandbox_id, &record, user_info, SandboxState::Pending, false);
        self.sandboxes.insert(sandbox_id.to_string(), record);
        crate::metrics::metrics().record_sandbox_created();
        Ok(info)
    }

    async fn get_status(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let record = self
            .sandboxes
            .get(sandbox_id)
            .ok_or_else(|| SandboxError::NotFound(format!("sandbox '{sandbox_id}' not found")))?
            .clone();

        let builder = self.builder().await?;
        let alive = builder
            .client()
            .inspect_container(&record.container_id, None::<InspectContainerOptions>)
            .await
            .map(|inspect| inspect.state.and_then(|s| s.running).unwrap_or(false))
            .unwrap_or(false);

        let state = if alive { SandboxState::Running } else { SandboxState::Stopped };
        Ok(self.record_to_info(sandbox_id, &record, &UserInfo::default(), state, alive))
    }

    async fn stop(&self, sandbox_id: &str) -> Result<bool> {
        let Some(record) = self.sandboxes.get(sandbox_id).map(|r| r.clone()) else {
            return Ok(false);
        };

        let builder = self.builder().await?;
        let container = Container::from_id(builder.client(), &record.container_id)
            .await
            .map_err(|err| SandboxError::Docker(format!("failed to load container: {err}")))?;

        // remove rather than merely stop: spec's stop() destroys the actor
        // object too, and a removed container can't leak a stale name.
        container
            .remove(Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
            .map_err(|err| SandboxError::Docker(format!("failed to remove container: {err}")))?;

        self.sandboxes.remove(sandbox_id);
        crate::metrics::metrics().record_sandbox_deleted();
        Ok(true)
    }

    async fn get_mount(&self, sandbox_id: &str) -> Result<MountInfo> {
        if !self.sandboxes.contains_key(sandbox_id) {
            return Err(SandboxError::NotFound(format!("sandbox '{sandbox_id}' not found")));
        }
        Ok(MountInfo {
            host_path: format!("/var/lib/sandbox-runtime/{sandbox_id}"),
            container_path: "/workspace".to_string(),
        })
    }

    async fn get_statistics(&self, sandbox_id: &str) -> Result<ResourceMetrics> {
        let record = self
            .sandboxes
            .get(sandbox_id)
            .ok_or_else(|| SandboxError::NotFound(format!("sandbox '{sandbox_id}' not found")))?
            .clone();

        let builder = self.builder().await?;
        let stats = builder
            .client()
            .stats(
                &record.container_id,
                Some(docktopus::bollard::container::StatsOptions { stream: false, one_shot: true }),
            );
        use futures_util::StreamExt;
        let mut stats = Box::pin(stats);
        let sample = stats
            .next()
            .await
            .ok_or_else(|| SandboxError::Docker("no stats sample available".into()))?
            .map_err(|err| SandboxError::Docker(format!("failed to read container stats: {err}")))?;

        let cpu_delta = sample.cpu_stats.cpu_usage.total_usage as f64
            - sample.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = sample.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - sample.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let cpu_percent = if system_delta > 0.0 { (cpu_delta / system_delta) * 100.0 } else { 0.0 };

        let memory_bytes = sample.memory_stats.usage.unwrap_or(0);
        let memory_limit_bytes = sample.memory_stats.limit.unwrap_or(0);

        Ok(ResourceMetrics { cpu_percent, memory_bytes, memory_limit_bytes })
    }

    async fn commit(&self, sandbox_id: &str, tag: &str, _username: &str, _password: &str) -> Result<CommandResult> {
        let record = self
            .sandboxes
            .get(sandbox_id)
            .ok_or_else(|| SandboxError::NotFound(format!("sandbox '{sandbox_id}' not found")))?
            .clone();

        let builder = self.builder().await?;
        use docktopus::bollard::image::CommitContainerOptions;
        let options = CommitContainerOptions {
            container: record.container_id.clone(),
            repo: format!("sandbox-snapshot/{sandbox_id}"),
            tag: shell_escape(tag).trim_matches('\'').to_string(),
            comment: format!("commit of sandbox {sandbox_id}"),
            pause: true,
            ..Default::default()
        };
        let response = builder
            .client()
            .commit_container(options, BollardConfig::<String>::default())
            .await
            .map_err(|err| SandboxError::Docker(format!("failed to commit container: {err}")))?;

        Ok(CommandResult {
            stdout: response.id.unwrap_or_default(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: None,
        })
    }

    async fn collect_system_resource_metrics(&self) -> Result<SystemResourceMetrics> {
        let total = self.sandboxes.len() as u64;
        let mut running = 0u64;
        for entry in self.sandboxes.iter() {
            if self.get_status(entry.key()).await.map(|i| i.alive).unwrap_or(false) {
                running += 1;
            }
        }
        Ok(SystemResourceMetrics {
            total_sandboxes: total,
            running_sandboxes: running,
            cpu_percent: 0.0,
            memory_percent: 0.0,
        })
    }
}

/// Poll a sandbox's in-container gateway until it responds successfully or
/// the timeout expires. Used by the actor's `gateway_ready` phase.
pub async fn wait_for_gateway_ready(host_ip: &str, port: u16, timeout: Duration) -> bool {
    let client = match crate::util::http_client() {
        Ok(c) => c,
        Err(_) => return false,
    };
    let url = format!("http://{host_ip}:{port}/health");
    let ready = tokio::time::timeout(timeout, async {
        loop {
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
    .await;
    ready.is_ok()
}
