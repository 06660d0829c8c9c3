//! Binary entry point for the sandbox admin HTTP surface (component K):
//! wires the KV store, operator, deployment service, manager and proxy into
//! one instance graph, spawns the reaper, and serves the REST API from §6.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sandbox_runtime::auth::AdminTokens;
use sandbox_runtime::config::RuntimeConfig;
use sandbox_runtime::operator::{DockerOperator, Operator};
use sandbox_runtime::store::KvStore;
use sandbox_runtime::worker_client::WorkerClient;
use sandbox_runtime::{DeploymentService, Reaper, SandboxManager, SandboxProxy};
use tracing::{info, warn};

use sandbox_admin::router;
use sandbox_admin::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_log();

    let config = RuntimeConfig::load();

    let kv = match KvStore::connect(&config.redis_url).await {
        Ok(kv) => {
            info!(redis_url = %config.redis_url, "connected to kv store");
            Some(Arc::new(kv))
        }
        Err(err) => {
            warn!(%err, "kv store unavailable, running without crash-safe sandbox metadata");
            None
        }
    };

    let operator: Arc<dyn Operator> = Arc::new(DockerOperator::new());
    let worker = WorkerClient::new(config.timeout);
    let deployment = Arc::new(DeploymentService::new(operator, worker.clone(), config.gateway_ready_timeout));
    let manager = Arc::new(SandboxManager::new(deployment.clone(), kv.clone(), config));
    let proxy = Arc::new(SandboxProxy::new(manager.clone(), worker));

    let admin_tokens = AdminTokens::from_env();
    if admin_tokens.is_disabled() {
        warn!("SANDBOX_ADMIN_TOKENS is unset: admin API auth is disabled, for local development only");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if let Some(kv) = kv.clone() {
        let reaper = Arc::new(Reaper::new(
            manager.clone(),
            kv,
            Duration::from_secs(config.reaper_interval_secs),
            config.reaper_scan_batch,
        ));
        tokio::spawn(reaper.run(shutdown_rx));
    } else {
        warn!("no kv store configured: reaper disabled, sandboxes will not auto-expire");
    }

    let state = AppState { manager, proxy, admin_tokens };
    let app = router::build_router(state);

    let host = std::env::var("SANDBOX_ADMIN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("SANDBOX_ADMIN_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(9000);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    info!(%addr, "sandbox admin surface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, quiescing sandbox pool");
            let _ = shutdown_tx.send(true);
            let _guard = deployment.quiesce().await;
        })
        .await?;

    Ok(())
}

fn setup_log() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};
    if tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .is_err()
    {}
}
