//! Binary entry point for the model service proxy (component J), matching
//! the CLI surface of `rock/cli/command/model_service.py` (`--host`,
//! `--port`, `--proxy-url`, `--retryable-status-codes`, `--request-timeout`)
//! with a JSON rules file standing in for the original's per-model routing
//! table.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use model_proxy::config::{ProxyConfig, ProxyRule};
use model_proxy::{build_router, log_startup, wait_service_available, AppState};
use tracing::info;

/// Model service proxy: routes `/v1/chat/completions` to an upstream LLM
/// endpoint by model name, retrying transient failures.
#[derive(Parser, Debug)]
#[command(name = "model-proxy")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8081)]
    port: u16,

    /// Upstream URL used when no rule in `--proxy-rules-file` matches the
    /// request's model.
    #[arg(long)]
    proxy_url: Option<String>,

    /// JSON file of `{"rules": [{"model_substring": "...", "url": "..."}], "default": "..."}`.
    #[arg(long)]
    proxy_rules_file: Option<String>,

    /// Explicit base URL for `GET /v1/*` passthrough; derived from
    /// `--proxy-url` if omitted.
    #[arg(long)]
    proxy_base_url: Option<String>,

    /// Comma-separated HTTP status codes that trigger a retry.
    #[arg(long, default_value = "408,429,500,502,503,504")]
    retryable_status_codes: String,

    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    #[arg(long, default_value_t = 30)]
    request_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_log();
    let args = Args::parse();

    let (mut rules, mut default_url) = (Vec::<ProxyRule>::new(), args.proxy_url.clone());
    if let Some(path) = &args.proxy_rules_file {
        let (file_rules, file_default) = ProxyConfig::load_rules_file(path)?;
        rules = file_rules;
        if default_url.is_none() {
            default_url = file_default;
        }
    }

    let retryable_status_codes: Vec<u16> = args
        .retryable_status_codes
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let base_url = args.proxy_base_url.clone().or_else(|| default_url.clone());

    let config = ProxyConfig {
        host: args.host.clone(),
        port: args.port,
        rules,
        default_url,
        base_url,
        retryable_status_codes,
        request_timeout: Duration::from_secs(args.request_timeout),
        max_attempts: args.max_attempts,
    };
    log_startup(&config);

    let probe_client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
    for rule in &config.rules {
        if !wait_service_available(&rule.url, &probe_client, Duration::from_secs(1)).await {
            info!(url = %rule.url, "upstream not yet reachable at startup, will still accept traffic");
        }
    }

    let state = AppState::new(config.clone());
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "model proxy listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn setup_log() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};
    if tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .is_err()
    {}
}
