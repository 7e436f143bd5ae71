use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tracing::{info, warn};

use portfolio_gate::config::AppConfig;
use portfolio_gate::http::{build_router, AppState, HttpServer};
use portfolio_gate::ratelimit::RateLimiter;
use portfolio_gate::telemetry;

/// Portfolio API edge server.
#[derive(Debug, Parser)]
#[command(name = "portfolio-gate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind, overriding the configuration
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the strict rate limit preset (5 req/s, burst 10)
    #[arg(long)]
    strict_rate_limit: bool,

    /// Log filter directive, overriding the configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.strict_rate_limit {
        config.rate_limit.apply_strict_preset();
    }

    telemetry::init(&config.logging)?;

    info!("Starting Portfolio Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let addr = config.server.socket_addr()?;
    let policy = config.rate_limit.to_policy()?;
    info!(
        config_file = ?cli.config,
        addr = %addr,
        requests_per_second = policy.requests_per_second(),
        burst_size = policy.burst_size(),
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::new(policy));
    let app = build_router(AppState::new(Arc::clone(&rate_limiter)), &config, Router::new())?;

    let server = HttpServer::bind(addr, app, rate_limiter, config.server.shutdown_grace()).await?;
    server
        .serve_with_shutdown(async {
            let signal = termination_signal().await;
            info!(signal, "Termination signal received");
        })
        .await?;

    info!("Portfolio Gate stopped");
    Ok(())
}

/// Resolve with the name of the first termination signal delivered.
async fn termination_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, stopping on Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
