//! hudmon_agent: samples host metrics and streams them to browser viewers.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hudmon_agent::assembler::{gpu_budget, DEFAULT_SOURCE_BUDGET};
use hudmon_agent::gpu::{GpuCollector, SystemGpuProbe};
use hudmon_agent::metrics::SysinfoSource;
use hudmon_agent::sampler::spawn_sampler;
use hudmon_agent::{router, AgentConfig, AppState, Assembler, BroadcastHub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match AgentConfig::from_env_and_args() {
        Ok(c) => c,
        Err(usage) => {
            eprintln!("{usage}");
            return Ok(());
        }
    };

    let gpus = if cfg.gpu_enabled {
        GpuCollector::new(Arc::new(SystemGpuProbe::new(cfg.gpu_timeout)))
    } else {
        GpuCollector::disabled()
    };
    let assembler = Assembler::new(Arc::new(SysinfoSource::new()), gpus)
        .with_budgets(DEFAULT_SOURCE_BUDGET, gpu_budget(cfg.gpu_timeout));
    let hub = BroadcastHub::new(cfg.history_len);
    let sampler = spawn_sampler(assembler, hub.clone(), cfg.interval);

    let app = router(AppState {
        hub,
        auth_token: cfg.auth_token.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let bound = listener.local_addr()?;
    info!(
        %bound,
        history = cfg.history_len,
        interval_ms = cfg.interval.as_millis() as u64,
        gpu = cfg.gpu_enabled,
        auth = cfg.auth_token.is_some(),
        "dashboard at http://localhost:{}",
        bound.port()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server stopped unexpectedly")?;

    sampler.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
