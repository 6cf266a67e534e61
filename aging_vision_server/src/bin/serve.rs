use aging_vision::{Config, ReportPipeline, telemetry};
use aging_vision_server::{AppState, ServerConfig, purge_temp_dir, start_server};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment still applies.
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let pipeline = ReportPipeline::from_config(&config).context("failed to build report pipeline")?;
    let server_cfg = ServerConfig::from_config(&config);

    purge_temp_dir(&server_cfg.temp_dir).await;

    let state = AppState::new(Arc::new(pipeline), server_cfg.temp_dir.clone());
    let handle = start_server(state, server_cfg.clone())
        .await
        .with_context(|| format!("failed to start server on {}", server_cfg.bind_addr))?;
    info!(url = %handle.base_url(), model = %config.inference.model, "ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    handle.stop().await;

    purge_temp_dir(&server_cfg.temp_dir).await;
    Ok(())
}
