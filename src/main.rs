use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use mockup_studio::config::Config;
use mockup_studio::fal::FalClient;
use mockup_studio::routes::{router, spawn_session_sweeper, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    if config.fal_key.is_some() {
        tracing::info!("Using FAL API key: {}", config.masked_key());
    } else {
        tracing::warn!("⚠️ FAL_KEY is not set; every generation will fail with a configuration error");
    }

    let client = FalClient::new(&config).context("building fal client")?;
    let state = AppState::new(Arc::new(client)).with_upload_limit(config.max_upload_bytes);
    spawn_session_sweeper(state.clone(), config.session_ttl, config.sweep_interval);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
