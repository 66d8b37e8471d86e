use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = mc_app::load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    tracing::info!("matchcast starting...");
    tracing::info!("data_dir   = {:?}", config.data_dir);
    tracing::info!("dataset    = {:?}", config.dataset_path);
    tracing::info!("listen     = {}", config.listen);
    tracing::info!("backend    = {}", config.backend);
    tracing::info!("max_jobs   = {}", config.max_concurrent_jobs);

    let state = mc_app::build_state(&config).await?;

    let app = mc_api::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("bind to {}", config.listen))?;
    tracing::info!("HTTP API listening on {}", config.listen);

    axum::serve(listener, app).await.context("serve")?;

    Ok(())
}
