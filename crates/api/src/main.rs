use std::sync::Arc;

use anyhow::{Context, Result};

use api::{AppConfig, AppState, build_orchestrator, router, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init()?;

    let config = AppConfig::load()?;
    let orchestrator = build_orchestrator(&config).await?;
    let state = Arc::new(AppState::new(orchestrator, config.run.default_source_path.clone()));

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.run.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.run.bind))?;

    tracing::info!("Server listening on http://{}", config.run.bind);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
