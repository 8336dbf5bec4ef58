use investment_insight_orchestrator::{api::start_server, config::EngineConfig, orchestrator::Orchestrator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env()?;
    info!(config = ?config, "Investment insight orchestrator starting");

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    info!("Orchestrator initialized");

    start_server(orchestrator, config.port, &config.cors_origins).await?;

    Ok(())
}
