//! AquaSense server - online water-quality inference
//!
//! Loads the configured models once, then answers `POST /predict` with the
//! same data preparation the offline runner applies.

use anyhow::{Context, Result};
use aquasense_server::{api, config::ServerConfig};
use pipeline_lib::{
    health::HealthRegistry,
    observability::{PipelineMetrics, StructuredLogger},
    orchestrator::InferenceOrchestrator,
    registry::ModelRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const SERVICE_NAME: &str = "aquasense-server";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting aquasense-server");

    // Optional config file as the only positional argument
    let config_file = std::env::args_os().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_file.as_deref())?;
    info!(
        listen_addr = %config.listen_addr(),
        sequence_length = config.sequence_length,
        required_models = ?config.required_models,
        "Server configured"
    );

    // Load every slot; a failed slot is reported, not fatal, unless required
    let registry = tokio::task::spawn_blocking({
        let paths = config.model_paths();
        move || ModelRegistry::load(&paths)
    })
    .await
    .context("Model loading task failed")?;

    let availability = registry.availability();
    let metrics = PipelineMetrics::new();
    metrics.set_model_availability(&availability);

    let logger = StructuredLogger::new(SERVICE_NAME);
    logger.log_startup(SERVER_VERSION, &availability);

    registry
        .require(&config.required_models)
        .context("Model registry is not usable")?;

    let health_registry = HealthRegistry::new();
    health_registry.register_models(&registry).await;

    let orchestrator = Arc::new(InferenceOrchestrator::with_config(
        Arc::new(registry),
        config.orchestrator_config(),
    ));

    // Create shared application state
    let app_state = Arc::new(
        api::AppState::new(orchestrator, health_registry.clone(), metrics, logger.clone())
            .with_body_limit(config.max_body_bytes),
    );

    // Models are loaded once; the service is ready as soon as it listens
    health_registry.set_ready(true).await;

    api::serve(&config.listen_addr(), app_state).await?;

    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
