//! Data preparation and inference pipeline for water-quality sensor batches
//!
//! This crate provides the core functionality for:
//! - Cleaning raw sensor batches (missing values, non-finite values, 3-sigma outliers)
//! - Feature engineering (rates, trailing means, pH/ammonia correlation)
//! - Min-max scaling and fixed-length sequence windowing for the DO forecaster
//! - A registry of independently loaded models and the orchestration that routes
//!   one batch through them
//! - CSV and JSON batch codecs shared by the offline and online adapters
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod io;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod preprocess;
pub mod registry;
pub mod windowing;

pub use error::{PipelineError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use io::ForecastAlignment;
pub use orchestrator::{InferenceOrchestrator, OrchestratorConfig, PipelineRun};
pub use registry::{ModelKind, ModelPaths, ModelRegistry, SequenceModel, TabularModel};
pub use windowing::{MinMaxScaler, SequenceWindow, SequenceWindower, DEFAULT_SEQUENCE_LENGTH};
