//! Server configuration

use anyhow::{Context, Result};
use pipeline_lib::{ModelKind, ModelPaths, OrchestratorConfig, DEFAULT_SEQUENCE_LENGTH};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable prefix for every setting
pub const ENV_PREFIX: &str = "AQUASENSE";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub anomaly_model_path: Option<PathBuf>,

    #[serde(default)]
    pub classifier_model_path: Option<PathBuf>,

    #[serde(default)]
    pub forecaster_model_path: Option<PathBuf>,

    /// Models whose load failure aborts startup instead of disabling an output
    #[serde(default)]
    pub required_models: Vec<ModelKind>,

    /// Forecaster window length
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_sequence_length() -> usize {
    DEFAULT_SEQUENCE_LENGTH
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            anomaly_model_path: None,
            classifier_model_path: None,
            forecaster_model_path: None,
            required_models: Vec::new(),
            sequence_length: default_sequence_length(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional TOML file, then the environment.
    ///
    /// Environment variables take precedence, e.g. `AQUASENSE_PORT=8080` or
    /// `AQUASENSE_REQUIRED_MODELS=anomaly,forecaster`.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("required_models"),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: ServerConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sequence_length == 0 {
            anyhow::bail!("sequence_length must be at least 1");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            anomaly: self.anomaly_model_path.clone(),
            classifier: self.classifier_model_path.clone(),
            forecaster: self.forecaster_model_path.clone(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            sequence_length: self.sequence_length,
            ..OrchestratorConfig::default()
        }
    }
}
