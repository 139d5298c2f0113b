//! AquaSense CLI
//!
//! Offline preprocessing and batch inference on CSV files, plus a thin
//! client for a running aquasense-server.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{builder::RangedU64ValueParser, Parser, Subcommand};
use commands::{offline, online};
use pipeline_lib::{ForecastAlignment, ModelKind, ModelPaths, DEFAULT_SEQUENCE_LENGTH};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

/// AquaSense water-quality pipeline CLI
#[derive(Parser)]
#[command(name = "aqs")]
#[command(author, version, about = "CLI for the AquaSense water-quality pipeline", long_about = None)]
pub struct Cli {
    /// Server URL for online commands (can also be set via AQS_SERVER_URL env var)
    #[arg(long, env = "AQS_SERVER_URL")]
    pub server_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Log pipeline events to stderr
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clean and feature-engineer a raw CSV (training input)
    Prepare {
        /// Raw sensor CSV
        #[arg(long, short)]
        input: PathBuf,

        /// Prepared CSV to write
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Window the DO column of a prepared CSV into forecaster training sequences
    Sequences {
        /// Prepared CSV
        #[arg(long, short)]
        input: PathBuf,

        /// Sequences CSV to write (t0..t{n-1},target)
        #[arg(long, short)]
        output: PathBuf,

        /// Window length
        #[arg(long, default_value_t = DEFAULT_SEQUENCE_LENGTH, value_parser = window_length())]
        sequence_length: usize,
    },

    /// Run batch inference on a CSV file
    Run {
        /// Raw sensor CSV
        #[arg(long, short)]
        input: PathBuf,

        /// Annotated CSV to write
        #[arg(long, short)]
        output: PathBuf,

        /// Anomaly detector ONNX artifact
        #[arg(long, env = "AQS_ANOMALY_MODEL")]
        anomaly_model: Option<PathBuf>,

        /// Classifier ONNX artifact
        #[arg(long, env = "AQS_CLASSIFIER_MODEL")]
        classifier_model: Option<PathBuf>,

        /// DO forecaster ONNX artifact
        #[arg(long, env = "AQS_FORECASTER_MODEL")]
        forecaster_model: Option<PathBuf>,

        /// Fail unless these models load (anomaly, classifier, forecaster)
        #[arg(long = "require", value_delimiter = ',')]
        required: Vec<ModelKind>,

        /// Forecaster window length
        #[arg(long, default_value_t = DEFAULT_SEQUENCE_LENGTH, value_parser = window_length())]
        sequence_length: usize,

        /// Also write the engineered feature columns
        #[arg(long)]
        include_features: bool,

        /// Rows that carry DO_pred: leading (prediction i on row i) or
        /// target (prediction i on row i + sequence length)
        #[arg(long, default_value_t = ForecastAlignment::Leading)]
        forecast_alignment: ForecastAlignment,
    },

    /// Send a CSV batch to a running server
    Predict {
        /// Raw sensor CSV
        #[arg(long, short)]
        input: PathBuf,
    },

    /// Show which models a running server loaded
    Models,
}

fn window_length() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = config::Config::load()?;
    let format = cli
        .format
        .or_else(|| {
            config
                .default_format
                .as_deref()
                .and_then(output::OutputFormat::from_config)
        })
        .unwrap_or_default();

    // Execute command
    match cli.command {
        Commands::Prepare { input, output } => {
            offline::prepare(&input, &output, format)?;
        }
        Commands::Sequences {
            input,
            output,
            sequence_length,
        } => {
            offline::sequences(&input, &output, sequence_length, format)?;
        }
        Commands::Run {
            input,
            output,
            anomaly_model,
            classifier_model,
            forecaster_model,
            required,
            sequence_length,
            include_features,
            forecast_alignment,
        } => {
            let paths = ModelPaths {
                anomaly: anomaly_model.or(config.anomaly_model_path),
                classifier: classifier_model.or(config.classifier_model_path),
                forecaster: forecaster_model.or(config.forecaster_model_path),
            };
            offline::run(
                offline::RunOptions {
                    input,
                    output,
                    paths,
                    required,
                    sequence_length,
                    include_features,
                    forecast_alignment,
                },
                format,
            )?;
        }
        Commands::Predict { input } => {
            let client = server_client(cli.server_url, &config)?;
            online::predict(&client, &input, format).await?;
        }
        Commands::Models => {
            let client = server_client(cli.server_url, &config)?;
            online::models(&client, format).await?;
        }
    }

    Ok(())
}

fn server_client(flag: Option<String>, config: &config::Config) -> Result<client::ApiClient> {
    let url = flag
        .or_else(|| config.server_url.clone())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
    client::ApiClient::new(&url)
}
