//! Offline commands: preprocessing, training sequences and batch inference on CSV files

use anyhow::{Context, Result};
use colored::Colorize;
use pipeline_lib::{
    io::{annotate, read_csv_path, write_csv_path, write_sequences_csv, ForecastAlignment},
    observability::StructuredLogger,
    orchestrator::{InferenceOrchestrator, OrchestratorConfig, OutputKind, SkipReason},
    preprocess::{self, CleaningReport},
    registry::{ModelKind, ModelPaths, ModelRegistry},
    windowing::{MinMaxScaler, SequenceWindower},
    Batch, DO_COLUMN,
};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;
use tracing::{debug, info, warn};

use crate::output::{format_scaled, print_info, print_json, print_success, print_table, print_warning, OutputFormat};

const SERVICE_NAME: &str = "aqs";

/// Row for the cleaning table
#[derive(Tabled)]
struct CleaningRow {
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Rows")]
    rows: usize,
}

/// Row for the outputs table
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct OutputRow {
    #[tabled(rename = "Output")]
    pub output: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Detail")]
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareSummary {
    pub output: PathBuf,
    pub cleaning: CleaningReport,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequencesSummary {
    pub output: PathBuf,
    pub values: usize,
    pub skipped_values: usize,
    pub sequence_length: usize,
    pub windows: usize,
    pub scaler: Option<MinMaxScaler>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub output: PathBuf,
    pub cleaning: CleaningReport,
    pub feature_rows: usize,
    pub forecast_alignment: ForecastAlignment,
    pub outputs: Vec<OutputRow>,
}

/// Options for the `run` command
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub paths: ModelPaths,
    pub required: Vec<ModelKind>,
    pub sequence_length: usize,
    pub include_features: bool,
    pub forecast_alignment: ForecastAlignment,
}

fn read_input(path: &Path) -> Result<Batch> {
    read_csv_path(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Clean and engineer a raw CSV into training input
pub fn prepare_file(input: &Path, output: &Path) -> Result<PrepareSummary> {
    let raw = read_input(input)?;
    let (prepared, cleaning) = preprocess::prepare(&raw);

    write_csv_path(&prepared, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(PrepareSummary {
        output: output.to_path_buf(),
        cleaning,
        columns: prepared.column_names().map(str::to_string).collect(),
    })
}

pub fn prepare(input: &Path, output: &Path, format: OutputFormat) -> Result<()> {
    let summary = prepare_file(input, output)?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            print_table(cleaning_rows(&summary.cleaning), "Input has no rows");
            print_success(&format!(
                "Wrote {} rows x {} columns to {}",
                summary.cleaning.output_rows,
                summary.columns.len(),
                summary.output.display()
            ));
        }
    }

    Ok(())
}

/// Window the `DO` column of a prepared CSV into `t0..t{n-1},target` rows
pub fn sequences_file(input: &Path, output: &Path, sequence_length: usize) -> Result<SequencesSummary> {
    let prepared = read_input(input)?;
    let column = prepared
        .column(DO_COLUMN)
        .with_context(|| format!("{} has no '{}' column", input.display(), DO_COLUMN))?;

    let all = column.values();
    let values: Vec<f64> = all.iter().copied().filter(|v| v.is_finite()).collect();
    if values.len() < all.len() {
        warn!(
            input = %input.display(),
            skipped = all.len() - values.len(),
            "Skipping missing or non-finite DO values"
        );
    }

    let windower = SequenceWindower::new(sequence_length);
    let sequences = windower.scale_and_window_with_targets(&values);

    let file = File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    write_sequences_csv(&sequences, BufWriter::new(file))?;

    Ok(SequencesSummary {
        output: output.to_path_buf(),
        values: values.len(),
        skipped_values: all.len() - values.len(),
        sequence_length: windower.length(),
        windows: sequences.windows.len(),
        scaler: sequences.scaler,
    })
}

pub fn sequences(input: &Path, output: &Path, sequence_length: usize, format: OutputFormat) -> Result<()> {
    let summary = sequences_file(input, output, sequence_length)?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            if summary.skipped_values > 0 {
                print_warning(&format!(
                    "Skipped {} missing or non-finite DO values; run `aqs prepare` first",
                    summary.skipped_values
                ));
            }
            if summary.windows == 0 {
                print_warning(&format!(
                    "{} DO values yield no windows of length {}",
                    summary.values, summary.sequence_length
                ));
            }
            if let Some(scaler) = &summary.scaler {
                print_info(&format!("Scaler min={} max={}", scaler.min, scaler.max));
            }
            print_success(&format!(
                "Wrote {} sequences to {}",
                summary.windows,
                summary.output.display()
            ));
        }
    }

    Ok(())
}

/// Route a CSV batch through an orchestrator and write the annotated rows
pub fn run_file(
    orchestrator: &InferenceOrchestrator,
    input: &Path,
    output: &Path,
    include_features: bool,
    alignment: ForecastAlignment,
) -> Result<RunSummary> {
    let raw = read_input(input)?;
    let run = orchestrator.run_detailed(&raw)?;

    let annotated = annotate(&run, include_features, alignment)?;
    write_csv_path(&annotated, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        output = %output.display(),
        rows = annotated.num_rows(),
        columns = annotated.num_columns(),
        forecast_alignment = %alignment,
        "Wrote annotated batch"
    );

    let mut outputs = Vec::new();
    for kind in [OutputKind::Anomaly, OutputKind::Class, OutputKind::DoPred] {
        let row = match run.skipped.iter().find(|s| s.output == kind) {
            Some(skipped) => OutputRow {
                output: kind.to_string(),
                status: "skipped".to_string(),
                detail: describe_skip(&skipped.reason),
            },
            None => OutputRow {
                output: kind.to_string(),
                status: "produced".to_string(),
                detail: produced_detail(kind, &run.result),
            },
        };
        outputs.push(row);
    }

    let produced: Vec<&str> = outputs
        .iter()
        .filter(|row| row.status == "produced")
        .map(|row| row.output.as_str())
        .collect();
    StructuredLogger::new(SERVICE_NAME).log_batch(
        &input.display().to_string(),
        raw.num_rows(),
        run.cleaned.num_rows(),
        &produced,
    );

    Ok(RunSummary {
        output: output.to_path_buf(),
        cleaning: run.cleaning,
        feature_rows: run.feature_rows.len(),
        forecast_alignment: alignment,
        outputs,
    })
}

pub fn run(options: RunOptions, format: OutputFormat) -> Result<()> {
    debug!(
        anomaly = ?options.paths.anomaly,
        classifier = ?options.paths.classifier,
        forecaster = ?options.paths.forecaster,
        "Loading models"
    );
    let registry = ModelRegistry::load(&options.paths);
    let logger = StructuredLogger::new(SERVICE_NAME);
    for entry in registry.availability() {
        logger.log_model_slot(entry.model, &entry.status);
    }
    registry
        .require(&options.required)
        .context("No usable models; pass --anomaly-model, --classifier-model or --forecaster-model")?;

    let orchestrator = InferenceOrchestrator::with_config(
        Arc::new(registry),
        OrchestratorConfig {
            sequence_length: options.sequence_length,
            ..OrchestratorConfig::default()
        },
    );

    let summary = run_file(
        &orchestrator,
        &options.input,
        &options.output,
        options.include_features,
        options.forecast_alignment,
    )?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            print_table(cleaning_rows(&summary.cleaning), "Input has no rows");
            println!();
            println!("{}", "Outputs".bold());
            print_table(summary.outputs.clone(), "No outputs");
            print_success(&format!(
                "Wrote {} rows to {}",
                summary.cleaning.output_rows,
                summary.output.display()
            ));
        }
    }

    Ok(())
}

fn cleaning_rows(report: &CleaningReport) -> Vec<CleaningRow> {
    let mut rows = vec![CleaningRow {
        stage: "input".to_string(),
        rows: report.input_rows,
    }];
    rows.push(CleaningRow {
        stage: "dropped: missing or non-finite".to_string(),
        rows: report.undefined_rows,
    });
    for (column, dropped) in &report.outlier_rows {
        if *dropped > 0 {
            rows.push(CleaningRow {
                stage: format!("dropped: {} outlier", column),
                rows: *dropped,
            });
        }
    }
    rows.push(CleaningRow {
        stage: "cleaned".to_string(),
        rows: report.output_rows,
    });
    rows
}

fn describe_skip(reason: &SkipReason) -> String {
    match reason {
        SkipReason::ModelNotLoaded { model } => format!("{} model not loaded", model),
        SkipReason::MissingColumn { column } => format!("input has no '{}' column", column),
        SkipReason::NoWindows {
            rows,
            sequence_length,
        } => format!(
            "{} cleaned DO values, need more than {}",
            rows, sequence_length
        ),
    }
}

fn produced_detail(kind: OutputKind, result: &pipeline_lib::InferenceResult) -> String {
    match kind {
        OutputKind::Anomaly => {
            let total = result.anomaly.as_ref().map(Vec::len).unwrap_or(0);
            format!(
                "{} rows, {} outliers",
                total,
                result.outlier_count().unwrap_or(0)
            )
        }
        OutputKind::Class => {
            format!("{} rows", result.class.as_ref().map(Vec::len).unwrap_or(0))
        }
        OutputKind::DoPred => match result.do_pred.as_deref() {
            Some([.., last]) => format!(
                "{} predictions, last {} (scaled)",
                result.do_pred.as_ref().map(Vec::len).unwrap_or(0),
                format_scaled(*last)
            ),
            _ => "0 predictions".to_string(),
        },
    }
}
