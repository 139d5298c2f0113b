//! Commands that talk to a running aquasense-server

use anyhow::{Context, Result};
use colored::Colorize;
use pipeline_lib::{
    io::{batch_to_json, read_csv_path},
    registry::SlotStatus,
    InferenceResult,
};
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, ModelsResponse};
use crate::output::{
    color_anomaly, color_slot, format_scaled, format_timestamp, print_info, print_json,
    print_table, print_warning, short_checksum, OutputFormat,
};

/// Row for the prediction table
#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Anomaly")]
    anomaly: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "DO_pred (scaled)")]
    do_pred: String,
}

/// Row for the models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Send a CSV batch to `POST /predict` and print the result
pub async fn predict(client: &ApiClient, input: &Path, format: OutputFormat) -> Result<()> {
    let batch = read_csv_path(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let rows = batch_to_json(&batch);

    let result = client.predict(&rows).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            if result.is_empty() {
                print_warning("No outputs produced for this batch");
                print_info("Check `aqs models` for unloaded models");
                return Ok(());
            }
            print_table(prediction_rows(&result), "No predictions");
            if let Some(outliers) = result.outlier_count() {
                println!("\nOutliers: {}", outliers);
            }
            if result.do_pred.is_some() {
                print_info("DO_pred values are in the scaled [0, 1] space of this batch");
            }
        }
    }

    Ok(())
}

/// Show which model slots the server loaded
pub async fn models(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: ModelsResponse = client.models().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            let rows: Vec<ModelRow> = report
                .models
                .iter()
                .map(|entry| {
                    let (version, detail) = match &entry.status {
                        SlotStatus::Loaded { version, checksum } => (
                            version.clone(),
                            checksum.as_deref().map(short_checksum).unwrap_or_default(),
                        ),
                        SlotStatus::NotConfigured => (String::new(), "output disabled".to_string()),
                        SlotStatus::Failed { reason } => (String::new(), reason.clone()),
                    };
                    ModelRow {
                        model: entry.model.to_string(),
                        state: color_slot(&entry.status),
                        version,
                        detail,
                    }
                })
                .collect();

            print_table(rows, "Server reported no model slots");
            println!(
                "\n{} {}",
                "Sequence length:".bold(),
                report.sequence_length
            );
            println!(
                "{} {}",
                "Checked at:".bold(),
                format_timestamp(&report.checked_at)
            );
        }
    }

    Ok(())
}

/// One table row per index; shorter outputs leave blanks
fn prediction_rows(result: &InferenceResult) -> Vec<PredictionRow> {
    let anomaly = result.anomaly.as_deref().unwrap_or_default();
    let class = result.class.as_deref().unwrap_or_default();
    let do_pred = result.do_pred.as_deref().unwrap_or_default();
    let len = anomaly.len().max(class.len()).max(do_pred.len());

    (0..len)
        .map(|i| PredictionRow {
            index: i,
            anomaly: anomaly
                .get(i)
                .map(|l| color_anomaly(&l.to_string()))
                .unwrap_or_default(),
            class: class.get(i).map(|l| l.to_string()).unwrap_or_default(),
            do_pred: do_pred.get(i).map(|v| format_scaled(*v)).unwrap_or_default(),
        })
        .collect()
}
