//! Inference orchestration
//!
//! Drives one raw batch through cleaning, feature engineering, and up to three
//! model branches, then assembles a single result:
//!
//! - anomaly detector on the feature matrix, when loaded
//! - classifier on the feature matrix, when loaded and `label` is present
//! - forecaster on windows of the scaled `DO` column, when loaded, `DO` is
//!   present, and the series yields at least one window
//!
//! An unmet prerequisite omits the output key; it is never an error. The
//! orchestrator keeps no state between calls.

use crate::error::{PipelineError, Result};
use crate::models::{Batch, FeatureMatrix, InferenceResult, Label, DO_COLUMN, LABEL_COLUMN};
use crate::observability::PipelineMetrics;
use crate::preprocess::{Cleaner, CleaningReport, FeatureEngineer, ROLLING_WINDOW};
use crate::registry::{ModelKind, ModelRegistry, TabularModel};
use crate::windowing::{MinMaxScaler, SequenceWindower, DEFAULT_SEQUENCE_LENGTH};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Tunables for one orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Forecaster window length
    pub sequence_length: usize,
    /// Trailing window for derived features
    pub rolling_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            rolling_window: ROLLING_WINDOW,
        }
    }
}

/// The three result keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputKind {
    #[serde(rename = "anomaly")]
    Anomaly,
    #[serde(rename = "class")]
    Class,
    #[serde(rename = "DO_pred")]
    DoPred,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Anomaly => "anomaly",
            OutputKind::Class => "class",
            OutputKind::DoPred => "DO_pred",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an output key was omitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    ModelNotLoaded { model: ModelKind },
    MissingColumn { column: &'static str },
    NoWindows { rows: usize, sequence_length: usize },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ModelNotLoaded { .. } => "model_not_loaded",
            SkipReason::MissingColumn { .. } => "missing_column",
            SkipReason::NoWindows { .. } => "no_windows",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedOutput {
    pub output: OutputKind,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Everything one invocation produced, for adapters that need row alignment
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub cleaned: Batch,
    pub engineered: Batch,
    pub cleaning: CleaningReport,
    /// Engineered-batch index of each feature-matrix row
    pub feature_rows: Vec<usize>,
    /// Scaler fit on the cleaned `DO` column, when the forecaster ran
    pub scaler: Option<MinMaxScaler>,
    pub sequence_length: usize,
    pub result: InferenceResult,
    pub skipped: Vec<SkippedOutput>,
}

/// Routes prepared batches through the loaded models
pub struct InferenceOrchestrator {
    registry: Arc<ModelRegistry>,
    cleaner: Cleaner,
    engineer: FeatureEngineer,
    windower: SequenceWindower,
    metrics: PipelineMetrics,
}

impl InferenceOrchestrator {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self::with_config(registry, OrchestratorConfig::default())
    }

    pub fn with_config(registry: Arc<ModelRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            cleaner: Cleaner::default(),
            engineer: FeatureEngineer::new(config.rolling_window),
            windower: SequenceWindower::new(config.sequence_length),
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn sequence_length(&self) -> usize {
        self.windower.length()
    }

    /// Run the pipeline and return only the merged result
    pub fn run(&self, raw: &Batch) -> Result<InferenceResult> {
        self.run_detailed(raw).map(|run| run.result)
    }

    /// Run the pipeline and keep the intermediate batches
    pub fn run_detailed(&self, raw: &Batch) -> Result<PipelineRun> {
        let start = Instant::now();
        let outcome = self.execute(raw);
        self.metrics.observe_pipeline_latency(start.elapsed().as_secs_f64());

        match &outcome {
            Ok(run) => {
                self.metrics.record_rows(raw.num_rows(), run.cleaning.dropped());
                for kind in [OutputKind::Anomaly, OutputKind::Class, OutputKind::DoPred] {
                    if let Some(skipped) = run.skipped.iter().find(|s| s.output == kind) {
                        self.metrics
                            .inc_output_skipped(kind.as_str(), skipped.reason.as_str());
                    } else {
                        self.metrics.inc_output_produced(kind.as_str());
                    }
                }
            }
            Err(PipelineError::Inference { kind, .. }) => {
                self.metrics.inc_inference_errors(kind.as_str());
            }
            Err(_) => {}
        }

        outcome
    }

    fn execute(&self, raw: &Batch) -> Result<PipelineRun> {
        raw.ensure_not_empty()?;

        let (cleaned, cleaning) = self.cleaner.clean_with_report(raw);
        let engineered = self.engineer.engineer(&cleaned);

        let mut result = InferenceResult::default();
        let mut skipped = Vec::new();

        // Built lazily: a text predictor column only matters when a tabular
        // model would consume it.
        let mut matrix: Option<FeatureMatrix> = None;

        match self.registry.anomaly_detector() {
            Some(model) => {
                let features = feature_matrix(&mut matrix, &engineered)?;
                result.anomaly = Some(predict_rows(ModelKind::Anomaly, model, features)?);
            }
            None => skipped.push(SkippedOutput {
                output: OutputKind::Anomaly,
                reason: SkipReason::ModelNotLoaded {
                    model: ModelKind::Anomaly,
                },
            }),
        }

        match self.registry.classifier() {
            Some(_) if !engineered.has_column(LABEL_COLUMN) => skipped.push(SkippedOutput {
                output: OutputKind::Class,
                reason: SkipReason::MissingColumn {
                    column: LABEL_COLUMN,
                },
            }),
            Some(model) => {
                let features = feature_matrix(&mut matrix, &engineered)?;
                result.class = Some(predict_rows(ModelKind::Classifier, model, features)?);
            }
            None => skipped.push(SkippedOutput {
                output: OutputKind::Class,
                reason: SkipReason::ModelNotLoaded {
                    model: ModelKind::Classifier,
                },
            }),
        }

        let mut scaler = None;
        match (self.registry.forecaster(), cleaned.column(DO_COLUMN)) {
            (None, _) => skipped.push(SkippedOutput {
                output: OutputKind::DoPred,
                reason: SkipReason::ModelNotLoaded {
                    model: ModelKind::Forecaster,
                },
            }),
            (Some(_), None) => skipped.push(SkippedOutput {
                output: OutputKind::DoPred,
                reason: SkipReason::MissingColumn { column: DO_COLUMN },
            }),
            (Some(model), Some(column)) => {
                let series = column.values();
                let scaled = self.windower.scale_and_window(&series);
                scaler = scaled.scaler;
                if scaled.windows.is_empty() {
                    skipped.push(SkippedOutput {
                        output: OutputKind::DoPred,
                        reason: SkipReason::NoWindows {
                            rows: series.len(),
                            sequence_length: self.windower.length(),
                        },
                    });
                } else {
                    let predictions = model.predict(&scaled.windows)?;
                    if predictions.len() != scaled.windows.len() {
                        return Err(PipelineError::inference(
                            ModelKind::Forecaster,
                            format!(
                                "returned {} values for {} windows",
                                predictions.len(),
                                scaled.windows.len()
                            ),
                        ));
                    }
                    result.do_pred = Some(predictions);
                }
            }
        }

        for skip in &skipped {
            debug!(output = %skip.output, reason = skip.reason.as_str(), "Output omitted");
        }
        info!(
            input_rows = raw.num_rows(),
            cleaned_rows = cleaned.num_rows(),
            feature_rows = ?matrix.as_ref().map(FeatureMatrix::num_rows),
            anomaly = result.anomaly.is_some(),
            class = result.class.is_some(),
            do_pred = result.do_pred.is_some(),
            "Pipeline run complete"
        );

        Ok(PipelineRun {
            feature_rows: match matrix {
                Some(m) => m.source_rows,
                None => FeatureMatrix::from_batch(&engineered)
                    .map(|m| m.source_rows)
                    .unwrap_or_default(),
            },
            cleaned,
            engineered,
            cleaning,
            scaler,
            sequence_length: self.windower.length(),
            result,
            skipped,
        })
    }
}

fn feature_matrix<'a>(
    slot: &'a mut Option<FeatureMatrix>,
    engineered: &Batch,
) -> Result<&'a FeatureMatrix> {
    if slot.is_none() {
        *slot = Some(FeatureMatrix::from_batch(engineered)?);
    }
    slot.as_ref()
        .ok_or_else(|| PipelineError::input_shape("feature matrix unavailable"))
}

/// Invoke a row labeler and check it labeled every row
fn predict_rows(
    kind: ModelKind,
    model: &dyn TabularModel,
    features: &FeatureMatrix,
) -> Result<Vec<Label>> {
    if features.is_empty() {
        return Ok(Vec::new());
    }
    if features.num_features() == 0 {
        return Err(PipelineError::input_shape(
            "batch has no predictor columns besides label and timestamp",
        ));
    }
    let labels = model.predict(features)?;
    if labels.len() != features.num_rows() {
        return Err(PipelineError::inference(
            kind,
            format!(
                "returned {} labels for {} rows",
                labels.len(),
                features.num_rows()
            ),
        ));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, Column, INLIER, OUTLIER};
    use crate::registry::SequenceModel;
    use crate::windowing::SequenceWindow;

    /// Flags rows whose first feature exceeds a threshold
    struct ThresholdDetector(f64);

    impl TabularModel for ThresholdDetector {
        fn predict(&self, features: &FeatureMatrix) -> Result<Vec<Label>> {
            Ok(features
                .rows
                .iter()
                .map(|row| if row[0] > self.0 { OUTLIER } else { INLIER })
                .collect())
        }

        fn version(&self) -> &str {
            "threshold"
        }
    }

    struct ConstantClassifier;

    impl TabularModel for ConstantClassifier {
        fn predict(&self, features: &FeatureMatrix) -> Result<Vec<Label>> {
            Ok(vec![Label::Text("safe".into()); features.num_rows()])
        }

        fn version(&self) -> &str {
            "constant"
        }
    }

    /// Predicts the last value of each window
    struct PersistenceForecaster;

    impl SequenceModel for PersistenceForecaster {
        fn predict(&self, windows: &[SequenceWindow]) -> Result<Vec<f64>> {
            Ok(windows
                .iter()
                .map(|w| w.values().last().copied().unwrap_or(0.0))
                .collect())
        }

        fn version(&self) -> &str {
            "persistence"
        }
    }

    struct ShortForecaster;

    impl SequenceModel for ShortForecaster {
        fn predict(&self, _windows: &[SequenceWindow]) -> Result<Vec<f64>> {
            Ok(vec![0.0])
        }

        fn version(&self) -> &str {
            "short"
        }
    }

    fn full_registry() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::empty()
                .with_anomaly(Arc::new(ThresholdDetector(100.0)))
                .with_classifier(Arc::new(ConstantClassifier))
                .with_forecaster(Arc::new(PersistenceForecaster)),
        )
    }

    fn timestamps(n: usize) -> Column {
        Column::new(
            "timestamp",
            (0..n).map(|i| Cell::Text(format!("2024-05-01T00:{:02}:00", i))).collect(),
        )
    }

    fn do_ramp(n: usize) -> Column {
        Column::numeric("DO", &(1..=n).map(|v| v as f64).collect::<Vec<_>>())
    }

    #[test]
    fn test_ramp_scenario() {
        let batch = Batch::from_columns(vec![timestamps(12), do_ramp(12)]).unwrap();
        let orchestrator = InferenceOrchestrator::new(full_registry());
        let run = orchestrator.run_detailed(&batch).unwrap();

        // DO, DO_rate, DO_ma5: rows 0..=3 are warm-up rows.
        assert_eq!(run.feature_rows, (4..12).collect::<Vec<_>>());
        assert_eq!(run.result.anomaly.as_ref().unwrap().len(), 8);
        assert!(run.result.class.is_none());
        assert_eq!(run.result.do_pred.as_ref().unwrap().len(), 2);
        assert!(run
            .skipped
            .iter()
            .any(|s| s.output == OutputKind::Class
                && s.reason == SkipReason::MissingColumn { column: LABEL_COLUMN }));
    }

    #[test]
    fn test_anomaly_absent_without_detector() {
        let registry = Arc::new(ModelRegistry::empty().with_forecaster(Arc::new(PersistenceForecaster)));
        let batch = Batch::from_columns(vec![timestamps(12), do_ramp(12)]).unwrap();
        let result = InferenceOrchestrator::new(registry).run(&batch).unwrap();
        assert!(result.anomaly.is_none());
        assert_eq!(result.do_pred.unwrap().len(), 2);
    }

    #[test]
    fn test_class_requires_label_column() {
        let orchestrator = InferenceOrchestrator::new(full_registry());
        let mut batch = Batch::from_columns(vec![do_ramp(12)]).unwrap();
        assert!(orchestrator.run(&batch).unwrap().class.is_none());

        batch
            .push_column(Column::numeric("label", &[0.0; 12]))
            .unwrap();
        let result = orchestrator.run(&batch).unwrap();
        let classes = result.class.unwrap();
        assert_eq!(classes.len(), result.anomaly.unwrap().len());
        assert!(classes.iter().all(|c| *c == Label::Text("safe".into())));
    }

    #[test]
    fn test_do_pred_absent_without_do_column() {
        let batch = Batch::from_columns(vec![Column::numeric(
            "pH",
            &[7.0, 7.1, 7.2, 7.1, 7.0, 7.1, 7.2, 7.1, 7.0, 7.1, 7.2, 7.1],
        )])
        .unwrap();
        let run = InferenceOrchestrator::new(full_registry())
            .run_detailed(&batch)
            .unwrap();
        assert!(run.result.do_pred.is_none());
        assert!(run.result.anomaly.is_some());
        assert!(run.scaler.is_none());
    }

    #[test]
    fn test_do_pred_omitted_when_series_too_short() {
        let batch = Batch::from_columns(vec![do_ramp(10)]).unwrap();
        let run = InferenceOrchestrator::new(full_registry())
            .run_detailed(&batch)
            .unwrap();
        assert!(run.result.do_pred.is_none());
        assert!(run.skipped.iter().any(|s| matches!(
            s.reason,
            SkipReason::NoWindows { rows: 10, sequence_length: 10 }
        )));

        let json = serde_json::to_value(&run.result).unwrap();
        assert!(json.get("DO_pred").is_none());
    }

    #[test]
    fn test_do_pred_length_tracks_cleaned_rows() {
        let mut values: Vec<f64> = (1..=15).map(|v| v as f64).collect();
        values[7] = f64::NAN;
        let batch = Batch::from_columns(vec![Column::numeric("DO", &values)]).unwrap();
        let result = InferenceOrchestrator::new(full_registry()).run(&batch).unwrap();
        assert_eq!(result.do_pred.unwrap().len(), 4);
    }

    #[test]
    fn test_predictions_stay_in_scaled_space() {
        let batch = Batch::from_columns(vec![do_ramp(11)]).unwrap();
        let result = InferenceOrchestrator::new(full_registry()).run(&batch).unwrap();
        // Last value of the single window is 10 on a 1..=11 ramp: (10 - 1) / 10.
        assert_eq!(result.do_pred.unwrap(), vec![0.9]);
    }

    #[test]
    fn test_single_row_batch() {
        let batch = Batch::from_columns(vec![
            Column::numeric("DO", &[6.5]),
            Column::numeric("pH", &[7.2]),
        ])
        .unwrap();
        let run = InferenceOrchestrator::new(full_registry())
            .run_detailed(&batch)
            .unwrap();
        assert_eq!(run.cleaned.num_rows(), 1);
        assert_eq!(run.engineered.num_rows(), 1);
        assert_eq!(run.result.anomaly, Some(Vec::new()));
        assert!(run.result.do_pred.is_none());
    }

    #[test]
    fn test_empty_batch_is_input_error() {
        let err = InferenceOrchestrator::new(full_registry())
            .run(&Batch::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputShape(_)));
    }

    #[test]
    fn test_forecaster_output_length_checked() {
        let registry = Arc::new(ModelRegistry::empty().with_forecaster(Arc::new(ShortForecaster)));
        let batch = Batch::from_columns(vec![do_ramp(15)]).unwrap();
        let err = InferenceOrchestrator::new(registry).run(&batch).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Inference { kind: ModelKind::Forecaster, .. }
        ));
    }

    #[test]
    fn test_text_predictor_only_fails_tabular_branches() {
        let site = Column::new("site", (0..12).map(|_| Cell::Text("north".into())).collect());
        let batch = Batch::from_columns(vec![site, do_ramp(12)]).unwrap();

        let forecaster_only =
            Arc::new(ModelRegistry::empty().with_forecaster(Arc::new(PersistenceForecaster)));
        assert!(InferenceOrchestrator::new(forecaster_only).run(&batch).is_ok());

        let err = InferenceOrchestrator::new(full_registry())
            .run(&batch)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputShape(_)));
    }

    #[test]
    fn test_orchestrator_is_stateless() {
        let orchestrator = InferenceOrchestrator::new(full_registry());
        let batch = Batch::from_columns(vec![timestamps(14), do_ramp(14)]).unwrap();
        let first = orchestrator.run(&batch).unwrap();
        let second = orchestrator.run(&batch).unwrap();
        assert_eq!(first, second);
    }
}
