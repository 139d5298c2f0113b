//! Error taxonomy for the pipeline
//!
//! Only conditions the caller can act on are errors. A zero-window DO series
//! and zero-variance columns are handled inside the pipeline and never
//! surface here.

use crate::registry::ModelKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Batch has zero rows, is ragged, or holds a non-numeric value where a
    /// number is required
    #[error("Input shape error: {0}")]
    InputShape(String),

    /// A model listed as required failed to load
    #[error("Required {kind} model unavailable: {reason}")]
    ModelUnavailable { kind: ModelKind, reason: String },

    #[error("No models loaded: at least one of anomaly, classifier, forecaster must be available")]
    NoModelsLoaded,

    #[error("Failed to load {kind} model: {reason}")]
    ModelLoad { kind: ModelKind, reason: String },

    #[error("{kind} inference failed: {reason}")]
    Inference { kind: ModelKind, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InputShape(_) => "input_shape",
            PipelineError::ModelUnavailable { .. } => "model_unavailable",
            PipelineError::NoModelsLoaded => "no_models_loaded",
            PipelineError::ModelLoad { .. } => "model_load",
            PipelineError::Inference { .. } => "inference",
            PipelineError::Csv(_) => "csv",
            PipelineError::Json(_) => "json",
            PipelineError::Io(_) => "io",
        }
    }

    /// True when the caller sent something the pipeline cannot process
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InputShape(_) | PipelineError::Csv(_) | PipelineError::Json(_)
        )
    }

    pub(crate) fn input_shape(message: impl Into<String>) -> Self {
        PipelineError::InputShape(message.into())
    }

    pub(crate) fn inference(kind: ModelKind, reason: impl std::fmt::Display) -> Self {
        PipelineError::Inference {
            kind,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(PipelineError::input_shape("empty").is_client_error());
        assert!(!PipelineError::NoModelsLoaded.is_client_error());
        assert!(!PipelineError::inference(ModelKind::Forecaster, "bad shape").is_client_error());
    }

    #[test]
    fn test_error_messages_name_the_model() {
        let err = PipelineError::ModelUnavailable {
            kind: ModelKind::Classifier,
            reason: "file not found".to_string(),
        };
        assert_eq!(err.kind(), "model_unavailable");
        assert!(err.to_string().contains("classifier"));
    }
}
