//! Model registry
//!
//! Holds the three independently trained models as opaque capability objects.
//! Each slot loads on its own: one missing or corrupt artifact never keeps the
//! other two from loading. The registry is built once at process start and is
//! read-only afterwards, so it can be shared across requests without locking.

mod onnx;

pub use onnx::{compute_checksum, OnnxSequenceModel, OnnxTabularModel};

use crate::error::{PipelineError, Result};
use crate::models::{FeatureMatrix, Label};
use crate::windowing::SequenceWindow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// The three model slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Anomaly,
    Classifier,
    Forecaster,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Anomaly, ModelKind::Classifier, ModelKind::Forecaster];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Anomaly => "anomaly",
            ModelKind::Classifier => "classifier",
            ModelKind::Forecaster => "forecaster",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anomaly" => Ok(ModelKind::Anomaly),
            "classifier" => Ok(ModelKind::Classifier),
            "forecaster" => Ok(ModelKind::Forecaster),
            other => Err(format!("unknown model kind '{}'", other)),
        }
    }
}

/// A model that labels each row of a feature matrix (anomaly detector, classifier)
pub trait TabularModel: Send + Sync {
    /// One label per matrix row, in row order
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<Label>>;

    fn version(&self) -> &str;
}

/// A model that maps each window to one next-value prediction (forecaster)
pub trait SequenceModel: Send + Sync {
    /// One value per window, in window order
    fn predict(&self, windows: &[SequenceWindow]) -> Result<Vec<f64>>;

    fn version(&self) -> &str;
}

/// Artifact locations; an absent path leaves the slot unconfigured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPaths {
    pub anomaly: Option<PathBuf>,
    pub classifier: Option<PathBuf>,
    pub forecaster: Option<PathBuf>,
}

impl ModelPaths {
    pub fn get(&self, kind: ModelKind) -> Option<&PathBuf> {
        match kind {
            ModelKind::Anomaly => self.anomaly.as_ref(),
            ModelKind::Classifier => self.classifier.as_ref(),
            ModelKind::Forecaster => self.forecaster.as_ref(),
        }
    }
}

/// Load outcome of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotStatus {
    Loaded {
        version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
    NotConfigured,
    Failed {
        reason: String,
    },
}

impl SlotStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, SlotStatus::Loaded { .. })
    }

    /// Why the slot is empty, if it is
    pub fn unavailable_reason(&self) -> Option<String> {
        match self {
            SlotStatus::Loaded { .. } => None,
            SlotStatus::NotConfigured => Some("no artifact configured".to_string()),
            SlotStatus::Failed { reason } => Some(reason.clone()),
        }
    }
}

/// Availability report entry for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAvailability {
    pub model: ModelKind,
    #[serde(flatten)]
    pub status: SlotStatus,
}

/// Read-only holder of the loaded models
pub struct ModelRegistry {
    anomaly: Option<Arc<dyn TabularModel>>,
    classifier: Option<Arc<dyn TabularModel>>,
    forecaster: Option<Arc<dyn SequenceModel>>,
    status: [SlotStatus; 3],
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("status", &self.status)
            .finish()
    }
}

impl ModelRegistry {
    /// Registry with every slot unconfigured
    pub fn empty() -> Self {
        Self {
            anomaly: None,
            classifier: None,
            forecaster: None,
            status: [
                SlotStatus::NotConfigured,
                SlotStatus::NotConfigured,
                SlotStatus::NotConfigured,
            ],
        }
    }

    /// Load every configured artifact. Failures are recorded per slot and
    /// never abort the other loads.
    pub fn load(paths: &ModelPaths) -> Self {
        let mut registry = Self::empty();

        for kind in ModelKind::ALL {
            let Some(path) = paths.get(kind) else {
                info!(model = %kind, "No artifact configured, slot left empty");
                continue;
            };

            let outcome = match kind {
                ModelKind::Anomaly | ModelKind::Classifier => {
                    OnnxTabularModel::from_path(kind, path).map(|model| {
                        let status = model.status();
                        registry.set_tabular(kind, Arc::new(model));
                        status
                    })
                }
                ModelKind::Forecaster => OnnxSequenceModel::from_path(path).map(|model| {
                    let status = model.status();
                    registry.forecaster = Some(Arc::new(model));
                    status
                }),
            };

            match outcome {
                Ok(status) => {
                    info!(model = %kind, path = %path.display(), "Model loaded");
                    registry.status[slot(kind)] = status;
                }
                Err(e) => {
                    warn!(model = %kind, path = %path.display(), error = %e, "Model failed to load");
                    registry.status[slot(kind)] = SlotStatus::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        }

        registry
    }

    pub fn with_anomaly(mut self, model: Arc<dyn TabularModel>) -> Self {
        self.status[slot(ModelKind::Anomaly)] = loaded(model.version());
        self.anomaly = Some(model);
        self
    }

    pub fn with_classifier(mut self, model: Arc<dyn TabularModel>) -> Self {
        self.status[slot(ModelKind::Classifier)] = loaded(model.version());
        self.classifier = Some(model);
        self
    }

    pub fn with_forecaster(mut self, model: Arc<dyn SequenceModel>) -> Self {
        self.status[slot(ModelKind::Forecaster)] = loaded(model.version());
        self.forecaster = Some(model);
        self
    }

    fn set_tabular(&mut self, kind: ModelKind, model: Arc<dyn TabularModel>) {
        match kind {
            ModelKind::Anomaly => self.anomaly = Some(model),
            ModelKind::Classifier => self.classifier = Some(model),
            ModelKind::Forecaster => {}
        }
    }

    /// Capability query used before invoking a model
    pub fn has(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Anomaly => self.anomaly.is_some(),
            ModelKind::Classifier => self.classifier.is_some(),
            ModelKind::Forecaster => self.forecaster.is_some(),
        }
    }

    pub fn anomaly_detector(&self) -> Option<&dyn TabularModel> {
        self.anomaly.as_deref()
    }

    pub fn classifier(&self) -> Option<&dyn TabularModel> {
        self.classifier.as_deref()
    }

    pub fn forecaster(&self) -> Option<&dyn SequenceModel> {
        self.forecaster.as_deref()
    }

    pub fn status(&self, kind: ModelKind) -> &SlotStatus {
        &self.status[slot(kind)]
    }

    pub fn loaded_count(&self) -> usize {
        ModelKind::ALL.iter().filter(|k| self.has(**k)).count()
    }

    pub fn availability(&self) -> Vec<ModelAvailability> {
        ModelKind::ALL
            .iter()
            .map(|kind| ModelAvailability {
                model: *kind,
                status: self.status(*kind).clone(),
            })
            .collect()
    }

    /// Startup check: fail when nothing loaded or a required slot is empty
    pub fn require(&self, required: &[ModelKind]) -> Result<()> {
        if self.loaded_count() == 0 {
            return Err(PipelineError::NoModelsLoaded);
        }
        for kind in required {
            if let Some(reason) = self.status(*kind).unavailable_reason() {
                return Err(PipelineError::ModelUnavailable {
                    kind: *kind,
                    reason,
                });
            }
        }
        Ok(())
    }
}

fn slot(kind: ModelKind) -> usize {
    match kind {
        ModelKind::Anomaly => 0,
        ModelKind::Classifier => 1,
        ModelKind::Forecaster => 2,
    }
}

fn loaded(version: &str) -> SlotStatus {
    SlotStatus::Loaded {
        version: version.to_string(),
        checksum: None,
    }
}
