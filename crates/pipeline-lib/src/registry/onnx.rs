//! ONNX model handles using tract
//!
//! Artifacts are parsed once at startup. Batch size varies per request, so
//! the concrete input shape is bound and the plan optimized on each call.

use super::{ModelKind, SequenceModel, SlotStatus, TabularModel};
use crate::error::{PipelineError, Result};
use crate::models::{FeatureMatrix, Label};
use crate::windowing::SequenceWindow;
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Inference latency above which a warning is logged
const SLOW_INFERENCE_MS: u128 = 250;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Compute SHA256 checksum of artifact bytes
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Parsed, not yet shape-bound ONNX graph plus its provenance
struct OnnxArtifact {
    kind: ModelKind,
    model: InferenceModel,
    version: String,
    checksum: String,
}

impl OnnxArtifact {
    fn from_path(kind: ModelKind, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| PipelineError::ModelLoad {
            kind,
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| kind.to_string());
        Self::from_bytes(kind, &bytes, &stem)
    }

    fn from_bytes(kind: ModelKind, bytes: &[u8], name: &str) -> Result<Self> {
        if bytes.is_empty() {
            return Err(PipelineError::ModelLoad {
                kind,
                reason: "artifact is empty".to_string(),
            });
        }

        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .context("Failed to parse ONNX model")
            .map_err(|e| PipelineError::ModelLoad {
                kind,
                reason: format!("{:#}", e),
            })?;

        let checksum = compute_checksum(bytes);
        let version = format!("{}@{}", name, &checksum[..12]);
        debug!(model = %kind, version = %version, size = bytes.len(), "Parsed ONNX artifact");

        Ok(Self {
            kind,
            model,
            version,
            checksum,
        })
    }

    /// Bind the input shape and build a runnable plan
    fn plan(&self, input_fact: TypedFact) -> TractResult<TractModel> {
        self.model
            .clone()
            .with_input_fact(0, input_fact.into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")
    }

    /// Run the graph on one input tensor and return its first output
    fn run(&self, input_fact: TypedFact, input: Tensor) -> Result<Tensor> {
        let start = Instant::now();

        let output = self
            .plan(input_fact)
            .and_then(|plan| plan.run(tvec!(input.into())))
            .and_then(|mut outputs| {
                if outputs.is_empty() {
                    anyhow::bail!("No output from model");
                }
                Ok(outputs.remove(0).into_tensor())
            })
            .map_err(|e| PipelineError::inference(self.kind, format!("{:#}", e)))?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > SLOW_INFERENCE_MS {
            warn!(
                model = %self.kind,
                elapsed_ms = elapsed.as_millis() as u64,
                "Inference exceeded {}ms", SLOW_INFERENCE_MS
            );
        } else {
            debug!(model = %self.kind, elapsed_us = elapsed.as_micros() as u64, "Inference completed");
        }

        Ok(output)
    }

    fn status(&self) -> SlotStatus {
        SlotStatus::Loaded {
            version: self.version.clone(),
            checksum: Some(self.checksum.clone()),
        }
    }
}

/// Row labeler backed by an ONNX graph taking `f32[rows, features]`
pub struct OnnxTabularModel {
    artifact: OnnxArtifact,
}

impl OnnxTabularModel {
    pub fn from_path(kind: ModelKind, path: &Path) -> Result<Self> {
        Ok(Self {
            artifact: OnnxArtifact::from_path(kind, path)?,
        })
    }

    pub fn from_bytes(kind: ModelKind, bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            artifact: OnnxArtifact::from_bytes(kind, bytes, kind.as_str())?,
        })
    }

    pub fn status(&self) -> SlotStatus {
        self.artifact.status()
    }
}

impl TabularModel for OnnxTabularModel {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<Label>> {
        let kind = self.artifact.kind;
        let shape = (features.num_rows(), features.num_features());
        let input: Tensor = tract_ndarray::Array2::from_shape_vec(shape, features.to_f32())
            .map_err(|e| PipelineError::inference(kind, e))?
            .into();

        let output = self.artifact.run(f32::fact([shape.0, shape.1]), input)?;
        labels_from_tensor(&output).map_err(|e| PipelineError::inference(kind, format!("{:#}", e)))
    }

    fn version(&self) -> &str {
        &self.artifact.version
    }
}

/// Forecaster backed by an ONNX graph taking `f32[windows, length, 1]`
pub struct OnnxSequenceModel {
    artifact: OnnxArtifact,
}

impl OnnxSequenceModel {
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self {
            artifact: OnnxArtifact::from_path(ModelKind::Forecaster, path)?,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            artifact: OnnxArtifact::from_bytes(ModelKind::Forecaster, bytes, "forecaster")?,
        })
    }

    pub fn status(&self) -> SlotStatus {
        self.artifact.status()
    }
}

impl SequenceModel for OnnxSequenceModel {
    fn predict(&self, windows: &[SequenceWindow]) -> Result<Vec<f64>> {
        let kind = ModelKind::Forecaster;
        let length = windows.first().map(SequenceWindow::len).unwrap_or(0);
        if windows.iter().any(|w| w.len() != length) {
            return Err(PipelineError::inference(kind, "windows differ in length"));
        }

        let data: Vec<f32> = windows
            .iter()
            .flat_map(|w| w.values().iter().map(|v| *v as f32))
            .collect();
        let input: Tensor = tract_ndarray::Array3::from_shape_vec((windows.len(), length, 1), data)
            .map_err(|e| PipelineError::inference(kind, e))?
            .into();

        let output = self.artifact.run(f32::fact([windows.len(), length, 1]), input)?;
        let values = output
            .cast_to::<f32>()
            .and_then(|t| Ok(t.to_array_view::<f32>()?.iter().map(|v| *v as f64).collect()))
            .map_err(|e| PipelineError::inference(kind, format!("{:#}", e)))?;
        Ok(values)
    }

    fn version(&self) -> &str {
        &self.artifact.version
    }
}

/// Read integer or string labels; other numeric outputs are rounded
fn labels_from_tensor(output: &Tensor) -> TractResult<Vec<Label>> {
    let labels = match output.datum_type() {
        DatumType::I64 => output
            .to_array_view::<i64>()?
            .iter()
            .map(|v| Label::Int(*v))
            .collect(),
        DatumType::I32 => output
            .to_array_view::<i32>()?
            .iter()
            .map(|v| Label::Int(*v as i64))
            .collect(),
        DatumType::String => output
            .to_array_view::<String>()?
            .iter()
            .map(|s| Label::Text(s.clone()))
            .collect(),
        _ => output
            .cast_to::<f32>()?
            .to_array_view::<f32>()?
            .iter()
            .map(|v| Label::Int(v.round() as i64))
            .collect(),
    };
    Ok(labels)
}
