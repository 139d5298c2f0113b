//! Observability infrastructure for the pipeline
//!
//! Provides:
//! - Prometheus metrics (pipeline latency, row counts, produced/skipped outputs, model availability)
//! - Structured JSON logging with tracing

use crate::registry::{ModelAvailability, ModelKind, SlotStatus};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct PipelineMetricsInner {
    pipeline_latency_seconds: Histogram,
    rows_received: IntCounter,
    rows_dropped: IntCounter,
    outputs_produced: IntCounterVec,
    outputs_skipped: IntCounterVec,
    model_available: GaugeVec,
    inference_errors: IntCounterVec,
    requests_rejected: IntCounter,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            pipeline_latency_seconds: register_histogram!(
                "aquasense_pipeline_latency_seconds",
                "Time spent preparing a batch and running inference",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register pipeline_latency_seconds"),

            rows_received: register_int_counter!(
                "aquasense_rows_received_total",
                "Rows received across all batches"
            )
            .expect("Failed to register rows_received"),

            rows_dropped: register_int_counter!(
                "aquasense_rows_dropped_total",
                "Rows removed by cleaning (undefined values and outliers)"
            )
            .expect("Failed to register rows_dropped"),

            outputs_produced: register_int_counter_vec!(
                "aquasense_outputs_produced_total",
                "Result keys produced, by output",
                &["output"]
            )
            .expect("Failed to register outputs_produced"),

            outputs_skipped: register_int_counter_vec!(
                "aquasense_outputs_skipped_total",
                "Result keys omitted, by output and reason",
                &["output", "reason"]
            )
            .expect("Failed to register outputs_skipped"),

            model_available: register_gauge_vec!(
                "aquasense_model_available",
                "1 when the model slot holds a loaded model, 0 otherwise",
                &["model", "version"]
            )
            .expect("Failed to register model_available"),

            inference_errors: register_int_counter_vec!(
                "aquasense_inference_errors_total",
                "Model invocations that failed",
                &["model"]
            )
            .expect("Failed to register inference_errors"),

            requests_rejected: register_int_counter!(
                "aquasense_requests_rejected_total",
                "Batches rejected before or during preparation"
            )
            .expect("Failed to register requests_rejected"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_pipeline_latency(&self, duration_secs: f64) {
        self.inner().pipeline_latency_seconds.observe(duration_secs);
    }

    pub fn record_rows(&self, received: usize, dropped: usize) {
        self.inner().rows_received.inc_by(received as u64);
        self.inner().rows_dropped.inc_by(dropped as u64);
    }

    pub fn inc_output_produced(&self, output: &str) {
        self.inner().outputs_produced.with_label_values(&[output]).inc();
    }

    pub fn inc_output_skipped(&self, output: &str, reason: &str) {
        self.inner()
            .outputs_skipped
            .with_label_values(&[output, reason])
            .inc();
    }

    pub fn inc_inference_errors(&self, model: &str) {
        self.inner().inference_errors.with_label_values(&[model]).inc();
    }

    pub fn inc_requests_rejected(&self) {
        self.inner().requests_rejected.inc();
    }

    /// Publish the availability of every model slot
    pub fn set_model_availability(&self, availability: &[ModelAvailability]) {
        self.inner().model_available.reset();
        for entry in availability {
            let (version, value) = match &entry.status {
                SlotStatus::Loaded { version, .. } => (version.as_str(), 1.0),
                SlotStatus::NotConfigured | SlotStatus::Failed { .. } => ("none", 0.0),
            };
            self.inner()
                .model_available
                .with_label_values(&[entry.model.as_str(), version])
                .set(value);
        }
    }
}

/// Structured logger for pipeline events
///
/// Provides consistent JSON-formatted logging for model loading,
/// pipeline runs, and service lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Log service startup with the outcome of every model slot
    pub fn log_startup(&self, version: &str, availability: &[ModelAvailability]) {
        let loaded: Vec<&str> = availability
            .iter()
            .filter(|a| a.status.is_loaded())
            .map(|a| a.model.as_str())
            .collect();
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            models_loaded = ?loaded,
            "AquaSense pipeline started"
        );
        for entry in availability {
            self.log_model_slot(entry.model, &entry.status);
        }
    }

    /// Log the load outcome of one model slot
    pub fn log_model_slot(&self, model: ModelKind, status: &SlotStatus) {
        match status {
            SlotStatus::Loaded { version, checksum } => {
                info!(
                    event = "model_loaded",
                    service = %self.service,
                    model = %model,
                    version = %version,
                    checksum = ?checksum,
                    "Model available"
                );
            }
            SlotStatus::NotConfigured => {
                warn!(
                    event = "model_unavailable",
                    service = %self.service,
                    model = %model,
                    reason = "not_configured",
                    "Model slot empty, its output will be omitted"
                );
            }
            SlotStatus::Failed { reason } => {
                warn!(
                    event = "model_unavailable",
                    service = %self.service,
                    model = %model,
                    reason = %reason,
                    "Model failed to load, its output will be omitted"
                );
            }
        }
    }

    /// Log one completed batch
    pub fn log_batch(&self, source: &str, input_rows: usize, cleaned_rows: usize, outputs: &[&str]) {
        info!(
            event = "batch_processed",
            service = %self.service,
            source = %source,
            input_rows = input_rows,
            cleaned_rows = cleaned_rows,
            outputs = ?outputs,
            "Batch processed"
        );
    }

    /// Log a batch that could not be processed
    pub fn log_batch_rejected(&self, source: &str, error_kind: &str, message: &str) {
        warn!(
            event = "batch_rejected",
            service = %self.service,
            source = %source,
            error_kind = %error_kind,
            message = %message,
            "Batch rejected"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "AquaSense pipeline shutting down"
        );
    }
}
