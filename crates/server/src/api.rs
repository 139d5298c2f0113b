//! HTTP API: prediction, health checks, Prometheus metrics and model availability

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pipeline_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    io::batch_from_json,
    observability::{PipelineMetrics, StructuredLogger},
    orchestrator::InferenceOrchestrator,
    registry::ModelAvailability,
    InferenceResult, PipelineError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Request bodies above this size are rejected unless configured otherwise
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;

const REQUEST_SOURCE: &str = "http";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<InferenceOrchestrator>,
    pub health_registry: HealthRegistry,
    pub metrics: PipelineMetrics,
    pub logger: StructuredLogger,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<InferenceOrchestrator>,
        health_registry: HealthRegistry,
        metrics: PipelineMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            orchestrator,
            health_registry,
            metrics,
            logger,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }
}

/// Error body: `{"error": "<kind>", "message": "<display>"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// An error mapped to an HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            StatusCode::UNSUPPORTED_MEDIA_TYPE => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, "invalid_json", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Run one batch through the pipeline.
///
/// Body is a JSON array of row objects. The response holds only the keys
/// whose model ran.
async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<InferenceResult>, ApiError> {
    let outcome = match payload {
        Ok(Json(body)) => run_pipeline(&state, body).await,
        Err(rejection) => Err(ApiError::from(rejection)),
    };

    if let Err(err) = &outcome {
        state.metrics.inc_requests_rejected();
        state
            .logger
            .log_batch_rejected(REQUEST_SOURCE, &err.body.error, &err.body.message);
    }
    outcome.map(Json)
}

async fn run_pipeline(
    state: &AppState,
    body: serde_json::Value,
) -> Result<InferenceResult, ApiError> {
    let batch = batch_from_json(&body)?;
    let input_rows = batch.num_rows();

    let orchestrator = state.orchestrator.clone();
    let joined = tokio::task::spawn_blocking(move || orchestrator.run_detailed(&batch)).await;

    // A model failing at runtime degrades the pipeline; a panicked task fails it.
    let run = match joined {
        Ok(Ok(run)) => run,
        Ok(Err(err)) => {
            if let PipelineError::Inference { kind, .. } = &err {
                state
                    .health_registry
                    .set_degraded(components::PIPELINE, format!("{} model failed: {}", kind, err))
                    .await;
            }
            return Err(err.into());
        }
        Err(e) => {
            error!(error = %e, "Pipeline task failed");
            state
                .health_registry
                .set_unhealthy(components::PIPELINE, format!("pipeline task failed: {}", e))
                .await;
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                e.to_string(),
            ));
        }
    };
    state.health_registry.set_healthy(components::PIPELINE).await;

    let produced: Vec<&str> = [
        run.result.anomaly.as_ref().map(|_| "anomaly"),
        run.result.class.as_ref().map(|_| "class"),
        run.result.do_pred.as_ref().map(|_| "DO_pred"),
    ]
    .into_iter()
    .flatten()
    .collect();
    state
        .logger
        .log_batch(REQUEST_SOURCE, input_rows, run.cleaned.num_rows(), &produced);

    Ok(run.result)
}

/// Model availability report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelAvailability>,
    pub sequence_length: usize,
    pub checked_at: String,
}

async fn models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.orchestrator.registry().availability(),
        sequence_length: state.orchestrator.sequence_length(),
        checked_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        // An empty model slot disables one output, not the service
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/predict", post(predict))
        .route("/models", get(models))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the API server and run until ctrl-c
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
