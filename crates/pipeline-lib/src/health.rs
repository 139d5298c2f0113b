//! Health check infrastructure for the pipeline service
//!
//! Tracks one component per model slot plus the pipeline itself. An empty
//! model slot is reported as degraded rather than hidden, so partial model
//! availability is visible to liveness and readiness probes.

use crate::registry::{ModelKind, ModelRegistry, SlotStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is unavailable but the service still answers
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    use crate::registry::ModelKind;

    pub const PIPELINE: &str = "pipeline";
    pub const ANOMALY_MODEL: &str = "model_anomaly";
    pub const CLASSIFIER_MODEL: &str = "model_classifier";
    pub const FORECASTER_MODEL: &str = "model_forecaster";

    pub fn model(kind: ModelKind) -> &'static str {
        match kind {
            ModelKind::Anomaly => ANOMALY_MODEL,
            ModelKind::Classifier => CLASSIFIER_MODEL,
            ModelKind::Forecaster => FORECASTER_MODEL,
        }
    }
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Register the pipeline and one component per model slot.
    ///
    /// Loaded slots are healthy; empty slots are degraded with the reason.
    pub async fn register_models(&self, registry: &ModelRegistry) {
        self.register(components::PIPELINE).await;
        for kind in ModelKind::ALL {
            let health = match registry.status(kind) {
                SlotStatus::Loaded { .. } => ComponentHealth::healthy(),
                other => ComponentHealth::degraded(format!(
                    "{} output disabled: {}",
                    kind,
                    other.unavailable_reason().unwrap_or_default()
                )),
            };
            self.update(components::model(kind), health).await;
        }
    }

    /// Update component health status
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Mark component as healthy
    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Mark component as degraded
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    /// Mark component as unhealthy
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Models not yet loaded".to_string()),
            }
        } else if !health.status.is_operational() {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureMatrix, Label};
    use crate::registry::TabularModel;

    struct StubDetector;

    impl TabularModel for StubDetector {
        fn predict(&self, features: &FeatureMatrix) -> crate::Result<Vec<Label>> {
            Ok(vec![Label::Int(1); features.num_rows()])
        }

        fn version(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_model_slots_registered() {
        let models = ModelRegistry::empty().with_anomaly(Arc::new(StubDetector));
        let registry = HealthRegistry::new();
        registry.register_models(&models).await;

        let health = registry.health().await;
        assert_eq!(health.components.len(), 4);
        assert_eq!(
            health.components[components::ANOMALY_MODEL].status,
            ComponentStatus::Healthy
        );
        let forecaster = &health.components[components::FORECASTER_MODEL];
        assert_eq!(forecaster.status, ComponentStatus::Degraded);
        assert!(forecaster
            .message
            .as_deref()
            .unwrap()
            .contains("no artifact configured"));
        assert_eq!(health.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_pipeline_status_transitions() {
        let registry = HealthRegistry::new();
        registry.register(components::PIPELINE).await;

        registry
            .set_degraded(components::PIPELINE, "classifier model failed")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_healthy(components::PIPELINE).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components[components::PIPELINE].message.is_none());

        registry
            .set_unhealthy(components::PIPELINE, "pipeline task failed")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_ready_with_degraded_model() {
        let registry = HealthRegistry::new();
        registry.register_models(&ModelRegistry::empty()).await;
        registry.set_ready(true).await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::PIPELINE).await;
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::PIPELINE, "pipeline task failed")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
    }
}
