//! API client for a running aquasense-server

use anyhow::{Context, Result};
use pipeline_lib::{registry::ModelAvailability, InferenceResult};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the prediction server
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid server URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    /// Send a batch of row objects to `POST /predict`
    pub async fn predict(&self, rows: &serde_json::Value) -> Result<InferenceResult> {
        self.post("predict", rows).await
    }

    /// Query `GET /models`
    pub async fn models(&self) -> Result<ModelsResponse> {
        self.get("models").await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => anyhow::bail!("API error ({}): {}: {}", status, err.error, err.message),
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelAvailability>,
    pub sequence_length: usize,
    pub checked_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_lib::{registry::SlotStatus, Label, ModelKind};
    use serde_json::json;

    #[tokio::test]
    async fn test_predict_posts_rows() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/predict")
            .match_body(mockito::Matcher::Json(json!([{"DO": 6.5}])))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"anomaly": [1, -1], "DO_pred": [0.25]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let result = client.predict(&json!([{"DO": 6.5}])).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.anomaly, Some(vec![Label::Int(1), Label::Int(-1)]));
        assert!(result.class.is_none());
        assert_eq!(result.do_pred, Some(vec![0.25]));
    }

    #[tokio::test]
    async fn test_models_report() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "models": [
                        {"model": "anomaly", "state": "loaded", "version": "iforest@0123456789ab"},
                        {"model": "classifier", "state": "not_configured"},
                        {"model": "forecaster", "state": "failed", "reason": "missing file"}
                    ],
                    "sequence_length": 10,
                    "checked_at": "2024-05-01T00:00:00+00:00"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let report = client.models().await.unwrap();

        assert_eq!(report.models.len(), 3);
        assert_eq!(report.models[0].model, ModelKind::Anomaly);
        assert!(report.models[0].status.is_loaded());
        assert_eq!(report.models[1].status, SlotStatus::NotConfigured);
        assert_eq!(
            report.models[2].status,
            SlotStatus::Failed {
                reason: "missing file".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_error_body_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/predict")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "input_shape", "message": "Input shape error: batch has zero rows"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.predict(&json!([])).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("input_shape"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
