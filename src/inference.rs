//! Client for the external inference boundary.
//!
//! The inference service is operator-configured and authenticated with a
//! pre-shared API key. It accepts a feature vector and a model version and
//! returns a prediction payload that this service passes through opaque and
//! unvalidated.

use serde::Serialize;
use std::time::Duration;

/// Header carrying the pre-shared key, as expected by the inference service.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Inference boundary configuration.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of the inference service
    pub url: String,
    /// Pre-shared API key
    pub api_key: String,
    /// Overall deadline for one predict() call, retries included
    pub timeout: Duration,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt
    pub retry_backoff: Duration,
}

impl InferenceConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Get the predict endpoint URL.
    pub fn predict_url(&self) -> String {
        format!("{}/predict", self.url.trim_end_matches('/'))
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.url.trim_end_matches('/'))
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            api_key: "dev-key".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Inference client error types. Any of these surfaces to the caller as the
/// inference-unavailable condition.
#[derive(Debug)]
pub enum InferenceError {
    /// Transport-level failure
    Network(String),
    /// Service returned a non-success response
    Server { status: u16, message: String },
    /// Response body was not valid JSON
    Serialization(String),
    /// The overall call deadline elapsed
    DeadlineExceeded(Duration),
}

impl InferenceError {
    /// Transport failures and 5xx responses are worth retrying; 4xx are not.
    fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Network(_) => true,
            InferenceError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::Network(msg) => write!(f, "Inference network error: {msg}"),
            InferenceError::Server { status, message } => {
                write!(f, "Inference server error ({status}): {message}")
            }
            InferenceError::Serialization(msg) => {
                write!(f, "Inference serialization error: {msg}")
            }
            InferenceError::DeadlineExceeded(deadline) => {
                write!(f, "Inference call exceeded deadline of {deadline:?}")
            }
        }
    }
}

impl std::error::Error for InferenceError {}

/// Request body for the predict endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    /// Feature vector, in wire order
    pub features: Vec<f64>,
    /// Model version tag
    #[serde(rename = "modelVersion")]
    pub model_version: String,
}

/// Client for the inference service.
pub struct InferenceClient {
    config: InferenceConfig,
    client: reqwest::Client,
}

impl InferenceClient {
    /// Create a new inference client.
    pub fn new(config: InferenceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    /// Test connection to the inference service.
    pub async fn health(&self) -> Result<bool, InferenceError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Request a prediction for a feature vector.
    ///
    /// One synchronous call across the network boundary, bounded by the
    /// configured deadline. Transport errors and 5xx responses are retried
    /// with doubling backoff up to `max_retries` times inside that deadline;
    /// 4xx responses fail immediately. The response payload is returned
    /// opaque.
    pub async fn predict(
        &self,
        features: &[f64],
        model_version: &str,
    ) -> Result<serde_json::Value, InferenceError> {
        let request = PredictRequest {
            features: features.to_vec(),
            model_version: model_version.to_string(),
        };

        match tokio::time::timeout(self.config.timeout, self.predict_with_retries(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(InferenceError::DeadlineExceeded(self.config.timeout)),
        }
    }

    async fn predict_with_retries(
        &self,
        request: &PredictRequest,
    ) -> Result<serde_json::Value, InferenceError> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.predict_once(request).await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    tracing::warn!(
                        "Inference attempt {attempt} failed, retrying in {backoff:?}: {e}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn predict_once(
        &self,
        request: &PredictRequest,
    ) -> Result<serde_json::Value, InferenceError> {
        let response = self
            .client
            .post(self.config.predict_url())
            .header(API_KEY_HEADER, &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(InferenceError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| InferenceError::Serialization(e.to_string()))
    }
}
