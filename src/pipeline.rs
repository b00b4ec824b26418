//! Request-scoped orchestration of the signal pipeline.
//!
//! Three operations are exposed: `ingest` (store one chunk), `recent` (read
//! back recent chunks), and `extract_and_predict` (select a window, compute
//! features, persist them, call the inference boundary). Each call is
//! independent and synchronous end to end; the only await point is the
//! inference round trip.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::{compute, FeatureSet, WindowSelector};
use crate::inference::{InferenceClient, InferenceConfig, InferenceError};
use crate::store::{ChunkStore, Database, Feature, FeatureStore, SignalChunk, StoreError, MAX_QUERY_ROWS};

/// Method tag recorded on every feature row written by this pipeline.
pub const FEATURE_METHOD: &str = "demo";

/// Model version sent to the inference boundary when the caller supplies none.
pub const DEFAULT_MODEL_VERSION: &str = "demo-1";

/// Default lookback for `recent` when the caller supplies no `sinceMs`.
pub const DEFAULT_RECENT_WINDOW_MS: i64 = 60_000;

/// Pipeline error taxonomy. Every variant surfaces to the caller as a typed
/// result; nothing is silently recovered or retried here.
#[derive(Debug)]
pub enum PipelineError {
    /// Malformed ingest parameters, rejected at the boundary
    InvalidInput(String),
    /// No chunk exists for the requested patient/channel
    NoData,
    /// The selected window has zero samples
    EmptyWindow,
    /// Durable-store failure, from either the chunk or the feature store
    Persistence(StoreError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            PipelineError::NoData => {
                write!(f, "No signal data for the requested patient/channel")
            }
            PipelineError::EmptyWindow => write!(f, "Selected window contains no samples"),
            PipelineError::Persistence(e) => write!(f, "Storage error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Persistence(e)
    }
}

/// An ingest submission, validated once at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub patient_id: String,
    pub channel: String,
    pub sampling_rate_hz: f64,
    pub t_start: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl IngestRequest {
    /// Check field-level constraints. Violations name the offending field so
    /// callers do not have to guess.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.patient_id.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "patientId must not be empty".to_string(),
            ));
        }
        if self.channel.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "channel must not be empty".to_string(),
            ));
        }
        if !self.sampling_rate_hz.is_finite() || self.sampling_rate_hz <= 0.0 {
            return Err(PipelineError::InvalidInput(format!(
                "samplingRateHz must be a positive number, got {}",
                self.sampling_rate_hz
            )));
        }
        if self.values.is_empty() {
            return Err(PipelineError::InvalidInput(
                "values must contain at least one sample".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of the inference stage.
///
/// Features commit before the inference call, so "features computed, no
/// prediction" is a first-class state the caller can observe. It is never
/// collapsed into a generic error.
#[derive(Debug)]
pub enum PredictionOutcome {
    /// Opaque payload from the inference service
    Predicted(serde_json::Value),
    /// The inference boundary was unreachable or returned non-success;
    /// the features were persisted regardless
    Unavailable(InferenceError),
}

/// Result of one extract-and-predict pass.
#[derive(Debug)]
pub struct Extraction {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub features: FeatureSet,
    pub prediction: PredictionOutcome,
}

/// Counters for the pipeline's activity in this process.
#[derive(Debug, Default)]
pub struct PipelineStats {
    chunks_ingested: AtomicU64,
    windows_extracted: AtomicU64,
    features_persisted: AtomicU64,
    predictions_succeeded: AtomicU64,
    predictions_failed: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            windows_extracted: self.windows_extracted.load(Ordering::Relaxed),
            features_persisted: self.features_persisted.load(Ordering::Relaxed),
            predictions_succeeded: self.predictions_succeeded.load(Ordering::Relaxed),
            predictions_failed: self.predictions_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`PipelineStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub chunks_ingested: u64,
    pub windows_extracted: u64,
    pub features_persisted: u64,
    pub predictions_succeeded: u64,
    pub predictions_failed: u64,
}

/// The assembled pipeline. Stores and the inference client are injected at
/// construction; there is no ambient/global state.
pub struct Pipeline {
    chunks: ChunkStore,
    selector: WindowSelector,
    features: FeatureStore,
    inference: InferenceClient,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// Assemble the pipeline over one database handle and one inference
    /// configuration.
    pub fn new(db: Database, inference: InferenceConfig) -> Self {
        let chunks = ChunkStore::new(db.clone());
        Self {
            selector: WindowSelector::new(chunks.clone()),
            features: FeatureStore::new(db),
            inference: InferenceClient::new(inference),
            chunks,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Validate and durably store one signal chunk.
    pub fn ingest(&self, request: IngestRequest) -> Result<SignalChunk, PipelineError> {
        request.validate()?;

        let chunk = self.chunks.ingest(crate::store::NewChunk {
            patient_id: request.patient_id,
            channel: request.channel,
            sampling_rate_hz: request.sampling_rate_hz,
            t_start: request.t_start,
            values: request.values,
        })?;

        self.stats.chunks_ingested.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            chunk_id = %chunk.id,
            patient_id = %chunk.patient_id,
            channel = %chunk.channel,
            samples = chunk.values.len(),
            "chunk ingested"
        );

        Ok(chunk)
    }

    /// Chunks from the last `since_ms` milliseconds (default 60 000),
    /// ascending by start time, capped at 200 entries.
    pub fn recent(
        &self,
        patient_id: &str,
        channel: &str,
        since_ms: Option<i64>,
    ) -> Result<Vec<SignalChunk>, PipelineError> {
        let lookback = since_ms.unwrap_or(DEFAULT_RECENT_WINDOW_MS);
        if lookback < 0 {
            return Err(PipelineError::InvalidInput(format!(
                "sinceMs must not be negative, got {lookback}"
            )));
        }

        let since = Utc::now() - Duration::milliseconds(lookback);
        Ok(self.chunks.query(patient_id, channel, since, MAX_QUERY_ROWS)?)
    }

    /// Select the latest window, compute its features, persist them, then
    /// ask the inference boundary for a prediction.
    ///
    /// The feature write commits unconditionally once reached; an inference
    /// failure after it yields [`PredictionOutcome::Unavailable`] rather than
    /// rolling anything back — features are independently valuable artifacts.
    pub async fn extract_and_predict(
        &self,
        patient_id: &str,
        channel: &str,
        model_version: Option<&str>,
    ) -> Result<Extraction, PipelineError> {
        let window = self
            .selector
            .select_latest(patient_id, channel)?
            .ok_or(PipelineError::NoData)?;

        // Only reachable if the chunk invariant was violated upstream;
        // ingest itself rejects empty sample arrays.
        let features = compute(&window.values).map_err(|_| PipelineError::EmptyWindow)?;
        self.stats.windows_extracted.fetch_add(1, Ordering::Relaxed);

        let rows: Vec<Feature> = features
            .named()
            .iter()
            .map(|(name, value)| {
                Feature::new(
                    patient_id,
                    window.start,
                    window.end,
                    *name,
                    *value,
                    FEATURE_METHOD,
                )
            })
            .collect();

        // Aborts before the inference call on failure; never rolled back
        // after commit.
        self.features.persist(&rows)?;
        self.stats
            .features_persisted
            .fetch_add(rows.len() as u64, Ordering::Relaxed);

        let model_version = model_version.unwrap_or(DEFAULT_MODEL_VERSION);
        let prediction = match self.inference.predict(&features.vector(), model_version).await {
            Ok(payload) => {
                self.stats
                    .predictions_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                PredictionOutcome::Predicted(payload)
            }
            Err(e) => {
                tracing::warn!(
                    patient_id,
                    channel,
                    model_version,
                    "inference unavailable, returning features without prediction: {e}"
                );
                self.stats.predictions_failed.fetch_add(1, Ordering::Relaxed);
                PredictionOutcome::Unavailable(e)
            }
        };

        Ok(Extraction {
            window_start: window.start,
            window_end: window.end,
            features,
            prediction,
        })
    }

    /// Current activity counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
