//! BioTensor Signal Service - biosignal ingestion and feature extraction.
//!
//! This library ingests time-stamped waveform chunks (EEG/ECG/HRV-style),
//! stores them durably, computes statistical features over a selected window
//! on demand, persists the features, and forwards the feature vector to an
//! external inference service for a prediction.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   BioTensor Signal Service                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │ ChunkStore  │──▶│   Window    │──▶│  Features   │        │
//! │  │  (SQLite)   │   │  Selector   │   │ (mean/std/  │        │
//! │  └─────────────┘   └─────────────┘   │    rms)     │        │
//! │         ▲                            └──────┬──────┘        │
//! │         │                                   ▼               │
//! │  ┌─────────────┐                     ┌─────────────┐        │
//! │  │   Ingest    │                     │FeatureStore │        │
//! │  │  (HTTP/CLI) │                     │  (SQLite)   │        │
//! │  └─────────────┘                     └──────┬──────┘        │
//! │                                             ▼               │
//! │                                      ┌─────────────┐        │
//! │                                      │  Inference  │        │
//! │                                      │   client    │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Features are committed before the inference call is made: an outage at
//! the inference boundary never erases already-computed statistics, and the
//! caller observes "features computed, no prediction" as a first-class
//! result.
//!
//! # Example
//!
//! ```no_run
//! use biotensor_signal_service::{
//!     inference::InferenceConfig,
//!     pipeline::Pipeline,
//!     store::Database,
//! };
//!
//! let db = Database::open_in_memory().expect("open database");
//! let pipeline = Pipeline::new(db, InferenceConfig::default());
//! ```

pub mod config;
pub mod core;
pub mod inference;
pub mod pipeline;
pub mod server;
pub mod store;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, InferenceSettings};
pub use core::{compute, EmptyWindow, FeatureSet, SignalWindow, WindowSelector};
pub use inference::{InferenceClient, InferenceConfig, InferenceError};
pub use pipeline::{
    Extraction, IngestRequest, Pipeline, PipelineError, PredictionOutcome, StatsSnapshot,
};
pub use store::{ChunkStore, Database, Feature, FeatureStore, SignalChunk, StoreError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
