//! Window selection over stored chunks.
//!
//! The selector decides which stored samples constitute the window handed to
//! feature computation. Current policy is single-chunk selection: the window
//! is exactly the most recent chunk's time span and samples. Assembling a
//! fixed-duration window from several contiguous chunks would live here.

use chrono::{DateTime, Utc};

use crate::store::{ChunkStore, StoreResult};

/// The time span and sample set over which features are computed.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl SignalWindow {
    /// Window duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Chooses the analysis window for a (patient, channel) pair.
#[derive(Clone)]
pub struct WindowSelector {
    chunks: ChunkStore,
}

impl WindowSelector {
    pub fn new(chunks: ChunkStore) -> Self {
        Self { chunks }
    }

    /// Select the window covering the most recent chunk.
    ///
    /// `None` means no chunk exists for the pair; absence is a value here,
    /// not an error.
    pub fn select_latest(
        &self,
        patient_id: &str,
        channel: &str,
    ) -> StoreResult<Option<SignalWindow>> {
        let chunk = match self.chunks.latest(patient_id, channel)? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };

        Ok(Some(SignalWindow {
            start: chunk.t_start,
            end: chunk.t_end,
            values: chunk.values,
        }))
    }
}
