//! Feature computation over a sample window.
//!
//! This module extracts the window statistics forwarded to the inference
//! boundary. The statistic set is deliberately minimal: no smoothing,
//! filtering, or outlier rejection is applied.

use serde::{Deserialize, Serialize};

/// Statistics computed over one window of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Arithmetic mean of the samples
    pub mean: f64,
    /// Sample standard deviation (Bessel's correction)
    pub std: f64,
    /// Root-mean-square magnitude
    pub rms: f64,
}

impl FeatureSet {
    /// The feature vector in wire order: `[mean, std, rms]`.
    pub fn vector(&self) -> [f64; 3] {
        [self.mean, self.std, self.rms]
    }

    /// The features as (name, value) pairs, in wire order.
    pub fn named(&self) -> [(&'static str, f64); 3] {
        [("mean", self.mean), ("std", self.std), ("rms", self.rms)]
    }
}

/// Error returned when a window contains no samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyWindow;

impl std::fmt::Display for EmptyWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot compute features over an empty window")
    }
}

impl std::error::Error for EmptyWindow {}

/// Compute mean, sample standard deviation, and RMS over a window.
///
/// Variance uses Bessel's correction with the denominator clamped to 1, so a
/// single-sample window yields a standard deviation of exactly 0.
pub fn compute(values: &[f64]) -> Result<FeatureSet, EmptyWindow> {
    if values.is_empty() {
        return Err(EmptyWindow);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    let denom = if values.len() > 1 { n - 1.0 } else { 1.0 };
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / denom;
    let std = variance.sqrt();

    let rms = (values.iter().map(|&x| x * x).sum::<f64>() / n).sqrt();

    Ok(FeatureSet { mean, std, rms })
}
