//! Trial scoring.
//!
//! Errors are `process_value - desired`. A trial with too few samples scores as
//! [`INSUFFICIENT_DATA_SCORE`] on every metric, and a safety abort adds
//! [`ABORT_PENALTY`] so the optimizer steers away from that region.

use serde::Serialize;

/// Fewest samples that produce meaningful metrics.
pub const MIN_SAMPLES: usize = 5;
/// Metric value reported for trials shorter than [`MIN_SAMPLES`].
pub const INSUFFICIENT_DATA_SCORE: f64 = 999.0;
/// Added to the score of an aborted trial.
pub const ABORT_PENALTY: f64 = 500.0;

/// Error statistics of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Population standard deviation of the error.
    pub error_std: f64,
}

impl TrialMetrics {
    fn insufficient() -> Self {
        Self {
            mae: INSUFFICIENT_DATA_SCORE,
            rmse: INSUFFICIENT_DATA_SCORE,
            error_std: INSUFFICIENT_DATA_SCORE,
        }
    }
}

pub fn compute_metrics(process_values: &[f64], desired: f64) -> TrialMetrics {
    if process_values.len() < MIN_SAMPLES {
        return TrialMetrics::insufficient();
    }

    let n = process_values.len() as f64;
    let errors: Vec<f64> = process_values.iter().map(|y| y - desired).collect();
    let mean = errors.iter().sum::<f64>() / n;

    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
    let variance = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;

    TrialMetrics {
        mae,
        rmse,
        error_std: variance.sqrt(),
    }
}

/// Lower is better.
pub fn score_controller(mae: f64, error_std: f64, aborted: bool) -> f64 {
    let penalty = if aborted { ABORT_PENALTY } else { 0.0 };
    mae + error_std + penalty
}
