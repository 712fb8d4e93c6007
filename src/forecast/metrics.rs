//! Training metrics and accuracy transforms
//!
//! Error metrics are computed in physical units. `accuracy` is a bounded,
//! monotonic transform of R² that depends on the strategy family.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::StrategyType;

/// How evaluation predictions were produced
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Fit and evaluate on the same series; inflates accuracy on small data
    #[default]
    InSample,
    /// Evaluate on the chronologically last 20 %
    HoldOut,
}

/// Raw error metrics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ErrorMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Clamped to [-1, 1]
    pub r2: f64,
    pub sample_count: usize,
}

impl ErrorMetrics {
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self, ForecastMetricsError> {
        if actual.len() != predicted.len() {
            return Err(ForecastMetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        if actual.is_empty() {
            return Err(ForecastMetricsError::EmptyData);
        }

        let n = actual.len() as f64;
        let mae = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).abs())
            .sum::<f64>()
            / n;

        let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
        let rmse = (ss_res / n).sqrt();

        let mean_actual = actual.iter().sum::<f64>() / n;
        let ss_tot: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();

        let r2 = if ss_tot.abs() < 1e-10 {
            if ss_res.abs() < 1e-10 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - ss_res / ss_tot
        };

        Ok(Self {
            mae,
            rmse,
            r2: r2.clamp(-1.0, 1.0),
            sample_count: actual.len(),
        })
    }
}

/// Map R² onto [0, 100] for the given strategy family
pub fn accuracy_from_r2(strategy: StrategyType, r2: f64) -> f64 {
    if strategy.is_sequence_based() {
        (r2 * 100.0).clamp(0.0, 100.0)
    } else {
        (75.0 + r2.max(0.0) * 25.0).clamp(75.0, 100.0)
    }
}

/// Mean of the non-zero accuracies, 0 when none
pub fn overall_accuracy<I: IntoIterator<Item = f64>>(accuracies: I) -> f64 {
    let non_zero: Vec<f64> = accuracies.into_iter().filter(|a| *a > 0.0).collect();
    if non_zero.is_empty() {
        0.0
    } else {
        non_zero.iter().sum::<f64>() / non_zero.len() as f64
    }
}

/// Metrics attached to a trained strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    /// Percent in [0, 100]
    pub accuracy: f64,
    pub data_points: usize,
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub lookback: Option<usize>,
    #[serde(default)]
    pub evaluation: EvaluationMode,
}

impl TrainingMetrics {
    pub fn from_errors(
        strategy: StrategyType,
        errors: ErrorMetrics,
        data_points: usize,
        evaluation: EvaluationMode,
    ) -> Self {
        Self {
            mae: errors.mae,
            rmse: errors.rmse,
            r2: errors.r2,
            accuracy: accuracy_from_r2(strategy, errors.r2),
            data_points,
            trained_at: Utc::now(),
            lookback: None,
            evaluation,
        }
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = Some(lookback);
        self
    }
}

impl fmt::Display for TrainingMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE={:.3}, RMSE={:.3}, R²={:.3}, accuracy={:.1}% ({} points)",
            self.mae, self.rmse, self.r2, self.accuracy, self.data_points
        )
    }
}

/// Metric calculation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ForecastMetricsError {
    #[error("Dimension mismatch: actual={actual}, predicted={predicted}")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("Empty data provided")]
    EmptyData,
}
