use thiserror::Error;

use crate::domain::{StrategyType, Target};

/// Errors raised by the forecasting engine
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Insufficient data for {target}: {available} hourly points (need {required})")]
    InsufficientData {
        target: Target,
        available: usize,
        required: usize,
    },

    #[error("Not enough records for a training run: {available} (need {required})")]
    NotEnoughRecords { available: usize, required: usize },

    #[error("Unknown strategy type: {0}")]
    UnknownStrategyType(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Persistence error on {path}: {message}")]
    Persistence { path: String, message: String },

    #[error("No trained {strategy} model for {target}")]
    PredictionUnavailable {
        strategy: StrategyType,
        target: Target,
    },

    #[error("Model error: {0}")]
    Model(String),

    #[error(transparent)]
    Metrics(#[from] crate::forecast::metrics::ForecastMetricsError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ForecastError {
    pub fn persistence(path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Recoverable errors are reported as failed results instead of aborting a run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. }
                | Self::NotEnoughRecords { .. }
                | Self::PredictionUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
