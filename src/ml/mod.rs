//! Machine Learning Module
//!
//! Interchangeable forecasting strategies behind one interface:
//! - Seasonal decomposition (hour-of-day / day-of-week + ridge trend)
//! - Direct multi-step gradient-boosted trees
//! - Recurrent (LSTM-cell) approximator
//!
//! # Architecture
//! - [`ForecastStrategy`] is the common interface over scaled series
//! - [`ForecastModel`] is the serialisable tagged variant selected by [`StrategyType`]
//! - [`TrainedStrategy`] owns a fitted model with its scaler and metrics
//! - [`training`] runs the training protocol, [`registry`] serves trained models

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::domain::{StrategyType, Target};
use crate::error::Result;
use crate::forecast::features::pad_window;
use crate::forecast::{MinMaxScaler, PreparedSeries, TrainingMetrics};

pub mod models;
pub mod registry;
pub mod training;

pub use models::{
    GradientBoostingModel, GradientBoostingParams, RecurrentModel, RecurrentParams,
    SeasonalModel, SeasonalParams, TrendExtrapolator,
};
pub use registry::{ModelRegistry, TrainingHistoryEntry};
pub use training::{TargetTrainingResult, Trainer, TrainingReport, TrainingSettings};

/// Summary returned by [`ForecastStrategy::fit`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FitReport {
    /// Training samples seen by the model
    pub samples: usize,
    pub lookback: Option<usize>,
    /// Horizon steps with a trained model (direct multi-step only)
    pub horizons: Vec<usize>,
    /// Final training loss on the scaled series, when tracked
    pub final_loss: Option<f64>,
}

/// One-step predictions over a series, aligned to `first_index`
#[derive(Debug, Clone, PartialEq)]
pub struct Backtest {
    pub first_index: usize,
    /// Scaled predictions for `first_index..series.len()`
    pub predictions: Vec<f64>,
}

/// Static description of a strategy instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyInfo {
    pub strategy_type: StrategyType,
    pub name: String,
    pub description: String,
    pub lookback: Option<usize>,
    pub horizons: Vec<usize>,
    pub parameters: serde_json::Value,
}

/// Common interface of the forecasting strategies.
///
/// Strategies work on scaled values; [`TrainedStrategy`] maps them back to
/// physical units.
pub trait ForecastStrategy {
    fn strategy_type(&self) -> StrategyType;

    fn fit(&mut self, series: &PreparedSeries) -> Result<FitReport>;

    /// One-step-ahead predictions for positions `start..series.len()` using the
    /// true history before each position.
    fn backtest(&self, series: &PreparedSeries, start: usize) -> Result<Backtest>;

    /// Scaled predictions for `origin + 1h ..= origin + hours_ahead h`.
    ///
    /// `window` replaces the remembered rollout window when given.
    fn predict_multi_step(
        &self,
        origin: DateTime<FixedOffset>,
        hours_ahead: usize,
        window: Option<&[f64]>,
    ) -> Result<Vec<f64>>;

    fn info(&self) -> StrategyInfo;
}

/// Per-strategy hyper-parameters used to build fresh models
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    #[serde(default)]
    pub seasonal: SeasonalParams,
    #[serde(default)]
    pub gradient_boosting: GradientBoostingParams,
    #[serde(default)]
    pub recurrent: RecurrentParams,
}

impl ModelSettings {
    pub fn lookback(&self, strategy: StrategyType) -> usize {
        match strategy {
            StrategyType::Seasonal => 0,
            StrategyType::GradientBoosting => self.gradient_boosting.lookback,
            StrategyType::Recurrent => self.recurrent.lookback,
        }
    }

    /// Hourly points `prepare` must produce before this strategy can train
    pub fn min_points(&self, strategy: StrategyType) -> usize {
        strategy.min_points(self.lookback(strategy))
    }
}

/// Tagged strategy variant, persisted as-is
#[derive(Debug, Serialize, Deserialize)]
pub enum ForecastModel {
    Seasonal(SeasonalModel),
    GradientBoosting(GradientBoostingModel),
    Recurrent(RecurrentModel),
}

impl ForecastModel {
    /// Fresh, unfitted model of the requested family
    pub fn untrained(strategy: StrategyType, settings: &ModelSettings) -> Self {
        match strategy {
            StrategyType::Seasonal => Self::Seasonal(SeasonalModel::new(settings.seasonal.clone())),
            StrategyType::GradientBoosting => Self::GradientBoosting(GradientBoostingModel::new(
                settings.gradient_boosting.clone(),
            )),
            StrategyType::Recurrent => {
                Self::Recurrent(RecurrentModel::new(settings.recurrent.clone()))
            }
        }
    }

    fn inner(&self) -> &dyn ForecastStrategy {
        match self {
            Self::Seasonal(m) => m,
            Self::GradientBoosting(m) => m,
            Self::Recurrent(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ForecastStrategy {
        match self {
            Self::Seasonal(m) => m,
            Self::GradientBoosting(m) => m,
            Self::Recurrent(m) => m,
        }
    }

    /// Rollout window length; 0 for strategies that only need the time axis
    pub fn lookback(&self) -> usize {
        match self {
            Self::Seasonal(_) => 0,
            Self::GradientBoosting(m) => m.params().lookback,
            Self::Recurrent(m) => m.params().lookback,
        }
    }
}

impl ForecastStrategy for ForecastModel {
    fn strategy_type(&self) -> StrategyType {
        self.inner().strategy_type()
    }

    fn fit(&mut self, series: &PreparedSeries) -> Result<FitReport> {
        self.inner_mut().fit(series)
    }

    fn backtest(&self, series: &PreparedSeries, start: usize) -> Result<Backtest> {
        self.inner().backtest(series, start)
    }

    fn predict_multi_step(
        &self,
        origin: DateTime<FixedOffset>,
        hours_ahead: usize,
        window: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        self.inner().predict_multi_step(origin, hours_ahead, window)
    }

    fn info(&self) -> StrategyInfo {
        self.inner().info()
    }
}

/// A fitted model with everything needed to serve physical-unit forecasts
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedStrategy {
    pub target: Target,
    pub model: ForecastModel,
    pub scaler: MinMaxScaler,
    pub metrics: TrainingMetrics,
}

impl TrainedStrategy {
    pub fn strategy_type(&self) -> StrategyType {
        self.model.strategy_type()
    }

    /// Map a scaled prediction to the target's unit and physical range
    pub fn to_physical(&self, scaled: f64) -> f64 {
        self.target.clip_to_range(self.scaler.inverse_transform(scaled))
    }

    /// Physical-unit forecast for the next `hours_ahead` hours.
    ///
    /// `recent` holds raw observations (oldest first) that replace the
    /// remembered rollout window.
    pub fn predict(
        &self,
        origin: DateTime<FixedOffset>,
        hours_ahead: usize,
        recent: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        let lookback = self.model.lookback();
        let window = match recent {
            Some(values) if lookback > 0 && !values.is_empty() => {
                let scaled: Vec<f64> = values
                    .iter()
                    .map(|v| self.scaler.transform(self.target.clip_to_range(*v)))
                    .collect();
                Some(pad_window(&scaled, lookback))
            }
            _ => None,
        };

        let scaled = self
            .model
            .predict_multi_step(origin, hours_ahead, window.as_deref())?;
        Ok(scaled.into_iter().map(|v| self.to_physical(v)).collect())
    }

    pub fn info(&self) -> StrategyInfo {
        self.model.info()
    }
}
