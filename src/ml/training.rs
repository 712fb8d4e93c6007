//! Training protocol
//!
//! Prepares each target's series, fits the requested strategy, evaluates it,
//! then persists and publishes the result through the [`ModelRegistry`].

use chrono::Utc;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Observation, StrategyType, Target, TargetOrigin};
use crate::error::{ForecastError, Result};
use crate::forecast::metrics::{overall_accuracy, ErrorMetrics};
use crate::forecast::{DataPreparer, EvaluationMode, PreparedSeries, TrainingMetrics};
use crate::ml::registry::{ModelRegistry, TrainingHistoryEntry};
use crate::ml::{ForecastModel, ForecastStrategy, ModelSettings, TrainedStrategy};

/// Training Configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSettings {
    /// Series longer than this are evaluated on a chronological hold-out
    pub hold_out_threshold: usize,
    pub train_ratio: f64,
    /// Evaluation used at or below the threshold
    pub small_data_policy: EvaluationMode,
    /// IQR fence multiplier, 1.5 to 2
    pub iqr_multiplier: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            hold_out_threshold: 500,
            train_ratio: 0.8,
            small_data_policy: EvaluationMode::InSample,
            iqr_multiplier: 1.5,
        }
    }
}

/// Outcome for one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetTrainingResult {
    pub target: Target,
    pub success: bool,
    pub metrics: Option<TrainingMetrics>,
    pub reason: Option<String>,
}

impl TargetTrainingResult {
    fn failed(target: Target, err: &ForecastError) -> Self {
        Self {
            target,
            success: false,
            metrics: None,
            reason: Some(err.to_string()),
        }
    }
}

/// Outcome of a multi-target run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub success: bool,
    pub strategy_type: StrategyType,
    pub message: String,
    pub results: Vec<TargetTrainingResult>,
    pub overall_accuracy: f64,
    pub duration_secs: f64,
    pub sensor_data_points: usize,
    pub weather_data_points: usize,
    pub history_id: Option<Uuid>,
}

impl TrainingReport {
    pub fn trained_targets(&self) -> Vec<Target> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.target)
            .collect()
    }
}

/// Inputs of [`Trainer::train_selected_targets`]
#[derive(Debug, Clone, Copy)]
pub struct TrainingRequest<'a> {
    pub strategy: StrategyType,
    pub sensor_records: &'a [Observation],
    pub targets: &'a [Target],
    pub weather_records: Option<&'a [Observation]>,
    pub weather_targets: &'a [Target],
}

/// Model Trainer
#[derive(Debug)]
pub struct Trainer {
    settings: TrainingSettings,
    models: ModelSettings,
    preparer: DataPreparer,
    registry: Arc<ModelRegistry>,
}

impl Trainer {
    pub fn new(settings: TrainingSettings, models: ModelSettings, registry: Arc<ModelRegistry>) -> Self {
        let preparer = DataPreparer::new(settings.iqr_multiplier);
        Self {
            settings,
            models,
            preparer,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn model_settings(&self) -> &ModelSettings {
        &self.models
    }

    fn evaluation_mode(&self, series: &PreparedSeries, min_points: usize) -> EvaluationMode {
        let mode = if series.len() > self.settings.hold_out_threshold {
            EvaluationMode::HoldOut
        } else {
            self.settings.small_data_policy
        };
        let split = self.split_index(series.len());
        if mode == EvaluationMode::HoldOut && split < min_points {
            EvaluationMode::InSample
        } else {
            mode
        }
    }

    fn split_index(&self, len: usize) -> usize {
        (len as f64 * self.settings.train_ratio.clamp(0.0, 1.0)).floor() as usize
    }

    /// Prepare, fit and evaluate without touching the registry
    pub fn build(
        &self,
        records: &[Observation],
        target: Target,
        strategy: StrategyType,
    ) -> Result<TrainedStrategy> {
        let min_points = self.models.min_points(strategy);
        let series = self.preparer.prepare(records, target, min_points)?;
        let mode = self.evaluation_mode(&series, min_points);

        let mut model = ForecastModel::untrained(strategy, &self.models);
        let backtest = match mode {
            EvaluationMode::HoldOut => {
                let split = self.split_index(series.len());
                model.fit(&series.slice(0..split))?;
                let backtest = model.backtest(&series, split)?;
                // the published model must see the whole series
                model = ForecastModel::untrained(strategy, &self.models);
                model.fit(&series)?;
                backtest
            }
            EvaluationMode::InSample => {
                model.fit(&series)?;
                model.backtest(&series, 0)?
            }
        };

        let predicted: Vec<f64> = backtest
            .predictions
            .iter()
            .map(|p| target.clip_to_range(series.scaler.inverse_transform(p.clamp(0.0, 1.0))))
            .collect();
        let actual = &series.values[backtest.first_index..];
        let errors = ErrorMetrics::calculate(actual, &predicted)?;

        let mut metrics = TrainingMetrics::from_errors(strategy, errors, series.len(), mode);
        if strategy.is_sequence_based() {
            metrics = metrics.with_lookback(model.lookback());
        }

        Ok(TrainedStrategy {
            target,
            model,
            scaler: series.scaler,
            metrics,
        })
    }

    /// Build and publish one target under its training lock, without a history entry
    fn train_and_publish(
        &self,
        records: &[Observation],
        target: Target,
        strategy: StrategyType,
    ) -> TargetTrainingResult {
        let lock = self.registry.training_lock(strategy, target);
        let _guard = lock.lock();

        let outcome = self
            .build(records, target, strategy)
            .and_then(|trained| self.registry.publish(trained));

        match outcome {
            Ok(trained) => {
                info!(
                    strategy = %strategy,
                    target = %target,
                    accuracy = trained.metrics.accuracy,
                    r2 = trained.metrics.r2,
                    points = trained.metrics.data_points,
                    "trained target"
                );
                TargetTrainingResult {
                    target,
                    success: true,
                    metrics: Some(trained.metrics.clone()),
                    reason: None,
                }
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!(strategy = %strategy, target = %target, error = %e, "target not trained");
                } else {
                    tracing::error!(strategy = %strategy, target = %target, error = %e, "training failed");
                }
                TargetTrainingResult::failed(target, &e)
            }
        }
    }

    /// Train a single target and record it in the history
    pub fn train_target(
        &self,
        records: &[Observation],
        target: Target,
        strategy: StrategyType,
    ) -> TargetTrainingResult {
        let started = Instant::now();
        let result = self.train_and_publish(records, target, strategy);

        if let Some(metrics) = &result.metrics {
            let (sensor, weather) = match target.origin() {
                TargetOrigin::Sensor => (records.len(), 0),
                TargetOrigin::WeatherApi => (0, records.len()),
            };
            let entry = TrainingHistoryEntry {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                strategy_type: strategy,
                targets_trained: vec![target],
                metrics: BTreeMap::from([(target, metrics.clone())]),
                overall_accuracy: metrics.accuracy,
                duration_secs: started.elapsed().as_secs_f64(),
                sensor_data_points: sensor,
                weather_data_points: weather,
            };
            if let Err(e) = self.registry.append_history(entry) {
                warn!(error = %e, "failed to record training history");
            }
        }
        result
    }

    /// Train every requested target independently and aggregate the results.
    ///
    /// Targets whose origin does not match their record source are ignored.
    /// On success the strategy type becomes current.
    pub fn train_selected_targets(&self, request: TrainingRequest<'_>) -> TrainingReport {
        let started = Instant::now();
        let strategy = request.strategy;

        let sensor_targets: Vec<Target> = request
            .targets
            .iter()
            .copied()
            .filter(|t| t.origin() == TargetOrigin::Sensor)
            .unique()
            .collect();
        let weather_records = request.weather_records.unwrap_or_default();
        let weather_targets: Vec<Target> = if request.weather_records.is_some() {
            request
                .weather_targets
                .iter()
                .copied()
                .filter(|t| t.origin() == TargetOrigin::WeatherApi)
                .unique()
                .collect()
        } else {
            Vec::new()
        };

        let mut results = Vec::with_capacity(sensor_targets.len() + weather_targets.len());
        for target in &sensor_targets {
            results.push(self.train_and_publish(request.sensor_records, *target, strategy));
        }
        for target in &weather_targets {
            results.push(self.train_and_publish(weather_records, *target, strategy));
        }

        let metrics: BTreeMap<Target, TrainingMetrics> = results
            .iter()
            .filter_map(|r| r.metrics.clone().map(|m| (r.target, m)))
            .collect();
        let overall = overall_accuracy(metrics.values().map(|m| m.accuracy));
        let duration_secs = started.elapsed().as_secs_f64();
        let sensor_data_points = request.sensor_records.len();
        let weather_data_points = if weather_targets.is_empty() {
            0
        } else {
            weather_records.len()
        };

        let mut report = TrainingReport {
            success: !metrics.is_empty(),
            strategy_type: strategy,
            message: String::new(),
            results,
            overall_accuracy: overall,
            duration_secs,
            sensor_data_points,
            weather_data_points,
            history_id: None,
        };

        if metrics.is_empty() {
            report.message = if sensor_targets.is_empty() && weather_targets.is_empty() {
                "no valid targets requested".to_string()
            } else {
                "no target could be trained".to_string()
            };
            warn!(strategy = %strategy, message = %report.message, "training run failed");
            return report;
        }

        let entry = TrainingHistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            strategy_type: strategy,
            targets_trained: metrics.keys().copied().collect(),
            metrics,
            overall_accuracy: overall,
            duration_secs,
            sensor_data_points,
            weather_data_points,
        };
        let id = entry.id;
        match self.registry.append_history(entry) {
            Ok(()) => report.history_id = Some(id),
            Err(e) => warn!(error = %e, "failed to record training history"),
        }

        if let Err(e) = self.registry.set_current(strategy) {
            warn!(strategy = %strategy, error = %e, "failed to persist current strategy");
        }

        report.message = format!(
            "trained {}/{} targets with {}",
            report.trained_targets().len(),
            report.results.len(),
            strategy.display_name()
        );
        info!(
            strategy = %strategy,
            trained = report.trained_targets().len(),
            requested = report.results.len(),
            overall_accuracy = overall,
            duration_secs,
            "training run finished"
        );
        report
    }
}
