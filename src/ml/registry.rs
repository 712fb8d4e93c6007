//! Model registry
//!
//! Owns the trained strategies per `(strategy type, target)`, the current
//! strategy selection and the bounded training history. Models are published
//! as whole `Arc`s after they are persisted, so readers either see the old
//! model or the new one.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    Forecast, ForecastPoint, PredictionContext, StrategyType, Target,
};
use crate::error::{ForecastError, Result};
use crate::forecast::metrics::overall_accuracy;
use crate::forecast::weather::classify;
use crate::forecast::TrainingMetrics;
use crate::ml::models::TrendExtrapolator;
use crate::ml::{StrategyInfo, TrainedStrategy};
use crate::repo::store::HISTORY_FILE;
use crate::repo::ModelStore;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Immutable record of one training run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingHistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub strategy_type: StrategyType,
    pub targets_trained: Vec<Target>,
    pub metrics: BTreeMap<Target, TrainingMetrics>,
    pub overall_accuracy: f64,
    pub duration_secs: f64,
    pub sensor_data_points: usize,
    pub weather_data_points: usize,
}

/// Trained model summary for one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetModelInfo {
    pub metrics: TrainingMetrics,
    pub strategy: StrategyInfo,
}

/// What is known about one strategy type
#[derive(Debug, Clone, Serialize)]
pub struct StrategyTypeInfo {
    pub strategy_type: StrategyType,
    pub display_name: &'static str,
    pub is_current: bool,
    pub targets: BTreeMap<Target, TargetModelInfo>,
    pub average_accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategySummary {
    pub strategy_type: StrategyType,
    pub trained_targets: usize,
    pub average_accuracy: f64,
}

/// Side-by-side view of all strategy types
#[derive(Debug, Clone, Serialize)]
pub struct ModelComparison {
    pub current: StrategyType,
    pub best: Option<StrategyType>,
    pub strategies: Vec<StrategySummary>,
}

/// Counts restored by [`ModelRegistry::load_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub models: usize,
    pub failed: usize,
    pub history_entries: usize,
}

type ModelKey = (StrategyType, Target);

pub struct ModelRegistry {
    store: Arc<ModelStore>,
    models: RwLock<HashMap<ModelKey, Arc<TrainedStrategy>>>,
    current: RwLock<StrategyType>,
    history: RwLock<VecDeque<TrainingHistoryEntry>>,
    history_limit: usize,
    training_locks: Mutex<HashMap<ModelKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("root", &self.store.root())
            .field("models", &self.models.read().len())
            .field("current", &*self.current.read())
            .finish()
    }
}

/// Confidence for model forecasts at 0-based step `i`
pub fn model_confidence(i: usize) -> f64 {
    (95.0 - 0.8 * i as f64).max(50.0)
}

/// Confidence for trend-fallback forecasts at 0-based step `i`
pub fn fallback_confidence(i: usize) -> f64 {
    (90.0 - i as f64).max(50.0)
}

impl ModelRegistry {
    pub fn new(store: Arc<ModelStore>, history_limit: usize) -> Self {
        Self {
            store,
            models: RwLock::new(HashMap::new()),
            current: RwLock::new(StrategyType::default()),
            history: RwLock::new(VecDeque::new()),
            history_limit: history_limit.max(1),
            training_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    /// Restore artifacts, the current selection and history from the store.
    ///
    /// Unreadable artifacts are logged and skipped.
    pub fn load_all(&self) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        let mut loaded = HashMap::new();

        for strategy in StrategyType::iter() {
            for target in Target::iter() {
                match self.store.load_model::<TrainedStrategy>(strategy, target) {
                    Ok(Some(trained)) => {
                        loaded.insert((strategy, target), Arc::new(trained));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(strategy = %strategy, target = %target, error = %e, "skipping unreadable model");
                        summary.failed += 1;
                    }
                }
            }
        }
        summary.models = loaded.len();
        *self.models.write() = loaded;

        if let Some(doc) = self.store.load_current()? {
            *self.current.write() = doc.strategy_type;
        }

        let entries: Vec<TrainingHistoryEntry> =
            self.store.load_json(HISTORY_FILE)?.unwrap_or_default();
        let skip = entries.len().saturating_sub(self.history_limit);
        summary.history_entries = entries.len() - skip;
        *self.history.write() = entries.into_iter().skip(skip).collect();

        info!(
            models = summary.models,
            failed = summary.failed,
            history = summary.history_entries,
            current = %self.current(),
            "model registry loaded"
        );
        Ok(summary)
    }

    /// Mutex serialising training of one `(strategy, target)` pair
    pub fn training_lock(&self, strategy: StrategyType, target: Target) -> Arc<Mutex<()>> {
        self.training_locks
            .lock()
            .entry((strategy, target))
            .or_default()
            .clone()
    }

    /// Persist then publish a trained strategy, replacing any previous one
    pub fn publish(&self, trained: TrainedStrategy) -> Result<Arc<TrainedStrategy>> {
        let strategy = trained.strategy_type();
        let target = trained.target;
        self.store.save_model(strategy, target, &trained)?;

        let trained = Arc::new(trained);
        self.models
            .write()
            .insert((strategy, target), Arc::clone(&trained));
        debug!(strategy = %strategy, target = %target, "published model");
        Ok(trained)
    }

    pub fn get(&self, strategy: StrategyType, target: Target) -> Option<Arc<TrainedStrategy>> {
        self.models.read().get(&(strategy, target)).cloned()
    }

    fn trained_for(&self, strategy: StrategyType) -> BTreeMap<Target, Arc<TrainedStrategy>> {
        self.models
            .read()
            .iter()
            .filter(|((s, _), _)| *s == strategy)
            .map(|((_, t), m)| (*t, Arc::clone(m)))
            .collect()
    }

    pub fn current(&self) -> StrategyType {
        *self.current.read()
    }

    pub fn set_current(&self, strategy: StrategyType) -> Result<()> {
        self.store.save_current(strategy)?;
        *self.current.write() = strategy;
        info!(strategy = %strategy, "current strategy changed");
        Ok(())
    }

    /// Merged forecast for `hours_ahead` hours from the context origin.
    ///
    /// Falls back to trend extrapolation when nothing of the requested type
    /// is trained.
    pub fn predict(
        &self,
        hours_ahead: usize,
        context: &PredictionContext,
        strategy: Option<StrategyType>,
    ) -> Result<Forecast> {
        if hours_ahead == 0 {
            return Err(ForecastError::InvalidConfig(
                "hours_ahead must be at least 1".into(),
            ));
        }
        let strategy = strategy.unwrap_or_else(|| self.current());
        let trained = self.trained_for(strategy);

        if trained.is_empty() {
            debug!(strategy = %strategy, "no trained models, using trend fallback");
            return Ok(self.fallback_forecast(strategy, hours_ahead, context));
        }

        let mut series: BTreeMap<Target, Vec<f64>> = BTreeMap::new();
        for (target, model) in &trained {
            let recent = context.recent.get(target).map(Vec::as_slice);
            match model.predict(context.origin, hours_ahead, recent) {
                Ok(values) => {
                    series.insert(*target, values);
                }
                Err(e) => {
                    warn!(strategy = %strategy, target = %target, error = %e, "prediction failed");
                }
            }
        }

        if series.is_empty() {
            warn!(strategy = %strategy, "every trained model failed, using trend fallback");
            return Ok(self.fallback_forecast(strategy, hours_ahead, context));
        }

        let models_used: Vec<Target> = series.keys().copied().collect();
        for (target, value) in &context.latest {
            series
                .entry(*target)
                .or_insert_with(|| vec![target.clip_to_range(*value); hours_ahead]);
        }

        Ok(Forecast {
            strategy_type: strategy,
            generated_at: Utc::now().fixed_offset(),
            points: merge_timeline(context, &series, hours_ahead, model_confidence),
            models_used,
            fallback: false,
        })
    }

    fn fallback_forecast(
        &self,
        strategy: StrategyType,
        hours_ahead: usize,
        context: &PredictionContext,
    ) -> Forecast {
        let mut series = BTreeMap::new();
        for target in Target::iter() {
            let trend = match context.recent.get(&target) {
                Some(recent) if !recent.is_empty() => TrendExtrapolator::fit(target, recent),
                _ => context
                    .latest
                    .get(&target)
                    .map(|v| TrendExtrapolator::flat(target, *v)),
            };
            if let Some(trend) = trend {
                series.insert(target, trend.predict(hours_ahead));
            }
        }

        Forecast {
            strategy_type: strategy,
            generated_at: Utc::now().fixed_offset(),
            points: merge_timeline(context, &series, hours_ahead, fallback_confidence),
            models_used: Vec::new(),
            fallback: true,
        }
    }

    /// Descriptor of one strategy type (the current one by default)
    pub fn info(&self, strategy: Option<StrategyType>) -> StrategyTypeInfo {
        let strategy = strategy.unwrap_or_else(|| self.current());
        let targets: BTreeMap<Target, TargetModelInfo> = self
            .trained_for(strategy)
            .into_iter()
            .map(|(target, model)| {
                (
                    target,
                    TargetModelInfo {
                        metrics: model.metrics.clone(),
                        strategy: model.info(),
                    },
                )
            })
            .collect();
        let average_accuracy = overall_accuracy(targets.values().map(|t| t.metrics.accuracy));

        StrategyTypeInfo {
            strategy_type: strategy,
            display_name: strategy.display_name(),
            is_current: strategy == self.current(),
            targets,
            average_accuracy,
        }
    }

    /// Compare strategy types by average non-zero accuracy
    pub fn compare(&self) -> ModelComparison {
        let strategies: Vec<StrategySummary> = StrategyType::iter()
            .map(|strategy| {
                let trained = self.trained_for(strategy);
                StrategySummary {
                    strategy_type: strategy,
                    trained_targets: trained.len(),
                    average_accuracy: overall_accuracy(
                        trained.values().map(|m| m.metrics.accuracy),
                    ),
                }
            })
            .collect();

        let best = strategies
            .iter()
            .filter(|s| s.trained_targets > 0 && s.average_accuracy > 0.0)
            .max_by(|a, b| a.average_accuracy.total_cmp(&b.average_accuracy))
            .map(|s| s.strategy_type);

        ModelComparison {
            current: self.current(),
            best,
            strategies,
        }
    }

    /// Up to `limit` most recent entries, most recent last
    pub fn history(&self, limit: usize) -> Vec<TrainingHistoryEntry> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Append an entry, evicting the oldest beyond the limit, then persist
    pub fn append_history(&self, entry: TrainingHistoryEntry) -> Result<()> {
        let mut history = self.history.write();
        let mut next: VecDeque<TrainingHistoryEntry> = history.clone();
        next.push_back(entry);
        while next.len() > self.history_limit {
            next.pop_front();
        }
        self.store.save_json(HISTORY_FILE, &next)?;
        *history = next;
        Ok(())
    }
}

/// One timeline `origin + 1h ..= origin + Nh` with classification per step
fn merge_timeline(
    context: &PredictionContext,
    series: &BTreeMap<Target, Vec<f64>>,
    hours_ahead: usize,
    confidence: fn(usize) -> f64,
) -> Vec<ForecastPoint> {
    (0..hours_ahead)
        .map(|i| {
            let timestamp = context.origin + Duration::hours(i as i64 + 1);
            let values: BTreeMap<Target, f64> = series
                .iter()
                .filter_map(|(t, v)| v.get(i).map(|x| (*t, *x)))
                .collect();

            let humidity = values.get(&Target::Humidity).copied().unwrap_or(50.0);
            let rainfall = values.get(&Target::Rainfall).copied().unwrap_or(0.0);
            let uv_index = values.get(&Target::UvIndex).copied().unwrap_or(0.0);
            let assessment = classify(humidity, rainfall, uv_index, &timestamp);

            ForecastPoint {
                timestamp,
                values,
                will_rain: assessment.will_rain,
                condition: assessment.condition,
                condition_label: assessment.condition.label(),
                condition_icon: assessment.icon,
                confidence: confidence(i),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;
    use crate::forecast::preparation::SIMPLE_MIN_POINTS;
    use crate::forecast::{DataPreparer, EvaluationMode, MinMaxScaler};
    use crate::ml::{ForecastModel, ForecastStrategy, ModelSettings};
    use chrono::{FixedOffset, TimeZone};
    use tempfile::TempDir;

    fn origin() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 10, 8, 0, 0)
            .unwrap()
    }

    fn trained_seasonal(target: Target, accuracy: f64) -> TrainedStrategy {
        let t0 = origin() - Duration::hours(96);
        let records: Vec<Observation> = (0..96)
            .map(|i| Observation::at(t0 + Duration::hours(i)).with(target, 40.0 + (i % 24) as f64))
            .collect();
        let series = DataPreparer::default().prepare(&records, target, 50).unwrap();
        let mut model = ForecastModel::untrained(StrategyType::Seasonal, &ModelSettings::default());
        model.fit(&series).unwrap();
        TrainedStrategy {
            target,
            model,
            scaler: series.scaler,
            metrics: TrainingMetrics {
                mae: 1.0,
                rmse: 1.2,
                r2: 0.5,
                accuracy,
                data_points: 96,
                trained_at: Utc::now(),
                lookback: None,
                evaluation: EvaluationMode::InSample,
            },
        }
    }

    fn registry(dir: &TempDir) -> ModelRegistry {
        ModelRegistry::new(Arc::new(ModelStore::new(dir.path())), 3)
    }

    #[test]
    fn test_confidence_decay() {
        assert_eq!(model_confidence(0), 95.0);
        assert_eq!(model_confidence(10), 87.0);
        assert_eq!(model_confidence(200), 50.0);
        assert_eq!(fallback_confidence(0), 90.0);
        assert_eq!(fallback_confidence(45), 50.0);
    }

    #[test]
    fn test_fallback_when_nothing_trained() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let ctx = PredictionContext::new(origin())
            .with_recent(Target::Temperature, vec![27.0, 27.5, 28.0])
            .with_latest(Target::Humidity, 80.0);

        let forecast = registry.predict(6, &ctx, None).unwrap();
        assert!(forecast.fallback);
        assert_eq!(forecast.points.len(), 6);
        assert_eq!(forecast.points[0].timestamp, origin() + Duration::hours(1));
        assert_eq!(forecast.points[5].timestamp, origin() + Duration::hours(6));
        assert_eq!(forecast.points[0].confidence, 90.0);
        assert_eq!(forecast.points[0].value(Target::Humidity), Some(80.0));
        // three points are too few for a slope
        assert_eq!(forecast.points[5].value(Target::Temperature), Some(28.0));
    }

    #[test]
    fn test_fallback_slope_needs_a_full_day() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let rising: Vec<f64> = (0..SIMPLE_MIN_POINTS).map(|i| 10.0 + i as f64 * 0.5).collect();
        let ctx = PredictionContext::new(origin())
            .with_recent(Target::Temperature, rising.clone())
            .with_recent(Target::Humidity, rising[..SIMPLE_MIN_POINTS - 1].to_vec());

        let forecast = registry.predict(3, &ctx, None).unwrap();
        assert!(forecast.fallback);
        let newest = rising[SIMPLE_MIN_POINTS - 1];
        assert!(forecast.points[0].value(Target::Temperature).unwrap() > newest);
        assert!(forecast
            .points
            .iter()
            .all(|p| p.value(Target::Humidity) == Some(newest - 0.5)));
    }

    #[test]
    fn test_predict_merges_and_fills_missing_targets() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .publish(trained_seasonal(Target::Humidity, 90.0))
            .unwrap();

        let ctx = PredictionContext::new(origin()).with_latest(Target::Pressure, 1008.0);
        let forecast = registry.predict(4, &ctx, Some(StrategyType::Seasonal)).unwrap();
        assert!(!forecast.fallback);
        assert_eq!(forecast.models_used, vec![Target::Humidity]);
        for point in &forecast.points {
            assert_eq!(point.value(Target::Pressure), Some(1008.0));
            let humidity = point.value(Target::Humidity).unwrap();
            assert!((0.0..=100.0).contains(&humidity));
        }
        assert_eq!(forecast.points[0].confidence, 95.0);
    }

    #[test]
    fn test_zero_hours_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = PredictionContext::new(origin());
        assert!(registry(&dir).predict(0, &ctx, None).is_err());
    }

    #[test]
    fn test_compare_and_info() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .publish(trained_seasonal(Target::Humidity, 90.0))
            .unwrap();
        registry
            .publish(trained_seasonal(Target::Temperature, 80.0))
            .unwrap();

        let comparison = registry.compare();
        assert_eq!(comparison.best, Some(StrategyType::Seasonal));
        let seasonal = &comparison.strategies[0];
        assert_eq!(seasonal.trained_targets, 2);
        assert_eq!(seasonal.average_accuracy, 85.0);

        let info = registry.info(None);
        assert!(info.is_current);
        assert_eq!(info.targets.len(), 2);
        assert!(registry.info(Some(StrategyType::Recurrent)).targets.is_empty());
    }

    #[test]
    fn test_history_ring_buffer_and_reload() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        for i in 0..5 {
            registry
                .append_history(TrainingHistoryEntry {
                    id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    strategy_type: StrategyType::Seasonal,
                    targets_trained: vec![Target::Humidity],
                    metrics: BTreeMap::new(),
                    overall_accuracy: f64::from(i),
                    duration_secs: 0.1,
                    sensor_data_points: 100,
                    weather_data_points: 0,
                })
                .unwrap();
        }
        let history = registry.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].overall_accuracy, 2.0);
        assert_eq!(history[2].overall_accuracy, 4.0);
        assert_eq!(registry.history(1)[0].overall_accuracy, 4.0);

        registry
            .publish(trained_seasonal(Target::Humidity, 90.0))
            .unwrap();
        registry.set_current(StrategyType::Seasonal).unwrap();

        let reloaded = ModelRegistry::new(Arc::new(ModelStore::new(dir.path())), 3);
        let summary = reloaded.load_all().unwrap();
        assert_eq!(summary.models, 1);
        assert_eq!(summary.history_entries, 3);
        assert!(reloaded.get(StrategyType::Seasonal, Target::Humidity).is_some());
    }

    #[test]
    fn test_scaler_is_kept_with_model() {
        let trained = trained_seasonal(Target::Temperature, 80.0);
        let expected = MinMaxScaler::fit(&[40.0, 63.0]).unwrap();
        // temperature is clipped to 60 before scaling
        assert_eq!(trained.scaler.data_min, expected.data_min);
        assert_eq!(trained.scaler.data_max, 60.0);
    }
}
