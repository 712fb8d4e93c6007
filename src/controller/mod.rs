//! Service facade wiring the registry, trainer, scheduler and record source
//!
//! [`ForecastService`] is the surface consumed by request-serving layers.
//! Names arriving as strings are validated here before any I/O happens.

pub mod scheduler;

use chrono::{DateTime, FixedOffset, Local, Timelike};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, ServiceConfig};
use crate::domain::{Forecast, Observation, PredictionContext, StrategyType, Target, TargetOrigin};
use crate::error::{ForecastError, Result};
use crate::forecast::preparation::hourly_series;
use crate::ml::registry::{ModelComparison, StrategyTypeInfo};
use crate::ml::training::TrainingRequest;
use crate::ml::{ModelRegistry, Trainer, TrainingHistoryEntry, TrainingReport};
use crate::repo::{JsonFileRecordSource, ModelStore, RecordSource};

pub use scheduler::{AutoTrainConfig, AutoTrainScheduler, SchedulerSettings, TaskStatus};

/// Manual training request as received from a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainRequest {
    pub strategy_type: Option<String>,
    /// Sensor and weather target names; empty trains every sensor target
    #[serde(default)]
    pub targets: Vec<String>,
    pub data_points: Option<usize>,
}

#[derive(Clone)]
pub struct ForecastService {
    registry: Arc<ModelRegistry>,
    trainer: Arc<Trainer>,
    scheduler: Arc<AutoTrainScheduler>,
    source: Arc<dyn RecordSource>,
    settings: ServiceConfig,
}

impl ForecastService {
    pub fn new(
        trainer: Arc<Trainer>,
        scheduler: Arc<AutoTrainScheduler>,
        source: Arc<dyn RecordSource>,
        settings: ServiceConfig,
    ) -> Self {
        Self {
            registry: Arc::clone(trainer.registry()),
            trainer,
            scheduler,
            source,
            settings,
        }
    }

    /// Build the whole graph from configuration and restore persisted state
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(ModelStore::new(&cfg.storage.data_dir));
        let registry = Arc::new(ModelRegistry::new(
            Arc::clone(&store),
            cfg.storage.history_limit,
        ));
        registry.load_all()?;

        let trainer = Arc::new(Trainer::new(
            cfg.training.clone(),
            cfg.model_settings(),
            registry,
        ));
        let source: Arc<dyn RecordSource> = Arc::new(JsonFileRecordSource::new(
            &cfg.sources.sensor_path,
            cfg.sources.weather_path.clone(),
        ));
        let scheduler = Arc::new(AutoTrainScheduler::new(
            Arc::clone(&trainer),
            Arc::clone(&source),
            store,
            cfg.scheduler.clone(),
        ));

        Ok(Self::new(trainer, scheduler, source, cfg.service.clone()))
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<AutoTrainScheduler> {
        &self.scheduler
    }

    /// Train the requested targets on the most recent records
    pub async fn train_selected_targets(&self, request: TrainRequest) -> Result<TrainingReport> {
        let strategy = match request.strategy_type.as_deref() {
            Some(name) => StrategyType::parse_name(name)?,
            None => self.registry.current(),
        };
        let targets = parse_targets(&request.targets)?;
        let (sensor_targets, weather_targets): (Vec<Target>, Vec<Target>) = targets
            .into_iter()
            .partition(|t| t.origin() == TargetOrigin::Sensor);
        let limit = request
            .data_points
            .unwrap_or(self.settings.default_data_points)
            .max(1);

        let sensor = if sensor_targets.is_empty() {
            Vec::new()
        } else {
            self.source.fetch_recent(TargetOrigin::Sensor, limit).await?
        };
        let weather = if weather_targets.is_empty() {
            None
        } else {
            Some(self.source.fetch_recent(TargetOrigin::WeatherApi, limit).await?)
        };

        info!(
            strategy = %strategy,
            sensor_targets = sensor_targets.len(),
            weather_targets = weather_targets.len(),
            sensor_rows = sensor.len(),
            "manual training requested"
        );

        let trainer = Arc::clone(&self.trainer);
        tokio::task::spawn_blocking(move || {
            trainer.train_selected_targets(TrainingRequest {
                strategy,
                sensor_records: &sensor,
                targets: &sensor_targets,
                weather_records: weather.as_deref(),
                weather_targets: &weather_targets,
            })
        })
        .await
        .map_err(|e| ForecastError::Model(format!("training task failed: {e}")))
    }

    /// Forecast `hours_ahead` hours past the newest observation
    pub async fn predict(&self, hours_ahead: usize, strategy: Option<&str>) -> Result<Forecast> {
        let strategy = strategy.map(StrategyType::parse_name).transpose()?;
        if hours_ahead == 0 || hours_ahead > self.settings.max_hours_ahead {
            return Err(ForecastError::InvalidConfig(format!(
                "hours_ahead must be 1-{}, got {hours_ahead}",
                self.settings.max_hours_ahead
            )));
        }

        let limit = self.settings.context_points;
        let sensor = self.source.fetch_recent(TargetOrigin::Sensor, limit).await?;
        let weather = self.source.fetch_recent(TargetOrigin::WeatherApi, limit).await?;
        let context = build_context(&sensor, &weather, Local::now().fixed_offset());

        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || registry.predict(hours_ahead, &context, strategy))
            .await
            .map_err(|e| ForecastError::Model(format!("prediction task failed: {e}")))?
    }

    pub fn model_info(&self, strategy: Option<&str>) -> Result<StrategyTypeInfo> {
        let strategy = strategy.map(StrategyType::parse_name).transpose()?;
        Ok(self.registry.info(strategy))
    }

    pub fn training_history(&self, limit: usize) -> Vec<TrainingHistoryEntry> {
        self.registry.history(limit)
    }

    pub fn compare_models(&self) -> ModelComparison {
        self.registry.compare()
    }

    pub fn set_current_strategy(&self, strategy: &str) -> Result<StrategyType> {
        let strategy = StrategyType::parse_name(strategy)?;
        self.registry.set_current(strategy)?;
        Ok(strategy)
    }

    pub fn auto_train_config(&self) -> Result<AutoTrainConfig> {
        self.scheduler.config()
    }

    pub fn update_auto_train_config(&self, config: AutoTrainConfig) -> Result<AutoTrainConfig> {
        self.scheduler.update_config(config)
    }

    pub async fn run_auto_train_now(&self) -> Result<TrainingReport> {
        self.scheduler.run_now().await
    }

    pub fn start_scheduler(&self) -> bool {
        self.scheduler.start()
    }

    pub async fn stop_scheduler(&self) -> bool {
        self.scheduler.stop().await
    }

    pub fn scheduler_status(&self) -> TaskStatus {
        self.scheduler.status()
    }
}

fn parse_targets(names: &[String]) -> Result<Vec<Target>> {
    if names.is_empty() {
        return Ok(Target::SENSOR.to_vec());
    }
    names.iter().map(|n| Target::parse_name(n)).collect()
}

/// Prediction context from raw rows: recent hourly values per target, origin at the newest hour
fn build_context(
    sensor: &[Observation],
    weather: &[Observation],
    now: DateTime<FixedOffset>,
) -> PredictionContext {
    let mut newest: Option<DateTime<FixedOffset>> = None;
    let mut recent = Vec::new();

    for target in Target::SENSOR.iter().chain(Target::WEATHER.iter()) {
        let rows = match target.origin() {
            TargetOrigin::Sensor => sensor,
            TargetOrigin::WeatherApi => weather,
        };
        let series = hourly_series(rows, *target);
        if let Some(last) = series.last() {
            newest = Some(newest.map_or(last.timestamp, |n| n.max(last.timestamp)));
            recent.push((*target, series.into_iter().map(|p| p.value).collect::<Vec<_>>()));
        }
    }

    let origin = newest.unwrap_or_else(|| {
        warn!("no recent observations, forecasting from the current hour");
        now.with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now)
    });

    recent
        .into_iter()
        .fold(PredictionContext::new(origin), |ctx, (target, values)| {
            ctx.with_recent(target, values)
        })
}
