#![allow(dead_code)]
//! Shared fixtures for the integration suites

use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use std::sync::Arc;
use tempfile::TempDir;

use sensor_forecaster::config::ServiceConfig;
use sensor_forecaster::controller::{AutoTrainScheduler, SchedulerSettings};
use sensor_forecaster::domain::{Observation, Target};
use sensor_forecaster::ml::{
    GradientBoostingParams, ModelRegistry, ModelSettings, RecurrentParams, Trainer,
    TrainingSettings,
};
use sensor_forecaster::repo::{ModelStore, RecordSource};
use sensor_forecaster::ForecastService;

pub fn start() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(7 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
        .unwrap()
}

/// Hourly sensor rows with a daily cycle on every sensor column
pub fn sensor_rows(hours: usize) -> Vec<Observation> {
    (0..hours)
        .map(|i| {
            let phase = (i % 24) as f64 / 24.0 * std::f64::consts::TAU;
            Observation::at(start() + Duration::hours(i as i64))
                .with(Target::Temperature, 29.0 + 4.0 * phase.sin())
                .with(Target::Humidity, 72.0 - 12.0 * phase.sin())
                .with(Target::Pressure, 1008.0 + 2.0 * phase.cos())
                .with(Target::Aqi, 60.0 + 15.0 * phase.sin())
                .with(Target::Co2, 450.0 + 40.0 * phase.cos())
                .with(Target::Dust, 35.0 + 8.0 * phase.sin())
        })
        .collect()
}

/// Hourly weather API rows; rainfall is only reported in the afternoon
pub fn weather_rows(hours: usize) -> Vec<Observation> {
    (0..hours)
        .map(|i| {
            let hour = i % 24;
            let phase = hour as f64 / 24.0 * std::f64::consts::TAU;
            let mut row = Observation::at(start() + Duration::hours(i as i64))
                .with(Target::WindSpeed, 3.0 + phase.cos());
            if (14..18).contains(&hour) {
                row = row.with(Target::Rainfall, 1.2);
            }
            if (7..17).contains(&hour) {
                row = row.with(Target::UvIndex, 1.0 + 6.0 * phase.sin().abs());
            }
            row
        })
        .collect()
}

/// Small tree ensembles and a short recurrent run keep the suites quick
pub fn fast_models() -> ModelSettings {
    ModelSettings {
        gradient_boosting: GradientBoostingParams {
            n_estimators: 15,
            ..Default::default()
        },
        recurrent: RecurrentParams {
            hidden_size: 8,
            epochs: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn trainer(dir: &TempDir) -> Arc<Trainer> {
    let store = Arc::new(ModelStore::new(dir.path()));
    let registry = Arc::new(ModelRegistry::new(store, 100));
    Arc::new(Trainer::new(
        TrainingSettings::default(),
        fast_models(),
        registry,
    ))
}

pub fn service(dir: &TempDir, source: Arc<dyn RecordSource>) -> ForecastService {
    let trainer = trainer(dir);
    let scheduler = Arc::new(AutoTrainScheduler::new(
        Arc::clone(&trainer),
        Arc::clone(&source),
        Arc::new(ModelStore::new(dir.path())),
        SchedulerSettings {
            poll_interval_secs: 1,
            ..Default::default()
        },
    ));
    ForecastService::new(trainer, scheduler, source, ServiceConfig::default())
}
