//! End-to-end training, persistence and inference

mod common;

use chrono::Duration;
use rstest::rstest;
use std::sync::Arc;
use tempfile::TempDir;

use sensor_forecaster::controller::TrainRequest;
use sensor_forecaster::domain::{PredictionContext, StrategyType, Target};
use sensor_forecaster::forecast::preparation::hourly_series;
use sensor_forecaster::forecast::EvaluationMode;
use sensor_forecaster::ml::training::TrainingRequest;
use sensor_forecaster::ml::ModelRegistry;
use sensor_forecaster::repo::{InMemoryRecordSource, ModelStore};
use sensor_forecaster::ForecastError;

use common::{sensor_rows, start, trainer, weather_rows};

fn context_from(rows: &[sensor_forecaster::domain::Observation], targets: &[Target]) -> PredictionContext {
    let mut origin = start();
    let mut ctx_values = Vec::new();
    for target in targets {
        let series = hourly_series(rows, *target);
        if let Some(last) = series.last() {
            origin = origin.max(last.timestamp);
        }
        ctx_values.push((*target, series.into_iter().map(|p| p.value).collect::<Vec<_>>()));
    }
    ctx_values
        .into_iter()
        .fold(PredictionContext::new(origin), |ctx, (t, v)| ctx.with_recent(t, v))
}

#[rstest]
#[case(StrategyType::Seasonal)]
#[case(StrategyType::GradientBoosting)]
#[case(StrategyType::Recurrent)]
fn test_each_strategy_trains_and_predicts(#[case] strategy: StrategyType) {
    let dir = TempDir::new().unwrap();
    let trainer = trainer(&dir);
    let rows = sensor_rows(24 * 10);
    let targets = [Target::Temperature, Target::Humidity];

    let report = trainer.train_selected_targets(TrainingRequest {
        strategy,
        sensor_records: &rows,
        targets: &targets,
        weather_records: None,
        weather_targets: &[],
    });
    assert!(report.success, "{}", report.message);
    assert_eq!(report.trained_targets(), targets.to_vec());
    assert!((0.0..=100.0).contains(&report.overall_accuracy));
    assert!(report.history_id.is_some());

    let registry = trainer.registry();
    assert_eq!(registry.current(), strategy);
    assert_eq!(registry.history(10).len(), 1);

    let ctx = context_from(&rows, &targets);
    let forecast = registry.predict(24, &ctx, None).unwrap();
    assert!(!forecast.fallback);
    assert_eq!(forecast.points.len(), 24);
    assert_eq!(forecast.points[0].timestamp, ctx.origin + Duration::hours(1));
    assert_eq!(forecast.points[23].timestamp, ctx.origin + Duration::hours(24));
    for point in &forecast.points {
        let humidity = point.value(Target::Humidity).unwrap();
        assert!((0.0..=100.0).contains(&humidity));
        let temperature = point.value(Target::Temperature).unwrap();
        assert!((-40.0..=60.0).contains(&temperature));
        assert!((0.0..=100.0).contains(&point.confidence));
    }
    assert!(forecast
        .points
        .windows(2)
        .all(|w| w[0].confidence >= w[1].confidence));
}

#[test]
fn test_weather_targets_use_weather_rows() {
    let dir = TempDir::new().unwrap();
    let trainer = trainer(&dir);
    let sensor = sensor_rows(24 * 8);
    let weather = weather_rows(24 * 8);

    let report = trainer.train_selected_targets(TrainingRequest {
        strategy: StrategyType::Seasonal,
        sensor_records: &sensor,
        targets: &[Target::Co2],
        weather_records: Some(&weather),
        weather_targets: &[Target::WindSpeed, Target::Rainfall],
    });

    assert!(report.success);
    assert_eq!(report.weather_data_points, weather.len());
    let wind = report.results.iter().find(|r| r.target == Target::WindSpeed).unwrap();
    assert!(wind.success);
    // rain is only reported four hours a day, too few hourly points
    let rain = report.results.iter().find(|r| r.target == Target::Rainfall).unwrap();
    assert!(!rain.success);
    assert!(rain.reason.as_deref().unwrap_or_default().contains("Insufficient"));
}

#[test]
fn test_gradient_boosting_rejects_short_history() {
    let dir = TempDir::new().unwrap();
    let trainer = trainer(&dir);
    let rows = sensor_rows(23);

    let report = trainer.train_selected_targets(TrainingRequest {
        strategy: StrategyType::GradientBoosting,
        sensor_records: &rows,
        targets: &[Target::Temperature],
        weather_records: None,
        weather_targets: &[],
    });

    assert!(!report.success);
    assert!(report.history_id.is_none());
    assert!(trainer.registry().history(10).is_empty());
    assert_eq!(trainer.registry().current(), StrategyType::Seasonal);
}

#[test]
fn test_large_series_is_evaluated_on_hold_out() {
    let dir = TempDir::new().unwrap();
    let trainer = trainer(&dir);
    let rows = sensor_rows(24 * 25);

    let result = trainer.train_target(&rows, Target::Pressure, StrategyType::Seasonal);
    let metrics = result.metrics.unwrap();
    assert_eq!(metrics.evaluation, EvaluationMode::HoldOut);
    assert_eq!(metrics.data_points, 600);
    assert!((-1.0..=1.0).contains(&metrics.r2));
}

#[test]
fn test_registry_restores_after_restart() {
    let dir = TempDir::new().unwrap();
    let rows = sensor_rows(24 * 6);
    {
        let trainer = trainer(&dir);
        let report = trainer.train_selected_targets(TrainingRequest {
            strategy: StrategyType::GradientBoosting,
            sensor_records: &rows,
            targets: &[Target::Dust, Target::Aqi],
            weather_records: None,
            weather_targets: &[],
        });
        assert!(report.success);
    }

    let registry = ModelRegistry::new(Arc::new(ModelStore::new(dir.path())), 100);
    let summary = registry.load_all().unwrap();
    assert_eq!(summary.models, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.history_entries, 1);
    assert_eq!(registry.current(), StrategyType::GradientBoosting);

    let info = registry.info(None);
    assert!(info.is_current);
    assert_eq!(info.targets.len(), 2);

    let ctx = context_from(&rows, &[Target::Dust, Target::Aqi]);
    let forecast = registry.predict(6, &ctx, None).unwrap();
    assert!(!forecast.fallback);
    assert_eq!(forecast.models_used, vec![Target::Aqi, Target::Dust]);
}

#[test]
fn test_untrained_strategy_falls_back_to_trend() {
    let dir = TempDir::new().unwrap();
    let trainer = trainer(&dir);
    let rows = sensor_rows(48);
    let ctx = context_from(&rows, &[Target::Temperature]);

    let forecast = trainer
        .registry()
        .predict(12, &ctx, Some(StrategyType::Recurrent))
        .unwrap();
    assert!(forecast.fallback);
    assert!(forecast.models_used.is_empty());
    assert_eq!(forecast.points.len(), 12);
    assert!(forecast.points.iter().all(|p| p.value(Target::Temperature).is_some()));
}

#[test]
fn test_compare_prefers_trained_strategy() {
    let dir = TempDir::new().unwrap();
    let trainer = trainer(&dir);
    let rows = sensor_rows(24 * 6);
    trainer.train_target(&rows, Target::Temperature, StrategyType::Seasonal);

    let comparison = trainer.registry().compare();
    assert_eq!(comparison.best, Some(StrategyType::Seasonal));
    assert_eq!(comparison.strategies.len(), 3);
}

#[tokio::test]
async fn test_service_rejects_unknown_names_before_io() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(InMemoryRecordSource::new(sensor_rows(200), Vec::new()));
    let service = common::service(&dir, source);

    let err = service
        .train_selected_targets(TrainRequest {
            strategy_type: Some("prophet".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForecastError::UnknownStrategyType(_)));

    let err = service
        .train_selected_targets(TrainRequest {
            targets: vec!["temperature".into(), "pollen".into()],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForecastError::UnknownTarget(_)));

    assert!(matches!(
        service.set_current_strategy("arima"),
        Err(ForecastError::UnknownStrategyType(_))
    ));
    assert!(service.training_history(10).is_empty());
}

#[tokio::test]
async fn test_service_trains_then_predicts() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(InMemoryRecordSource::new(sensor_rows(24 * 8), weather_rows(24 * 8)));
    let service = common::service(&dir, source);

    let report = service
        .train_selected_targets(TrainRequest {
            strategy_type: Some("seasonal".into()),
            targets: vec!["temperature".into(), "humidity".into(), "uv_index".into()],
            data_points: None,
        })
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.trained_targets().len(), 3);

    let forecast = service.predict(24, None).await.unwrap();
    assert!(!forecast.fallback);
    assert_eq!(forecast.points.len(), 24);
    let expected_origin = start() + Duration::hours(24 * 8 - 1);
    assert_eq!(forecast.points[0].timestamp, expected_origin + Duration::hours(1));
    assert!(forecast.points.iter().all(|p| p.value(Target::UvIndex).is_some()));

    assert!(matches!(
        service.predict(0, None).await,
        Err(ForecastError::InvalidConfig(_))
    ));

    let info = service.model_info(Some("seasonal")).unwrap();
    assert_eq!(info.targets.len(), 3);
    assert!(info.average_accuracy > 0.0);
    assert_eq!(service.training_history(5).len(), 1);
}
