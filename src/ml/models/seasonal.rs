//! Seasonal decomposition forecaster
//!
//! Hour-of-day and day-of-week profiles blended with a ridge trend over
//! standardised `(hour, day_of_week, day_of_year)` features. This is the
//! production default strategy.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::StrategyType;
use crate::error::{ForecastError, Result};
use crate::forecast::PreparedSeries;
use crate::ml::{Backtest, FitReport, ForecastStrategy, StrategyInfo};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeasonalParams {
    /// Ridge regularisation strength
    pub ridge_alpha: f64,
    /// Weight of the trend term; the seasonal profile gets the remainder
    pub trend_weight: f64,
}

impl Default for SeasonalParams {
    fn default() -> Self {
        Self {
            ridge_alpha: 1.0,
            trend_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalModel {
    params: SeasonalParams,
    hourly: Vec<Option<f64>>,
    weekly: Vec<Option<f64>>,
    mean: f64,
    feature_mean: [f64; 3],
    feature_std: [f64; 3],
    coefficients: [f64; 3],
    intercept: f64,
    fitted: bool,
}

fn calendar_features(ts: &DateTime<FixedOffset>) -> [f64; 3] {
    [
        f64::from(ts.hour()),
        f64::from(ts.weekday().num_days_from_monday()),
        f64::from(ts.ordinal()),
    ]
}

fn bucket_means(keys: impl Iterator<Item = usize>, values: &[f64], buckets: usize) -> Vec<Option<f64>> {
    let mut acc = vec![(0.0, 0usize); buckets];
    for (key, value) in keys.zip(values) {
        acc[key].0 += value;
        acc[key].1 += 1;
    }
    acc.into_iter()
        .map(|(sum, n)| (n > 0).then(|| sum / n as f64))
        .collect()
}

impl SeasonalModel {
    pub const MIN_POINTS: usize = 50;

    pub fn new(params: SeasonalParams) -> Self {
        Self {
            params,
            hourly: vec![None; 24],
            weekly: vec![None; 7],
            mean: 0.0,
            feature_mean: [0.0; 3],
            feature_std: [1.0; 3],
            coefficients: [0.0; 3],
            intercept: 0.0,
            fitted: false,
        }
    }

    pub fn params(&self) -> &SeasonalParams {
        &self.params
    }

    fn trend(&self, features: &[f64; 3]) -> f64 {
        let mut value = self.intercept;
        for k in 0..3 {
            let z = (features[k] - self.feature_mean[k]) / self.feature_std[k];
            value += self.coefficients[k] * z;
        }
        value
    }

    /// Scaled prediction for one timestamp
    pub fn predict_at(&self, ts: &DateTime<FixedOffset>) -> f64 {
        let features = calendar_features(ts);
        let hourly = self.hourly[ts.hour() as usize].unwrap_or(self.mean);
        let weekly =
            self.weekly[ts.weekday().num_days_from_monday() as usize].unwrap_or(self.mean);
        let w = self.params.trend_weight;
        w * self.trend(&features) + (1.0 - w) * (hourly + weekly) / 2.0
    }

    fn ensure_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(ForecastError::Model("seasonal model is not fitted".into()))
        }
    }
}

impl ForecastStrategy for SeasonalModel {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Seasonal
    }

    fn fit(&mut self, series: &PreparedSeries) -> Result<FitReport> {
        let n = series.len();
        if n < Self::MIN_POINTS {
            return Err(ForecastError::InsufficientData {
                target: series.target,
                available: n,
                required: Self::MIN_POINTS,
            });
        }

        let y = &series.scaled;
        self.mean = y.iter().sum::<f64>() / n as f64;
        self.hourly = bucket_means(series.timestamps.iter().map(|t| t.hour() as usize), y, 24);
        self.weekly = bucket_means(
            series
                .timestamps
                .iter()
                .map(|t| t.weekday().num_days_from_monday() as usize),
            y,
            7,
        );

        let raw: Vec<[f64; 3]> = series.timestamps.iter().map(calendar_features).collect();
        for k in 0..3 {
            let mean = raw.iter().map(|r| r[k]).sum::<f64>() / n as f64;
            let var = raw.iter().map(|r| (r[k] - mean).powi(2)).sum::<f64>() / n as f64;
            self.feature_mean[k] = mean;
            self.feature_std[k] = if var.sqrt() < 1e-12 { 1.0 } else { var.sqrt() };
        }

        let x = DMatrix::from_fn(n, 3, |i, k| {
            (raw[i][k] - self.feature_mean[k]) / self.feature_std[k]
        });
        let centred = DVector::from_iterator(n, y.iter().map(|v| v - self.mean));
        let gram = x.transpose() * &x + DMatrix::<f64>::identity(3, 3) * self.params.ridge_alpha;
        let rhs = x.transpose() * centred;
        let solution = gram
            .cholesky()
            .map(|c| c.solve(&rhs))
            .ok_or_else(|| ForecastError::Model("ridge system is not positive definite".into()))?;

        for k in 0..3 {
            self.coefficients[k] = solution[k];
        }
        // standardised features are centred, so the intercept is the target mean
        self.intercept = self.mean;
        self.fitted = true;

        let residual = series
            .timestamps
            .iter()
            .zip(y)
            .map(|(ts, v)| (self.predict_at(ts) - v).powi(2))
            .sum::<f64>()
            / n as f64;

        Ok(FitReport {
            samples: n,
            lookback: None,
            horizons: Vec::new(),
            final_loss: Some(residual),
        })
    }

    fn backtest(&self, series: &PreparedSeries, start: usize) -> Result<Backtest> {
        self.ensure_fitted()?;
        let first_index = start.min(series.len());
        Ok(Backtest {
            first_index,
            predictions: series.timestamps[first_index..]
                .iter()
                .map(|ts| self.predict_at(ts))
                .collect(),
        })
    }

    fn predict_multi_step(
        &self,
        origin: DateTime<FixedOffset>,
        hours_ahead: usize,
        _window: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        self.ensure_fitted()?;
        Ok((1..=hours_ahead as i64)
            .map(|h| self.predict_at(&(origin + Duration::hours(h))))
            .collect())
    }

    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            strategy_type: StrategyType::Seasonal,
            name: StrategyType::Seasonal.display_name().to_string(),
            description: "Hour-of-day and day-of-week profiles blended with a ridge trend"
                .to_string(),
            lookback: None,
            horizons: Vec::new(),
            parameters: json!({
                "ridge_alpha": self.params.ridge_alpha,
                "trend_weight": self.params.trend_weight,
                "trend_coefficients": self.coefficients,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observation, Target};
    use crate::forecast::DataPreparer;
    use chrono::TimeZone;

    fn daily_cycle(hours: usize) -> PreparedSeries {
        let t0 = FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 0, 0, 0)
            .unwrap();
        let records: Vec<Observation> = (0..hours)
            .map(|i| {
                let phase = (i % 24) as f64 / 24.0 * std::f64::consts::TAU;
                Observation::at(t0 + Duration::hours(i as i64))
                    .with(Target::Temperature, 28.0 + 4.0 * phase.sin())
            })
            .collect();
        DataPreparer::default()
            .prepare(&records, Target::Temperature, SeasonalModel::MIN_POINTS)
            .unwrap()
    }

    #[test]
    fn test_fit_requires_fifty_points() {
        let series = daily_cycle(72).slice(0..49);
        let mut model = SeasonalModel::new(SeasonalParams::default());
        assert!(matches!(
            model.fit(&series),
            Err(ForecastError::InsufficientData { required: 50, .. })
        ));
    }

    #[test]
    fn test_fit_captures_daily_profile() {
        let series = daily_cycle(24 * 7);
        let mut model = SeasonalModel::new(SeasonalParams::default());
        let report = model.fit(&series).unwrap();
        assert_eq!(report.samples, 24 * 7);

        let origin = *series.timestamps.last().unwrap();
        let forecast = model.predict_multi_step(origin, 24, None).unwrap();
        assert_eq!(forecast.len(), 24);

        // the hour with the highest profile should forecast higher than the lowest
        let peak = forecast.iter().copied().fold(f64::MIN, f64::max);
        let trough = forecast.iter().copied().fold(f64::MAX, f64::min);
        assert!(peak - trough > 0.1);
    }

    #[test]
    fn test_backtest_alignment() {
        let series = daily_cycle(100);
        let mut model = SeasonalModel::new(SeasonalParams::default());
        model.fit(&series).unwrap();
        let bt = model.backtest(&series, 80).unwrap();
        assert_eq!(bt.first_index, 80);
        assert_eq!(bt.predictions.len(), 20);
    }

    #[test]
    fn test_unfitted_model_rejects_prediction() {
        let model = SeasonalModel::new(SeasonalParams::default());
        let origin = chrono::Local::now().fixed_offset();
        assert!(model.predict_multi_step(origin, 3, None).is_err());
    }
}
