//! Data preparation shared by every forecasting strategy
//!
//! Raw, irregular readings are turned into a clean hourly series:
//! positive readings only, hourly buckets, IQR clipping, physical-range
//! clipping and a min-max scaler fit once per training run.

use chrono::{DateTime, FixedOffset, Timelike};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, warn};

use crate::domain::{Aggregation, Observation, Target, TimeSeriesPoint};
use crate::error::{ForecastError, Result};

/// Minimum hourly points for the simple (trend) predictor
pub const SIMPLE_MIN_POINTS: usize = 24;

/// Min-max scaler mapping the fitted domain onto [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MinMaxScaler {
    pub data_min: f64,
    pub data_max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &[f64]) -> Option<Self> {
        let (data_min, data_max) = values.iter().copied().minmax().into_option()?;
        Some(Self { data_min, data_max })
    }

    /// Width of the fitted domain; a constant series gets a unit span
    fn span(&self) -> f64 {
        let span = self.data_max - self.data_min;
        if span.abs() < 1e-12 {
            1.0
        } else {
            span
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.data_min) / self.span()
    }

    pub fn inverse_transform(&self, scaled: f64) -> f64 {
        scaled * self.span() + self.data_min
    }
}

/// Hourly, cleaned and scaled series for one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedSeries {
    pub target: Target,
    /// Hour-aligned timestamps, strictly increasing
    pub timestamps: Vec<DateTime<FixedOffset>>,
    /// Cleaned values in the target's unit
    pub values: Vec<f64>,
    /// `values` mapped through `scaler`
    pub scaled: Vec<f64>,
    pub scaler: MinMaxScaler,
}

impl PreparedSeries {
    pub fn len(&self) -> usize {
        self.scaled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scaled.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamps.last().copied()
    }

    /// Sub-series sharing the same scaler
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            target: self.target,
            timestamps: self.timestamps[range.clone()].to_vec(),
            values: self.values[range.clone()].to_vec(),
            scaled: self.scaled[range].to_vec(),
            scaler: self.scaler,
        }
    }

    /// Scaled points, for strategies that need the time axis
    pub fn scaled_points(&self) -> impl Iterator<Item = TimeSeriesPoint> + '_ {
        self.timestamps
            .iter()
            .zip(self.scaled.iter())
            .map(|(ts, v)| TimeSeriesPoint::new(*ts, *v))
    }
}

/// Builds [`PreparedSeries`] from raw observations
#[derive(Debug, Clone, Copy)]
pub struct DataPreparer {
    /// `k` in `Q1 - k*IQR`, `Q3 + k*IQR`
    pub iqr_multiplier: f64,
}

impl Default for DataPreparer {
    fn default() -> Self {
        Self { iqr_multiplier: 1.5 }
    }
}

impl DataPreparer {
    pub fn new(iqr_multiplier: f64) -> Self {
        Self {
            iqr_multiplier: iqr_multiplier.clamp(1.5, 2.0),
        }
    }

    /// Run the full preparation pipeline, failing below `min_points` hourly points
    pub fn prepare(
        &self,
        records: &[Observation],
        target: Target,
        min_points: usize,
    ) -> Result<PreparedSeries> {
        let hourly = hourly_series(records, target);

        if hourly.len() < min_points {
            warn!(
                target = %target,
                available = hourly.len(),
                required = min_points,
                "insufficient hourly data"
            );
            return Err(ForecastError::InsufficientData {
                target,
                available: hourly.len(),
                required: min_points,
            });
        }

        let raw: Vec<f64> = hourly.iter().map(|p| p.value).collect();
        let (lower, upper) = iqr_bounds(&raw, self.iqr_multiplier);
        let values: Vec<f64> = raw
            .iter()
            .map(|v| target.clip_to_range(v.clamp(lower, upper)))
            .collect();

        let scaler = MinMaxScaler::fit(&values).ok_or(ForecastError::InsufficientData {
            target,
            available: 0,
            required: min_points,
        })?;
        let scaled = values.iter().map(|v| scaler.transform(*v)).collect();

        debug!(
            target = %target,
            points = values.len(),
            lower,
            upper,
            "prepared series"
        );

        Ok(PreparedSeries {
            target,
            timestamps: hourly.iter().map(|p| p.timestamp).collect(),
            values,
            scaled,
            scaler,
        })
    }
}

/// Positive readings of `target` aggregated into hourly buckets, oldest first
pub fn hourly_series(records: &[Observation], target: Target) -> Vec<TimeSeriesPoint> {
    let mut buckets: BTreeMap<DateTime<FixedOffset>, (f64, usize)> = BTreeMap::new();

    for point in records.iter().filter_map(|r| r.point(target)) {
        if !point.value.is_finite() || point.value <= 0.0 {
            continue;
        }
        let Some(hour) = truncate_to_hour(point.timestamp) else {
            continue;
        };
        let entry = buckets.entry(hour).or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(ts, (sum, count))| {
            let value = match target.aggregation() {
                Aggregation::Mean => sum / count as f64,
                Aggregation::Sum => sum,
            };
            TimeSeriesPoint::new(ts, value)
        })
        .collect()
}

fn truncate_to_hour(ts: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    ts.with_minute(0)?.with_second(0)?.with_nanosecond(0)
}

/// Linear-interpolated quantile of a sorted slice
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Tukey fences `(Q1 - k*IQR, Q3 + k*IQR)`
pub fn iqr_bounds(values: &[f64], k: f64) -> (f64, f64) {
    let sorted: Vec<f64> = values.iter().copied().sorted_by(f64::total_cmp).collect();
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    (q1 - k * iqr, q3 + k * iqr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn base() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
            .unwrap()
    }

    fn hourly_records(target: Target, values: &[f64]) -> Vec<Observation> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Observation::at(base() + Duration::hours(i as i64)).with(target, *v))
            .collect()
    }

    #[test]
    fn test_hourly_mean_aggregation() {
        let t0 = base();
        let records = vec![
            Observation::at(t0 + Duration::minutes(5)).with(Target::Humidity, 60.0),
            Observation::at(t0 + Duration::minutes(35)).with(Target::Humidity, 70.0),
            Observation::at(t0 + Duration::minutes(65)).with(Target::Humidity, 80.0),
        ];
        let series = hourly_series(&records, Target::Humidity);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].timestamp, t0);
        assert_eq!(series[0].value, 65.0);
        assert_eq!(series[1].value, 80.0);
    }

    #[test]
    fn test_rainfall_is_summed_per_hour() {
        let t0 = base();
        let records = vec![
            Observation::at(t0 + Duration::minutes(10)).with(Target::Rainfall, 0.5),
            Observation::at(t0 + Duration::minutes(40)).with(Target::Rainfall, 1.5),
        ];
        let series = hourly_series(&records, Target::Rainfall);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value, 2.0);
    }

    #[test]
    fn test_non_positive_and_missing_values_are_dropped() {
        let t0 = base();
        let records = vec![
            Observation::at(t0).with(Target::Temperature, 0.0),
            Observation::at(t0 + Duration::hours(1)).with(Target::Temperature, -3.0),
            Observation::at(t0 + Duration::hours(2)).with(Target::Humidity, 50.0),
            Observation::at(t0 + Duration::hours(3)).with(Target::Temperature, 28.0),
        ];
        let series = hourly_series(&records, Target::Temperature);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value, 28.0);
    }

    #[test]
    fn test_insufficient_data() {
        let records = hourly_records(Target::Temperature, &[25.0; 23]);
        let err = DataPreparer::default()
            .prepare(&records, Target::Temperature, SIMPLE_MIN_POINTS)
            .unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData {
                available: 23,
                required: 24,
                ..
            }
        ));
    }

    #[test]
    fn test_outliers_are_clipped_and_scaled() {
        let mut values: Vec<f64> = (0..40).map(|i| 1010.0 + (i % 5) as f64).collect();
        values[20] = 1400.0;
        let records = hourly_records(Target::Pressure, &values);
        let series = DataPreparer::default()
            .prepare(&records, Target::Pressure, 24)
            .unwrap();

        assert!(series.values.iter().all(|v| *v <= 1050.0));
        assert!(series.values[20] < 1020.0);
        assert!(series.scaled.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_constant_series_scaler() {
        let scaler = MinMaxScaler::fit(&[5.0, 5.0, 5.0]).unwrap();
        assert_eq!(scaler.transform(5.0), 0.0);
        assert_eq!(scaler.inverse_transform(0.0), 5.0);
    }

    #[test]
    fn test_iqr_bounds() {
        let (lo, hi) = iqr_bounds(&[1.0, 2.0, 3.0, 4.0, 5.0], 1.5);
        // Q1 = 2, Q3 = 4, IQR = 2
        assert_eq!(lo, -1.0);
        assert_eq!(hi, 7.0);
    }

    #[test]
    fn test_slice_keeps_scaler() {
        let values: Vec<f64> = (0..30).map(|i| 20.0 + i as f64 * 0.5).collect();
        let records = hourly_records(Target::Temperature, &values);
        let series = DataPreparer::default()
            .prepare(&records, Target::Temperature, 24)
            .unwrap();
        let head = series.slice(0..10);
        assert_eq!(head.len(), 10);
        assert_eq!(head.scaler, series.scaler);
    }

    proptest! {
        #[test]
        fn prop_prepared_series_is_ordered_and_in_range(
            values in prop::collection::vec(0.1f64..2000.0, 24..120),
            offsets in prop::collection::vec(0i64..400, 24..120),
        ) {
            let records: Vec<Observation> = values
                .iter()
                .zip(offsets.iter().cycle())
                .map(|(v, h)| Observation::at(base() + Duration::hours(*h)).with(Target::Humidity, *v))
                .collect();

            if let Ok(series) = DataPreparer::default().prepare(&records, Target::Humidity, 24) {
                prop_assert!(series.timestamps.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(series.values.iter().all(|v| (0.0..=100.0).contains(v)));
                prop_assert!(series.scaled.iter().all(|v| (-1e-9..=1.0 + 1e-9).contains(v)));
            }
        }

        #[test]
        fn prop_scaler_round_trip(
            values in prop::collection::vec(-500.0f64..500.0, 2..50),
            pick in 0usize..50,
        ) {
            let scaler = MinMaxScaler::fit(&values).unwrap();
            let x = values[pick % values.len()];
            let back = scaler.inverse_transform(scaler.transform(x));
            prop_assert!((back - x).abs() < 1e-9);
        }
    }
}
