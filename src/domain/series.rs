use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::Target;

/// One reading for one target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: DateTime<FixedOffset>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A raw row as delivered by the storage collaborator.
///
/// Sensor rows fill the sensor columns, weather API rows fill wind/rain/UV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<FixedOffset>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub aqi: Option<f64>,
    #[serde(default)]
    pub co2: Option<f64>,
    #[serde(default)]
    pub dust: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
    #[serde(default)]
    pub rainfall: Option<f64>,
    #[serde(default)]
    pub uv_index: Option<f64>,
}

impl Observation {
    pub fn at(timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            timestamp,
            temperature: None,
            humidity: None,
            pressure: None,
            aqi: None,
            co2: None,
            dust: None,
            wind_speed: None,
            rainfall: None,
            uv_index: None,
        }
    }

    /// Builder-style setter used by sources and tests
    pub fn with(mut self, target: Target, value: f64) -> Self {
        *self.slot_mut(target) = Some(value);
        self
    }

    pub fn value(&self, target: Target) -> Option<f64> {
        match target {
            Target::Temperature => self.temperature,
            Target::Humidity => self.humidity,
            Target::Pressure => self.pressure,
            Target::Aqi => self.aqi,
            Target::Co2 => self.co2,
            Target::Dust => self.dust,
            Target::WindSpeed => self.wind_speed,
            Target::Rainfall => self.rainfall,
            Target::UvIndex => self.uv_index,
        }
    }

    fn slot_mut(&mut self, target: Target) -> &mut Option<f64> {
        match target {
            Target::Temperature => &mut self.temperature,
            Target::Humidity => &mut self.humidity,
            Target::Pressure => &mut self.pressure,
            Target::Aqi => &mut self.aqi,
            Target::Co2 => &mut self.co2,
            Target::Dust => &mut self.dust,
            Target::WindSpeed => &mut self.wind_speed,
            Target::Rainfall => &mut self.rainfall,
            Target::UvIndex => &mut self.uv_index,
        }
    }

    /// Point view of one column, if the row carries a value for it
    pub fn point(&self, target: Target) -> Option<TimeSeriesPoint> {
        Some(TimeSeriesPoint::new(self.timestamp, self.value(target)?))
    }
}
