use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{ForecastError, Result};

// ============================================================================
// Forecast Targets
// ============================================================================

/// Where the readings of a target come from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetOrigin {
    /// On-site sensor node
    Sensor,
    /// External weather API feed
    WeatherApi,
}

/// How raw readings are combined into one hourly value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Mean,
    /// Accumulating quantities (rainfall)
    Sum,
}

/// One forecastable quantity
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Target {
    Temperature,
    Humidity,
    Pressure,
    Aqi,
    Co2,
    Dust,
    WindSpeed,
    Rainfall,
    UvIndex,
}

impl Target {
    pub const SENSOR: [Target; 6] = [
        Target::Temperature,
        Target::Humidity,
        Target::Aqi,
        Target::Pressure,
        Target::Co2,
        Target::Dust,
    ];

    pub const WEATHER: [Target; 3] = [Target::WindSpeed, Target::Rainfall, Target::UvIndex];

    pub fn origin(&self) -> TargetOrigin {
        match self {
            Self::WindSpeed | Self::Rainfall | Self::UvIndex => TargetOrigin::WeatherApi,
            _ => TargetOrigin::Sensor,
        }
    }

    pub fn aggregation(&self) -> Aggregation {
        match self {
            Self::Rainfall => Aggregation::Sum,
            _ => Aggregation::Mean,
        }
    }

    /// Physically plausible range `(min, max)` in the target's unit
    pub fn physical_range(&self) -> (f64, f64) {
        match self {
            Self::Temperature => (0.0, 60.0),
            Self::Humidity => (0.0, 100.0),
            Self::Pressure => (950.0, 1050.0),
            Self::Aqi => (0.0, 500.0),
            Self::Co2 => (0.0, 5000.0),
            Self::Dust => (0.0, 1000.0),
            Self::WindSpeed => (0.0, 50.0),
            Self::Rainfall => (0.0, 100.0),
            Self::UvIndex => (0.0, 20.0),
        }
    }

    pub fn parse_name(name: &str) -> Result<Self> {
        name.trim()
            .parse()
            .map_err(|_: strum::ParseError| ForecastError::UnknownTarget(name.to_string()))
    }

    /// Clip `value` to the target's physical range
    pub fn clip_to_range(&self, value: f64) -> f64 {
        let (lo, hi) = self.physical_range();
        value.clamp(lo, hi)
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
            Self::Pressure => "hPa",
            Self::Aqi => "",
            Self::Co2 => "ppm",
            Self::Dust => "µg/m³",
            Self::WindSpeed => "m/s",
            Self::Rainfall => "mm",
            Self::UvIndex => "",
        }
    }
}

// ============================================================================
// Strategy Types
// ============================================================================

/// Forecasting strategy family
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StrategyType {
    /// Hour-of-day / day-of-week decomposition with a linear trend
    #[default]
    Seasonal,
    /// Direct multi-step gradient-boosted trees
    GradientBoosting,
    /// Lightweight LSTM-style recurrent approximator
    Recurrent,
}

impl StrategyType {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Seasonal => "Seasonal Decomposition",
            Self::GradientBoosting => "Gradient Boosting (Direct Multi-Step)",
            Self::Recurrent => "Recurrent Approximator",
        }
    }

    /// Minimum number of hourly points needed to train this strategy
    pub fn min_points(&self, lookback: usize) -> usize {
        match self {
            Self::Seasonal => 50,
            Self::GradientBoosting | Self::Recurrent => lookback + 10,
        }
    }

    /// Multi-step families report `r2 * 100`; the seasonal family is floored at 75
    pub fn is_sequence_based(&self) -> bool {
        !matches!(self, Self::Seasonal)
    }

    /// Case-insensitive lookup by snake_case name
    pub fn parse_name(name: &str) -> Result<Self> {
        name.trim()
            .parse()
            .map_err(|_: strum::ParseError| ForecastError::UnknownStrategyType(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_target_round_trip_names() {
        for target in Target::iter() {
            let name = target.to_string();
            assert_eq!(name.parse::<Target>().unwrap(), target);
        }
        assert_eq!(Target::UvIndex.to_string(), "uv_index");
        assert_eq!(Target::WindSpeed.to_string(), "wind_speed");
    }

    #[test]
    fn test_target_origins() {
        assert!(Target::SENSOR
            .iter()
            .all(|t| t.origin() == TargetOrigin::Sensor));
        assert!(Target::WEATHER
            .iter()
            .all(|t| t.origin() == TargetOrigin::WeatherApi));
    }

    #[test]
    fn test_rainfall_is_summed() {
        assert_eq!(Target::Rainfall.aggregation(), Aggregation::Sum);
        assert_eq!(Target::Humidity.aggregation(), Aggregation::Mean);
    }

    #[test]
    fn test_clamp_to_physical_range() {
        assert_eq!(Target::Humidity.clip_to_range(130.0), 100.0);
        assert_eq!(Target::Pressure.clip_to_range(900.0), 950.0);
        assert_eq!(Target::Temperature.clip_to_range(25.0), 25.0);
    }

    #[test]
    fn test_strategy_type_parsing() {
        assert_eq!(
            StrategyType::parse_name("gradient_boosting").unwrap(),
            StrategyType::GradientBoosting
        );
        assert_eq!(StrategyType::parse_name(" Seasonal ").unwrap(), StrategyType::Seasonal);
        assert!(matches!(
            StrategyType::parse_name("prophet_v2"),
            Err(ForecastError::UnknownStrategyType(name)) if name == "prophet_v2"
        ));
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(Target::parse_name("uv_index").unwrap(), Target::UvIndex);
        assert!(matches!(
            Target::parse_name("pollen"),
            Err(ForecastError::UnknownTarget(name)) if name == "pollen"
        ));
        // by-value receivers must hit the range clip, not Ord::clamp
        let target = Target::Humidity;
        assert_eq!(target.clip_to_range(-3.0), 0.0);
    }

    #[test]
    fn test_min_points() {
        assert_eq!(StrategyType::Seasonal.min_points(24), 50);
        assert_eq!(StrategyType::GradientBoosting.min_points(24), 34);
        assert_eq!(StrategyType::Recurrent.min_points(24), 34);
    }
}
