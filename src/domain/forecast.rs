use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{StrategyType, Target};

/// Discrete sky/rain condition derived from a forecast step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WeatherCondition {
    Rain,
    LightRain,
    Sunny,
    SunnyLight,
    ManyClouds,
    MayRain,
    Overcast,
    NightRain,
    Fog,
    EarlyMorning,
    Evening,
    ClearNight,
}

impl WeatherCondition {
    /// Stable key used by front-ends for localisation
    pub fn key(&self) -> &'static str {
        match self {
            Self::Rain => "rain",
            Self::LightRain => "lightRain",
            Self::Sunny => "sunny",
            Self::SunnyLight => "sunnyLight",
            Self::ManyClouds => "manyClouds",
            Self::MayRain => "mayRain",
            Self::Overcast => "overcast",
            Self::NightRain => "nightRain",
            Self::Fog => "fog",
            Self::EarlyMorning => "earlyMorning",
            Self::Evening => "evening",
            Self::ClearNight => "clearNight",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rain => "Rain",
            Self::LightRain => "Light rain",
            Self::Sunny => "Sunny",
            Self::SunnyLight => "Lightly sunny",
            Self::ManyClouds => "Cloudy",
            Self::MayRain => "Possible rain",
            Self::Overcast => "Heavily cloudy",
            Self::NightRain => "Night rain",
            Self::Fog => "Fog",
            Self::EarlyMorning => "Early morning",
            Self::Evening => "Evening",
            Self::ClearNight => "Clear night",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Rain | Self::LightRain | Self::NightRain => "🌧️",
            Self::Sunny => "☀️",
            Self::SunnyLight => "🌤️",
            Self::ManyClouds | Self::Overcast => "☁️",
            Self::MayRain => "🌦️",
            Self::Fog => "🌫️",
            Self::EarlyMorning => "🌅",
            Self::Evening => "🌆",
            Self::ClearNight => "🌙",
        }
    }

    pub fn will_rain(&self) -> bool {
        matches!(
            self,
            Self::Rain | Self::LightRain | Self::MayRain | Self::NightRain
        )
    }
}

/// Classifier output for one forecast step
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionAssessment {
    pub will_rain: bool,
    pub condition: WeatherCondition,
    pub icon: &'static str,
}

/// One hourly step of a merged multi-target forecast
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub values: BTreeMap<Target, f64>,
    pub will_rain: bool,
    pub condition: WeatherCondition,
    pub condition_label: &'static str,
    pub condition_icon: &'static str,
    /// Percent, decays with distance from the forecast origin
    pub confidence: f64,
}

impl ForecastPoint {
    pub fn value(&self, target: Target) -> Option<f64> {
        self.values.get(&target).copied()
    }
}

/// Inputs that anchor a forecast in time and fill untrained targets
#[derive(Debug, Clone)]
pub struct PredictionContext {
    /// First step is `origin + 1h`
    pub origin: DateTime<FixedOffset>,
    /// Latest observed value per target
    pub latest: BTreeMap<Target, f64>,
    /// Optional recent raw observations per target, oldest first
    pub recent: BTreeMap<Target, Vec<f64>>,
}

impl PredictionContext {
    pub fn new(origin: DateTime<FixedOffset>) -> Self {
        Self {
            origin,
            latest: BTreeMap::new(),
            recent: BTreeMap::new(),
        }
    }

    pub fn with_latest(mut self, target: Target, value: f64) -> Self {
        self.latest.insert(target, value);
        self
    }

    pub fn with_recent(mut self, target: Target, values: Vec<f64>) -> Self {
        if let Some(last) = values.last() {
            self.latest.entry(target).or_insert(*last);
        }
        self.recent.insert(target, values);
        self
    }
}

/// Merged forecast returned by the registry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub strategy_type: StrategyType,
    pub generated_at: DateTime<FixedOffset>,
    pub points: Vec<ForecastPoint>,
    /// Targets served by a trained model
    pub models_used: Vec<Target>,
    /// True when no trained model was available and trend extrapolation was used
    pub fallback: bool,
}

impl Forecast {
    /// Share of steps flagged as rainy, in percent
    pub fn rain_probability(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let rainy = self.points.iter().filter(|p| p.will_rain).count();
        rainy as f64 / self.points.len() as f64 * 100.0
    }

    pub fn average(&self, target: Target) -> Option<f64> {
        let values: Vec<f64> = self.points.iter().filter_map(|p| p.value(target)).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}
