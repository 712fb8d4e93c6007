//! Weather condition classification
//!
//! Derives a discrete sky/rain label from predicted humidity, rainfall and
//! UV index plus the local time of day. Daylight hours follow a seasonal
//! table keyed by month group.

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

use crate::domain::{ConditionAssessment, WeatherCondition};

/// Sunrise and sunset as minutes after local midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaylightWindow {
    pub sunrise: u32,
    pub sunset: u32,
}

impl DaylightWindow {
    pub fn for_month(month: u32) -> Self {
        let (sunrise, sunset) = match month {
            3..=5 => ((5, 38), (18, 8)),
            6..=8 => ((5, 23), (18, 23)),
            9..=11 => ((5, 50), (17, 38)),
            _ => ((6, 20), (17, 23)),
        };
        Self {
            sunrise: sunrise.0 * 60 + sunrise.1,
            sunset: sunset.0 * 60 + sunset.1,
        }
    }

    /// Bright-sky part of the day, both ends inclusive
    pub fn is_daytime(&self, minute_of_day: u32) -> bool {
        minute_of_day >= self.sunrise + 90 && minute_of_day <= self.sunset.saturating_sub(30)
    }

    pub fn period(&self, minute_of_day: u32) -> TimePeriod {
        let m = minute_of_day;
        if m < self.sunrise.saturating_sub(30) {
            TimePeriod::Night
        } else if m < self.sunrise + 60 {
            TimePeriod::Dawn
        } else if m < 12 * 60 {
            TimePeriod::Morning
        } else if m < 14 * 60 {
            TimePeriod::Noon
        } else if m < self.sunset.saturating_sub(30) {
            TimePeriod::Afternoon
        } else if m < self.sunset + 60 {
            TimePeriod::Dusk
        } else {
            TimePeriod::Night
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    Night,
    Dawn,
    Morning,
    Noon,
    Afternoon,
    Dusk,
}

fn minute_of_day(ts: &DateTime<FixedOffset>) -> u32 {
    ts.hour() * 60 + ts.minute()
}

/// Time-of-day period of a local timestamp
pub fn time_period(ts: &DateTime<FixedOffset>) -> TimePeriod {
    DaylightWindow::for_month(ts.month()).period(minute_of_day(ts))
}

/// Classify one forecast step. First matching rule wins.
pub fn classify(
    humidity: f64,
    rainfall: f64,
    uv_index: f64,
    timestamp: &DateTime<FixedOffset>,
) -> ConditionAssessment {
    let daylight = DaylightWindow::for_month(timestamp.month());
    let minute = minute_of_day(timestamp);

    let condition = if rainfall > 0.5 {
        if rainfall > 2.0 {
            WeatherCondition::Rain
        } else {
            WeatherCondition::LightRain
        }
    } else if daylight.is_daytime(minute) {
        if uv_index >= 6.0 {
            WeatherCondition::Sunny
        } else if uv_index >= 3.0 {
            WeatherCondition::SunnyLight
        } else if uv_index >= 1.0 {
            if humidity > 90.0 && rainfall > 0.0 {
                WeatherCondition::MayRain
            } else {
                WeatherCondition::ManyClouds
            }
        } else {
            WeatherCondition::Overcast
        }
    } else if rainfall > 0.0 {
        WeatherCondition::NightRain
    } else if humidity > 90.0 {
        WeatherCondition::Fog
    } else {
        match daylight.period(minute) {
            TimePeriod::Dawn => WeatherCondition::EarlyMorning,
            TimePeriod::Dusk => WeatherCondition::Evening,
            _ => WeatherCondition::ClearNight,
        }
    };

    ConditionAssessment {
        will_rain: condition.will_rain(),
        condition,
        icon: condition.icon(),
    }
}
