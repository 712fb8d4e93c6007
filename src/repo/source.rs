//! Record sources: the boundary to whatever stores raw readings

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{Observation, TargetOrigin};
use crate::error::{ForecastError, Result};

/// Supplies recent raw observations, oldest first
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Up to `limit` most recent rows of the given origin
    async fn fetch_recent(&self, origin: TargetOrigin, limit: usize) -> Result<Vec<Observation>>;
}

fn newest(mut rows: Vec<Observation>, limit: usize) -> Vec<Observation> {
    rows.sort_by_key(|r| r.timestamp);
    let skip = rows.len().saturating_sub(limit);
    rows.split_off(skip)
}

/// In-process source for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryRecordSource {
    sensor: RwLock<Vec<Observation>>,
    weather: RwLock<Vec<Observation>>,
}

impl InMemoryRecordSource {
    pub fn new(sensor: Vec<Observation>, weather: Vec<Observation>) -> Self {
        Self {
            sensor: RwLock::new(sensor),
            weather: RwLock::new(weather),
        }
    }

    pub fn push(&self, origin: TargetOrigin, rows: impl IntoIterator<Item = Observation>) {
        match origin {
            TargetOrigin::Sensor => self.sensor.write().extend(rows),
            TargetOrigin::WeatherApi => self.weather.write().extend(rows),
        }
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn fetch_recent(&self, origin: TargetOrigin, limit: usize) -> Result<Vec<Observation>> {
        let rows = match origin {
            TargetOrigin::Sensor => self.sensor.read().clone(),
            TargetOrigin::WeatherApi => self.weather.read().clone(),
        };
        Ok(newest(rows, limit))
    }
}

/// Reads JSON arrays of observations from disk on every fetch
#[derive(Debug, Clone)]
pub struct JsonFileRecordSource {
    sensor_path: PathBuf,
    weather_path: Option<PathBuf>,
}

impl JsonFileRecordSource {
    pub fn new(sensor_path: impl Into<PathBuf>, weather_path: Option<PathBuf>) -> Self {
        Self {
            sensor_path: sensor_path.into(),
            weather_path,
        }
    }
}

#[async_trait]
impl RecordSource for JsonFileRecordSource {
    async fn fetch_recent(&self, origin: TargetOrigin, limit: usize) -> Result<Vec<Observation>> {
        let path = match origin {
            TargetOrigin::Sensor => &self.sensor_path,
            TargetOrigin::WeatherApi => match &self.weather_path {
                Some(path) => path,
                None => return Ok(Vec::new()),
            },
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "record file not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(ForecastError::persistence(path, e)),
        };
        let rows: Vec<Observation> =
            serde_json::from_slice(&bytes).map_err(|e| ForecastError::persistence(path, e))?;
        Ok(newest(rows, limit))
    }
}
