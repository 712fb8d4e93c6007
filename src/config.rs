use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::controller::scheduler::SchedulerSettings;
use crate::ml::registry::DEFAULT_HISTORY_LIMIT;
use crate::ml::{
    GradientBoostingParams, ModelSettings, RecurrentParams, SeasonalParams, TrainingSettings,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "SF__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub training: TrainingSettings,
    pub seasonal: SeasonalParams,
    pub gradient_boosting: GradientBoostingParams,
    pub recurrent: RecurrentParams,
    pub scheduler: SchedulerSettings,
    pub sources: SourcesConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub history_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// JSON record files read by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub sensor_path: PathBuf,
    pub weather_path: Option<PathBuf>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sensor_path: PathBuf::from("data/sensor_readings.json"),
            weather_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Rows fetched per origin for a manual training request
    pub default_data_points: usize,
    /// Rows fetched per origin to build the prediction context
    pub context_points: usize,
    pub max_hours_ahead: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_data_points: 10_000,
            context_points: 500,
            max_hours_ahead: 168,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Defaults, then the toml file if present, then `SF__SECTION__KEY` overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let ratio = self.training.train_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            anyhow::bail!("training.train_ratio must be in (0, 1), got {ratio}");
        }
        if self.storage.history_limit == 0 {
            anyhow::bail!("storage.history_limit must be positive");
        }
        if self.gradient_boosting.horizons.is_empty() {
            anyhow::bail!("gradient_boosting.horizons must not be empty");
        }
        if self.service.max_hours_ahead == 0 {
            anyhow::bail!("service.max_hours_ahead must be positive");
        }
        Ok(())
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            seasonal: self.seasonal.clone(),
            gradient_boosting: self.gradient_boosting.clone(),
            recurrent: self.recurrent.clone(),
        }
    }
}
