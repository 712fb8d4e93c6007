//! Auto-training scheduler
//!
//! A single tokio task polls the persisted [`AutoTrainConfig`] and triggers
//! the training protocol at the configured local hour once `interval_days`
//! whole days have passed since the last successful run. Triggers are
//! debounced on `(date, hour)` so one hour never trains twice.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Local, NaiveDate, Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{Observation, StrategyType, Target, TargetOrigin};
use crate::error::{ForecastError, Result};
use crate::ml::training::{Trainer, TrainingReport, TrainingRequest};
use crate::repo::store::AUTO_TRAIN_CONFIG_FILE;
use crate::repo::{ModelStore, RecordSource};

/// Persisted auto-training configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoTrainConfig {
    pub enabled: bool,
    pub interval_days: u32,
    /// Local hour (0-23) at which runs may start
    pub hour_of_day: u32,
    pub strategy_type: StrategyType,
    /// Maximum rows fetched per record origin
    pub data_point_budget: usize,
    /// Sensor and weather targets; weather rows are fetched only when a weather target is listed
    pub targets: Vec<Target>,
    pub last_run_at: Option<DateTime<FixedOffset>>,
    /// Informational only, recomputed after each change
    pub next_run_at: Option<DateTime<FixedOffset>>,
}

impl Default for AutoTrainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_days: 7,
            hour_of_day: 2,
            strategy_type: StrategyType::Seasonal,
            data_point_budget: 10_000,
            targets: Target::SENSOR.to_vec(),
            last_run_at: None,
            next_run_at: None,
        }
    }
}

impl AutoTrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_days == 0 {
            return Err(ForecastError::InvalidConfig(
                "interval_days must be at least 1".into(),
            ));
        }
        if self.hour_of_day > 23 {
            return Err(ForecastError::InvalidConfig(format!(
                "hour_of_day must be 0-23, got {}",
                self.hour_of_day
            )));
        }
        if self.data_point_budget == 0 {
            return Err(ForecastError::InvalidConfig(
                "data_point_budget must be positive".into(),
            ));
        }
        if self.targets.is_empty() {
            return Err(ForecastError::InvalidConfig("no targets configured".into()));
        }
        Ok(())
    }

    pub fn targets_of(&self, origin: TargetOrigin) -> Vec<Target> {
        self.targets
            .iter()
            .copied()
            .filter(|t| t.origin() == origin)
            .collect()
    }
}

/// Whether a run is due at `now` (local time)
pub fn should_train(config: &AutoTrainConfig, now: DateTime<FixedOffset>) -> bool {
    if !config.enabled || now.hour() != config.hour_of_day {
        return false;
    }
    match config.last_run_at {
        None => true,
        Some(last) => (now - last).num_days() >= i64::from(config.interval_days),
    }
}

/// Earliest instant at or after `now` where [`should_train`] can hold
pub fn next_run_at(config: &AutoTrainConfig, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    if !config.enabled {
        return None;
    }
    let earliest = config
        .last_run_at
        .map(|last| last + ChronoDuration::days(i64::from(config.interval_days)))
        .unwrap_or(now);
    let base = earliest.max(now);

    let slot = base
        .date_naive()
        .and_hms_opt(config.hour_of_day, 0, 0)?
        .and_local_timezone(*base.offset())
        .single()?;

    if base < slot {
        Some(slot)
    } else if base < slot + ChronoDuration::hours(1) {
        Some(base)
    } else {
        Some(slot + ChronoDuration::days(1))
    }
}

/// Scheduler settings from configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub poll_interval_secs: u64,
    /// Minimum rows a run needs
    pub min_records: usize,
    pub stop_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            min_records: 100,
            stop_timeout_secs: 5,
        }
    }
}

/// Task status tracking
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStatus {
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AutoTrainScheduler {
    trainer: Arc<Trainer>,
    source: Arc<dyn RecordSource>,
    store: Arc<ModelStore>,
    settings: SchedulerSettings,
    status: RwLock<TaskStatus>,
    last_triggered: Mutex<Option<(NaiveDate, u32)>>,
    /// Serializes read-modify-write cycles on the persisted config
    config_lock: Mutex<()>,
    run_lock: tokio::sync::Mutex<()>,
    worker: Mutex<Option<Worker>>,
}

impl AutoTrainScheduler {
    pub fn new(
        trainer: Arc<Trainer>,
        source: Arc<dyn RecordSource>,
        store: Arc<ModelStore>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            trainer,
            source,
            store,
            settings,
            status: RwLock::new(TaskStatus::default()),
            last_triggered: Mutex::new(None),
            config_lock: Mutex::new(()),
            run_lock: tokio::sync::Mutex::new(()),
            worker: Mutex::new(None),
        }
    }

    /// Current persisted configuration, defaults when none was saved
    pub fn config(&self) -> Result<AutoTrainConfig> {
        Ok(self
            .store
            .load_json(AUTO_TRAIN_CONFIG_FILE)?
            .unwrap_or_default())
    }

    /// Replace the editable fields; `last_run_at` stays owned by the scheduler
    pub fn update_config(&self, mut config: AutoTrainConfig) -> Result<AutoTrainConfig> {
        config.validate()?;
        {
            let _guard = self.config_lock.lock();
            config.last_run_at = self.config()?.last_run_at;
            config.next_run_at = next_run_at(&config, Local::now().fixed_offset());
            self.store.save_json(AUTO_TRAIN_CONFIG_FILE, &config)?;
        }
        info!(
            enabled = config.enabled,
            interval_days = config.interval_days,
            hour = config.hour_of_day,
            strategy = %config.strategy_type,
            "auto-train config updated"
        );
        Ok(config)
    }

    pub fn status(&self) -> TaskStatus {
        let mut status = self.status.read().clone();
        status.running = self.is_running();
        status
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the polling task; returns false when it is already running
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock();
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                return false;
            }
        }

        let token = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let child = token.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop(child).await });
        *worker = Some(Worker { token, handle });
        info!(
            poll_secs = self.settings.poll_interval_secs,
            "auto-train scheduler started"
        );
        true
    }

    /// Cancel and join the polling task; returns false when it was not running
    pub async fn stop(&self) -> bool {
        let Some(Worker { token, mut handle }) = self.worker.lock().take() else {
            return false;
        };
        token.cancel();

        let limit = Duration::from_secs(self.settings.stop_timeout_secs);
        if timeout(limit, &mut handle).await.is_err() {
            warn!(timeout_secs = self.settings.stop_timeout_secs, "scheduler did not stop in time, aborting");
            handle.abort();
        }
        true
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let poll = Duration::from_secs(self.settings.poll_interval_secs.max(1));
        loop {
            if token.is_cancelled() {
                break;
            }
            // a started run is finished before cancellation is observed
            match self.check_and_run_at(Local::now().fixed_offset()).await {
                Ok(Some(report)) => info!(
                    success = report.success,
                    overall_accuracy = report.overall_accuracy,
                    "scheduled training finished"
                ),
                Ok(None) => {}
                Err(e) => error!(error = %e, "scheduled training check failed"),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(poll) => {}
            }
        }
        info!("auto-train scheduler stopped");
    }

    /// One scheduler tick at `now`; `None` when no run was due
    pub async fn check_and_run_at(&self, now: DateTime<FixedOffset>) -> Result<Option<TrainingReport>> {
        let config = self.config()?;
        if !should_train(&config, now) {
            return Ok(None);
        }

        let slot = (now.date_naive(), now.hour());
        {
            let mut last = self.last_triggered.lock();
            if *last == Some(slot) {
                return Ok(None);
            }
            *last = Some(slot);
        }

        info!(strategy = %config.strategy_type, "auto-train run due");
        self.run(config, now).await.map(Some)
    }

    /// Manual trigger: same pipeline without the time gate
    pub async fn run_now(&self) -> Result<TrainingReport> {
        let config = self.config()?;
        self.run(config, Local::now().fixed_offset()).await
    }

    async fn run(&self, config: AutoTrainConfig, now: DateTime<FixedOffset>) -> Result<TrainingReport> {
        let _running = self.run_lock.lock().await;
        {
            let mut status = self.status.write();
            status.last_run = Some(Utc::now());
            status.run_count += 1;
        }

        let result = self.execute(config, now).await;

        let mut status = self.status.write();
        match &result {
            Ok(report) if report.success => {
                status.last_success = Some(Utc::now());
                status.success_count += 1;
                status.last_error = None;
            }
            Ok(report) => {
                status.error_count += 1;
                status.last_error = Some(report.message.clone());
            }
            Err(e) => {
                status.error_count += 1;
                status.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn execute(&self, mut config: AutoTrainConfig, now: DateTime<FixedOffset>) -> Result<TrainingReport> {
        let sensor_targets = config.targets_of(TargetOrigin::Sensor);
        let weather_targets = config.targets_of(TargetOrigin::WeatherApi);

        let sensor: Vec<Observation> = if sensor_targets.is_empty() {
            Vec::new()
        } else {
            self.source
                .fetch_recent(TargetOrigin::Sensor, config.data_point_budget)
                .await?
        };
        let weather: Option<Vec<Observation>> = if weather_targets.is_empty() {
            None
        } else {
            Some(
                self.source
                    .fetch_recent(TargetOrigin::WeatherApi, config.data_point_budget)
                    .await?,
            )
        };

        let available = if sensor_targets.is_empty() {
            weather.as_ref().map_or(0, Vec::len)
        } else {
            sensor.len()
        };
        if available < self.settings.min_records {
            warn!(available, required = self.settings.min_records, "not enough records for auto-train");
            return Err(ForecastError::NotEnoughRecords {
                available,
                required: self.settings.min_records,
            });
        }

        let trainer = Arc::clone(&self.trainer);
        let strategy = config.strategy_type;
        let report = tokio::task::spawn_blocking(move || {
            trainer.train_selected_targets(TrainingRequest {
                strategy,
                sensor_records: &sensor,
                targets: &sensor_targets,
                weather_records: weather.as_deref(),
                weather_targets: &weather_targets,
            })
        })
        .await
        .map_err(|e| ForecastError::Model(format!("training task failed: {e}")))?;

        if report.success {
            // keep edits made while training was running
            {
                let _guard = self.config_lock.lock();
                let mut latest = self.config().unwrap_or_else(|_| config.clone());
                latest.last_run_at = Some(now);
                latest.next_run_at = next_run_at(&latest, now + ChronoDuration::hours(1));
                self.store.save_json(AUTO_TRAIN_CONFIG_FILE, &latest)?;
                config = latest;
            }
            info!(
                next_run_at = ?config.next_run_at,
                "auto-train config advanced"
            );
        }
        Ok(report)
    }
}
