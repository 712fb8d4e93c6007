use anyhow::Result;
use sensor_forecaster::{config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::load()?;
    info!(
        data_dir = %cfg.storage.data_dir.display(),
        sensor_path = %cfg.sources.sensor_path.display(),
        "starting Sensor Forecaster"
    );

    let service = controller::ForecastService::from_config(&cfg)?;

    let auto_train = service.auto_train_config()?;
    if !auto_train.enabled {
        warn!("auto-training is disabled, models are only retrained on request");
    }
    info!(
        enabled = auto_train.enabled,
        interval_days = auto_train.interval_days,
        hour = auto_train.hour_of_day,
        next_run_at = ?auto_train.next_run_at,
        "auto-train schedule"
    );
    service.start_scheduler();

    telemetry::shutdown_signal().await;

    service.stop_scheduler().await;
    warn!("shutdown complete");
    Ok(())
}
