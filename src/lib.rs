pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod ml;
pub mod repo;
pub mod telemetry;

pub use controller::ForecastService;
pub use error::{ForecastError, Result};
