//! Forecast pipeline building blocks shared by all strategies

pub mod features;
pub mod metrics;
pub mod preparation;
pub mod weather;

pub use metrics::{EvaluationMode, TrainingMetrics};
pub use preparation::{DataPreparer, MinMaxScaler, PreparedSeries};
pub use weather::classify;
