//! ML Model Implementations
//!
//! - Seasonal decomposition with a ridge trend
//! - Direct multi-step gradient boosting over smartcore regression trees
//! - Recurrent approximator (single LSTM cell, output-layer training)
//! - Trend extrapolation used when nothing is trained

pub mod gradient_boosting;
pub mod recurrent;
pub mod seasonal;
pub mod trend;

pub use gradient_boosting::{BoostedTrees, GradientBoostingModel, GradientBoostingParams};
pub use recurrent::{LstmCell, RecurrentModel, RecurrentParams};
pub use seasonal::{SeasonalModel, SeasonalParams};
pub use trend::TrendExtrapolator;
