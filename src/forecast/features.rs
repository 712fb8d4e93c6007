//! Feature engineering for the sequence strategies
//!
//! A sample is built from a lookback window of scaled values: the lagged
//! values themselves, rolling mean/std over the most recent 3, 6 and 12
//! values, and the window min/max.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Rolling windows summarised by mean and standard deviation
pub const ROLLING_WINDOWS: [usize; 3] = [3, 6, 12];

/// Number of features derived from a window of `lookback` values
pub fn feature_count(lookback: usize) -> usize {
    lookback + ROLLING_WINDOWS.len() * 2 + 2
}

/// Feature vector for one lookback window, oldest value first.
///
/// Lag 1 is the newest value of the window.
pub fn window_features(window: &[f64]) -> Vec<f64> {
    let mut features = Vec::with_capacity(feature_count(window.len()));
    features.extend(window.iter().rev());

    for size in ROLLING_WINDOWS {
        let tail = &window[window.len().saturating_sub(size)..];
        if tail.is_empty() {
            features.extend([0.0, 0.0]);
            continue;
        }
        features.push(tail.iter().mean());
        features.push(if tail.len() > 1 {
            tail.iter().population_std_dev()
        } else {
            0.0
        });
    }

    features.push(window.iter().copied().fold(f64::INFINITY, f64::min));
    features.push(window.iter().copied().fold(f64::NEG_INFINITY, f64::max));
    features
}

/// Supervised samples for one horizon step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisedSet {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl SupervisedSet {
    /// Direct multi-step samples: the window ends `step` values before the label.
    pub fn build(series: &[f64], lookback: usize, step: usize) -> Self {
        let mut set = Self::default();
        if step == 0 || series.len() < lookback + step {
            return set;
        }

        for i in (lookback + step)..=series.len() {
            let end = i - step;
            let window = &series[end - lookback..end];
            set.features.push(window_features(window));
            set.targets.push(series[i - 1]);
        }
        set
    }

    /// Raw windows (no derived features) paired with the next value
    pub fn windows(series: &[f64], lookback: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        if series.len() <= lookback {
            return (Vec::new(), Vec::new());
        }
        (lookback..series.len())
            .map(|i| (series[i - lookback..i].to_vec(), series[i]))
            .unzip()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Chronological split, no shuffling
    pub fn split(&self, train_ratio: f64) -> (Self, Self) {
        let split_idx = (self.len() as f64 * train_ratio.clamp(0.0, 1.0)).floor() as usize;
        let train = Self {
            features: self.features[..split_idx].to_vec(),
            targets: self.targets[..split_idx].to_vec(),
        };
        let val = Self {
            features: self.features[split_idx..].to_vec(),
            targets: self.targets[split_idx..].to_vec(),
        };
        (train, val)
    }
}

/// Last `lookback` values of `recent`, edge-padded at the front when shorter
pub fn pad_window(recent: &[f64], lookback: usize) -> Vec<f64> {
    let tail = &recent[recent.len().saturating_sub(lookback)..];
    let Some(first) = tail.first() else {
        return vec![0.0; lookback];
    };
    let mut window = vec![*first; lookback - tail.len()];
    window.extend_from_slice(tail);
    window
}
