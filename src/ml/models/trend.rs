//! Trend extrapolation used when no strategy is trained

use serde::{Deserialize, Serialize};

use crate::domain::Target;
use crate::forecast::preparation::SIMPLE_MIN_POINTS;

/// Damped linear extrapolation from the most recent observations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrendExtrapolator {
    pub target: Target,
    pub last: f64,
    /// Units per hour
    pub slope: f64,
}

impl TrendExtrapolator {
    /// Observations considered for the slope
    pub const WINDOW: usize = SIMPLE_MIN_POINTS;

    /// `recent` is oldest first; `None` when it is empty.
    ///
    /// Shorter histories than [`SIMPLE_MIN_POINTS`] give a flat line from the newest value.
    pub fn fit(target: Target, recent: &[f64]) -> Option<Self> {
        let tail = &recent[recent.len().saturating_sub(Self::WINDOW)..];
        let last = *tail.last()?;
        let n = tail.len() as f64;

        let slope = if tail.len() < SIMPLE_MIN_POINTS {
            0.0
        } else {
            let mean_x = (n - 1.0) / 2.0;
            let mean_y = tail.iter().sum::<f64>() / n;
            let (num, den) = tail
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(num, den), (i, y)| {
                    let dx = i as f64 - mean_x;
                    (num + dx * (y - mean_y), den + dx * dx)
                });
            num / den
        };

        Some(Self {
            target,
            last,
            slope,
        })
    }

    /// Flat line from a single value
    pub fn flat(target: Target, value: f64) -> Self {
        Self {
            target,
            last: value,
            slope: 0.0,
        }
    }

    /// Value `hour` hours after the last observation, halving the slope per day
    pub fn value_at(&self, hour: usize) -> f64 {
        let h = hour as f64;
        let damping = 0.5f64.powf(h / 24.0);
        self.target.clip_to_range(self.last + self.slope * h * damping)
    }

    pub fn predict(&self, hours_ahead: usize) -> Vec<f64> {
        (1..=hours_ahead).map(|h| self.value_at(h)).collect()
    }
}
