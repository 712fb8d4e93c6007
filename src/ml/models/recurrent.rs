//! Recurrent approximator
//!
//! A single LSTM cell (forget/input/candidate/output gates) over raw scalar
//! windows. Gate weights stay at their seeded random initialisation; only the
//! output projection `W_y`, `b_y` is trained, with plain SGD on the squared
//! error. There is no backpropagation through time.

use chrono::{DateTime, FixedOffset};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::domain::StrategyType;
use crate::error::{ForecastError, Result};
use crate::forecast::features::SupervisedSet;
use crate::forecast::PreparedSeries;
use crate::ml::{Backtest, FitReport, ForecastStrategy, StrategyInfo};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecurrentParams {
    pub lookback: usize,
    pub hidden_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Standard deviation of the initial weights
    pub init_std: f64,
    pub seed: u64,
}

impl Default for RecurrentParams {
    fn default() -> Self {
        Self {
            lookback: 24,
            hidden_size: 32,
            epochs: 30,
            learning_rate: 0.01,
            init_std: 0.1,
            seed: 42,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// LSTM cell with a scalar input and a linear scalar read-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmCell {
    w_f: Array2<f64>,
    w_i: Array2<f64>,
    w_c: Array2<f64>,
    w_o: Array2<f64>,
    b_f: Array1<f64>,
    b_i: Array1<f64>,
    b_c: Array1<f64>,
    b_o: Array1<f64>,
    w_y: Array1<f64>,
    b_y: f64,
}

impl LstmCell {
    pub fn new(hidden_size: usize, init_std: f64, rng: &mut StdRng) -> Result<Self> {
        let normal = Normal::new(0.0, init_std)
            .map_err(|e| ForecastError::Model(format!("invalid weight distribution: {e}")))?;
        let mut gate = || Array2::from_shape_fn((hidden_size, hidden_size + 1), |_| normal.sample(rng));

        let w_f = gate();
        let w_i = gate();
        let w_c = gate();
        let w_o = gate();
        let w_y = Array1::from_shape_fn(hidden_size, |_| normal.sample(rng));

        Ok(Self {
            w_f,
            w_i,
            w_c,
            w_o,
            b_f: Array1::zeros(hidden_size),
            b_i: Array1::zeros(hidden_size),
            b_c: Array1::zeros(hidden_size),
            b_o: Array1::zeros(hidden_size),
            w_y,
            b_y: 0.0,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.b_f.len()
    }

    /// Final hidden state after consuming `window`; state starts at zero
    pub fn encode(&self, window: &[f64]) -> Array1<f64> {
        let n = self.hidden_size();
        let mut h = Array1::<f64>::zeros(n);
        let mut c = Array1::<f64>::zeros(n);

        for &x in window {
            let z = concatenate![Axis(0), h, Array1::from_elem(1, x)];
            let f = (self.w_f.dot(&z) + &self.b_f).mapv(sigmoid);
            let i = (self.w_i.dot(&z) + &self.b_i).mapv(sigmoid);
            let candidate = (self.w_c.dot(&z) + &self.b_c).mapv(f64::tanh);
            let o = (self.w_o.dot(&z) + &self.b_o).mapv(sigmoid);
            c = &f * &c + &i * &candidate;
            h = &o * &c.mapv(f64::tanh);
        }
        h
    }

    fn read_out(&self, hidden: &Array1<f64>) -> f64 {
        self.w_y.dot(hidden) + self.b_y
    }

    pub fn forward(&self, window: &[f64]) -> f64 {
        self.read_out(&self.encode(window))
    }

    /// One SGD step of `0.5 * (y - target)^2` on the read-out; returns the squared error
    fn step(&mut self, hidden: &Array1<f64>, target: f64, learning_rate: f64) -> f64 {
        let error = self.read_out(hidden) - target;
        self.w_y.scaled_add(-learning_rate * error, hidden);
        self.b_y -= learning_rate * error;
        error * error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrentModel {
    params: RecurrentParams,
    cell: Option<LstmCell>,
    last_window: Vec<f64>,
}

impl RecurrentModel {
    pub fn new(params: RecurrentParams) -> Self {
        Self {
            params,
            cell: None,
            last_window: Vec::new(),
        }
    }

    pub fn params(&self) -> &RecurrentParams {
        &self.params
    }

    fn cell(&self) -> Result<&LstmCell> {
        self.cell
            .as_ref()
            .ok_or_else(|| ForecastError::Model("recurrent model is not fitted".into()))
    }
}

impl ForecastStrategy for RecurrentModel {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Recurrent
    }

    fn fit(&mut self, series: &PreparedSeries) -> Result<FitReport> {
        let lookback = self.params.lookback;
        let required = lookback + 10;
        if series.len() < required {
            return Err(ForecastError::InsufficientData {
                target: series.target,
                available: series.len(),
                required,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut cell = LstmCell::new(self.params.hidden_size, self.params.init_std, &mut rng)?;

        let (windows, targets) = SupervisedSet::windows(&series.scaled, lookback);
        // gate weights are frozen, so each window's hidden state is fixed across epochs
        let hidden: Vec<Array1<f64>> = windows.iter().map(|w| cell.encode(w)).collect();

        let mut loss = 0.0;
        for epoch in 0..self.params.epochs {
            let total: f64 = hidden
                .iter()
                .zip(&targets)
                .map(|(h, t)| cell.step(h, *t, self.params.learning_rate))
                .sum();
            loss = total / targets.len() as f64;
            if epoch % 10 == 0 {
                debug!(target = %series.target, epoch, loss, "recurrent epoch");
            }
        }

        self.cell = Some(cell);
        self.last_window = series.scaled[series.len() - lookback..].to_vec();

        Ok(FitReport {
            samples: targets.len(),
            lookback: Some(lookback),
            horizons: Vec::new(),
            final_loss: Some(loss),
        })
    }

    fn backtest(&self, series: &PreparedSeries, start: usize) -> Result<Backtest> {
        let cell = self.cell()?;
        let lookback = self.params.lookback;
        let first_index = start.max(lookback).min(series.len());
        Ok(Backtest {
            first_index,
            predictions: (first_index..series.len())
                .map(|i| cell.forward(&series.scaled[i - lookback..i]))
                .collect(),
        })
    }

    fn predict_multi_step(
        &self,
        _origin: DateTime<FixedOffset>,
        hours_ahead: usize,
        window: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        let cell = self.cell()?;
        let mut window: Vec<f64> = match window {
            Some(w) => w.to_vec(),
            None => self.last_window.clone(),
        };
        if window.len() != self.params.lookback {
            return Err(ForecastError::Model(format!(
                "rollout window has {} values, expected {}",
                window.len(),
                self.params.lookback
            )));
        }

        let mut out = Vec::with_capacity(hours_ahead);
        for _ in 0..hours_ahead {
            let value = cell.forward(&window);
            out.push(value);
            window.remove(0);
            window.push(value);
        }
        Ok(out)
    }

    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            strategy_type: StrategyType::Recurrent,
            name: StrategyType::Recurrent.display_name().to_string(),
            description: "Single LSTM cell with a trained linear read-out".to_string(),
            lookback: Some(self.params.lookback),
            horizons: Vec::new(),
            parameters: json!({
                "hidden_size": self.params.hidden_size,
                "epochs": self.params.epochs,
                "learning_rate": self.params.learning_rate,
            }),
        }
    }
}
