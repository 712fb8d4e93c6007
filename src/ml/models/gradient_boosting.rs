//! Direct multi-step gradient-boosted forecaster
//!
//! One booster per horizon step, each trained on lag and rolling-window
//! features of the scaled series. The booster is squared-loss gradient
//! boosting over smartcore regression trees with row subsampling and early
//! stopping on the chronologically last 20 % of each step's samples.
//!
//! Inference picks the trained step closest to each requested hour and
//! rolls the window forward, feeding predictions back as the newest lag.

use chrono::{DateTime, FixedOffset};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::domain::StrategyType;
use crate::error::{ForecastError, Result};
use crate::forecast::features::{feature_count, window_features, SupervisedSet};
use crate::forecast::PreparedSeries;
use crate::ml::{Backtest, FitReport, ForecastStrategy, StrategyInfo};

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Minimum samples for a horizon step to be trained
pub const MIN_STEP_SAMPLES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradientBoostingParams {
    pub lookback: usize,
    /// Candidate horizon steps, in hours
    pub horizons: Vec<usize>,
    /// Steps above this are not trained
    pub max_horizon: usize,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
    /// Row fraction drawn per boosting round
    pub subsample: f64,
    pub early_stopping_rounds: usize,
    pub seed: u64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            lookback: 24,
            horizons: vec![1, 3, 6, 12, 24],
            max_horizon: 24,
            n_estimators: 100,
            learning_rate: 0.05,
            max_depth: 6,
            min_samples_leaf: 1,
            subsample: 0.8,
            early_stopping_rounds: 10,
            seed: 42,
        }
    }
}

impl GradientBoostingParams {
    fn tree_parameters(&self) -> DecisionTreeRegressorParameters {
        DecisionTreeRegressorParameters::default()
            .with_max_depth(self.max_depth)
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_min_samples_split(2)
    }
}

fn to_matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>> {
    let n_features = rows
        .first()
        .map(Vec::len)
        .ok_or_else(|| ForecastError::Model("cannot build a matrix from no rows".into()))?;

    let mut flat = Vec::with_capacity(rows.len() * n_features);
    for row in rows {
        if row.len() != n_features {
            return Err(ForecastError::Model(
                "all feature vectors must have the same length".into(),
            ));
        }
        flat.extend_from_slice(row);
    }
    Ok(DenseMatrix::new(rows.len(), n_features, flat, false))
}

fn mse(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / a.len().max(1) as f64
}

/// Squared-loss gradient boosting over regression trees
#[derive(Serialize, Deserialize)]
pub struct BoostedTrees {
    base: f64,
    learning_rate: f64,
    trees: Vec<Tree>,
    best_validation_mse: Option<f64>,
}

impl fmt::Debug for BoostedTrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoostedTrees")
            .field("base", &self.base)
            .field("learning_rate", &self.learning_rate)
            .field("trees", &self.trees.len())
            .field("best_validation_mse", &self.best_validation_mse)
            .finish()
    }
}

impl BoostedTrees {
    /// Fit on `train`, stopping early when `validation` stops improving.
    pub fn fit(
        train: &SupervisedSet,
        validation: &SupervisedSet,
        params: &GradientBoostingParams,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if train.is_empty() {
            return Err(ForecastError::Model("cannot boost on an empty dataset".into()));
        }

        let x_train = to_matrix(&train.features)?;
        let x_val = if validation.is_empty() {
            None
        } else {
            Some(to_matrix(&validation.features)?)
        };

        let n = train.len();
        let base = train.targets.iter().sum::<f64>() / n as f64;
        let sample_size = ((n as f64 * params.subsample).floor() as usize).clamp(1, n);

        let mut fitted_train = vec![base; n];
        let mut fitted_val = vec![base; validation.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut best: Option<(f64, usize)> = None;

        for round in 0..params.n_estimators {
            let residuals: Vec<f64> = train
                .targets
                .iter()
                .zip(&fitted_train)
                .map(|(y, f)| y - f)
                .collect();

            let mut rows = rand::seq::index::sample(rng, n, sample_size).into_vec();
            rows.sort_unstable();
            let x_sub = to_matrix(
                &rows
                    .iter()
                    .map(|i| train.features[*i].clone())
                    .collect::<Vec<_>>(),
            )?;
            let r_sub: Vec<f64> = rows.iter().map(|i| residuals[*i]).collect();

            let tree = Tree::fit(&x_sub, &r_sub, params.tree_parameters())
                .map_err(|e| ForecastError::Model(format!("tree fit failed: {e:?}")))?;

            let update = tree
                .predict(&x_train)
                .map_err(|e| ForecastError::Model(format!("tree predict failed: {e:?}")))?;
            for (f, u) in fitted_train.iter_mut().zip(&update) {
                *f += params.learning_rate * u;
            }

            if let Some(x_val) = &x_val {
                let update = tree
                    .predict(x_val)
                    .map_err(|e| ForecastError::Model(format!("tree predict failed: {e:?}")))?;
                for (f, u) in fitted_val.iter_mut().zip(&update) {
                    *f += params.learning_rate * u;
                }
            }
            trees.push(tree);

            if x_val.is_some() {
                let score = mse(&validation.targets, &fitted_val);
                match best {
                    Some((best_score, _)) if score >= best_score => {}
                    _ => best = Some((score, round)),
                }
                if let Some((_, best_round)) = best {
                    if round - best_round >= params.early_stopping_rounds {
                        debug!(round, best_round, "early stopping");
                        break;
                    }
                }
            }
        }

        if let Some((_, best_round)) = best {
            trees.truncate(best_round + 1);
        }

        Ok(Self {
            base,
            learning_rate: params.learning_rate,
            trees,
            best_validation_mse: best.map(|(score, _)| score),
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_matrix(&self, x: &DenseMatrix<f64>, rows: usize) -> Result<Vec<f64>> {
        let mut out = vec![self.base; rows];
        for tree in &self.trees {
            let update = tree
                .predict(x)
                .map_err(|e| ForecastError::Model(format!("tree predict failed: {e:?}")))?;
            for (o, u) in out.iter_mut().zip(&update) {
                *o += self.learning_rate * u;
            }
        }
        Ok(out)
    }

    pub fn predict_row(&self, features: &[f64]) -> Result<f64> {
        let x = DenseMatrix::new(1, features.len(), features.to_vec(), false);
        Ok(self.predict_matrix(&x, 1)?[0])
    }
}

/// One booster per horizon step
#[derive(Debug, Serialize, Deserialize)]
pub struct GradientBoostingModel {
    params: GradientBoostingParams,
    steps: BTreeMap<usize, BoostedTrees>,
    last_window: Vec<f64>,
}

impl GradientBoostingModel {
    pub fn new(params: GradientBoostingParams) -> Self {
        Self {
            params,
            steps: BTreeMap::new(),
            last_window: Vec::new(),
        }
    }

    pub fn params(&self) -> &GradientBoostingParams {
        &self.params
    }

    /// Horizon steps that have a trained booster
    pub fn trained_steps(&self) -> Vec<usize> {
        self.steps.keys().copied().collect()
    }

    /// Trained step closest to `hour`; ties go to the smaller step
    pub fn closest_step(&self, hour: usize) -> Option<usize> {
        self.steps
            .keys()
            .copied()
            .min_by_key(|step| (step.abs_diff(hour), *step))
    }

    fn booster_for(&self, hour: usize) -> Result<&BoostedTrees> {
        self.closest_step(hour)
            .and_then(|step| self.steps.get(&step))
            .ok_or_else(|| ForecastError::Model("gradient boosting model is not fitted".into()))
    }
}

impl ForecastStrategy for GradientBoostingModel {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::GradientBoosting
    }

    fn fit(&mut self, series: &PreparedSeries) -> Result<FitReport> {
        let lookback = self.params.lookback;
        let required = lookback + MIN_STEP_SAMPLES;
        if series.len() < required {
            return Err(ForecastError::InsufficientData {
                target: series.target,
                available: series.len(),
                required,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut steps = BTreeMap::new();
        let mut samples = 0;

        for &step in self
            .params
            .horizons
            .iter()
            .filter(|s| **s >= 1 && **s <= self.params.max_horizon)
        {
            let set = SupervisedSet::build(&series.scaled, lookback, step);
            if set.len() < MIN_STEP_SAMPLES {
                warn!(
                    target = %series.target,
                    step,
                    samples = set.len(),
                    "skipping horizon step with too few samples"
                );
                continue;
            }

            let (train, validation) = set.split(0.8);
            let booster = BoostedTrees::fit(&train, &validation, &self.params, &mut rng)?;
            debug!(
                target = %series.target,
                step,
                trees = booster.n_trees(),
                "trained horizon step"
            );
            samples = samples.max(set.len());
            steps.insert(step, booster);
        }

        if steps.is_empty() {
            return Err(ForecastError::InsufficientData {
                target: series.target,
                available: series.len(),
                required,
            });
        }

        self.steps = steps;
        self.last_window = series.scaled[series.len() - lookback..].to_vec();

        Ok(FitReport {
            samples,
            lookback: Some(lookback),
            horizons: self.trained_steps(),
            final_loss: self
                .steps
                .values()
                .filter_map(|b| b.best_validation_mse)
                .next(),
        })
    }

    fn backtest(&self, series: &PreparedSeries, start: usize) -> Result<Backtest> {
        let lookback = self.params.lookback;
        let booster = self.booster_for(1)?;
        let first_index = start.max(lookback).min(series.len());

        let rows: Vec<Vec<f64>> = (first_index..series.len())
            .map(|i| window_features(&series.scaled[i - lookback..i]))
            .collect();
        let predictions = if rows.is_empty() {
            Vec::new()
        } else {
            booster.predict_matrix(&to_matrix(&rows)?, rows.len())?
        };

        Ok(Backtest {
            first_index,
            predictions,
        })
    }

    fn predict_multi_step(
        &self,
        _origin: DateTime<FixedOffset>,
        hours_ahead: usize,
        window: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
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
        for hour in 1..=hours_ahead {
            let value = self.booster_for(hour)?.predict_row(&window_features(&window))?;
            out.push(value);
            window.remove(0);
            window.push(value);
        }
        Ok(out)
    }

    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            strategy_type: StrategyType::GradientBoosting,
            name: StrategyType::GradientBoosting.display_name().to_string(),
            description: "One boosted tree ensemble per horizon step with autoregressive rollout"
                .to_string(),
            lookback: Some(self.params.lookback),
            horizons: self.trained_steps(),
            parameters: json!({
                "n_estimators": self.params.n_estimators,
                "learning_rate": self.params.learning_rate,
                "max_depth": self.params.max_depth,
                "subsample": self.params.subsample,
                "early_stopping_rounds": self.params.early_stopping_rounds,
                "features": feature_count(self.params.lookback),
            }),
        }
    }
}
