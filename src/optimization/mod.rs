pub mod bayesian;
pub mod cmaes;
pub mod differential_evolution;
pub mod gradient_descent;
pub mod grid_search;
pub mod lbfgs;

pub use bayesian::{BayesianOptimizer, CrossValidationObjective};
pub use cmaes::CmaEsOptimizer;
pub use differential_evolution::DifferentialEvolutionOptimizer;
pub use gradient_descent::GradientDescentOptimizer;
pub use grid_search::GridSearchOptimizer;
pub use lbfgs::LbfgsOptimizer;

use crate::backtest::BacktestEngine;
use crate::models::{BacktestConfig, BacktestResult, StoredData};
use crate::strategy::create_strategy;
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Search bounds for one tunable parameter. Boolean parameters are
/// encoded as `min 0, max 1, step_size 1` and travel as 0/1 values.
#[derive(Debug, Clone, Copy)]
pub struct ParamConfig {
    pub min: f64,
    pub max: f64,
    pub step_size: f64,
    /// Per-parameter step scale for gradient descent; falls back to
    /// `step_size` when unset.
    pub learning_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    pub convergence_threshold: f64,
    /// Initial random probes for the Bayesian optimizer.
    pub random_samples: usize,
    /// Fixed RNG seed; fresh entropy when unset.
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_iterations: 100,
            convergence_threshold: 0.001,
            random_samples: 5,
            seed: None,
        }
    }
}

impl OptimizerConfig {
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: usize,
    pub params: HashMap<String, f64>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub final_params: HashMap<String, f64>,
    pub best_score: f64,
    pub history: Vec<HistoryEntry>,
    pub iterations: usize,
    pub converged: bool,
}

/// Common driver interface for all search algorithms. `optimize` runs
/// to convergence or the iteration cap and always returns the best
/// parameters observed, never an intermediate iterate.
pub trait Optimizer {
    fn optimize(&mut self, initial_params: Option<&HashMap<String, f64>>) -> OptimizationResult;
    fn set_quiet(&mut self, quiet: bool);
}

/// Anything that can score a parameter set. Optimizers only see this,
/// which keeps them testable against synthetic surfaces.
pub trait Objective: Send + Sync {
    fn evaluate(&self, params: &HashMap<String, f64>) -> f64;
}

/// Scales fitness down linearly below the minimum trade count so the
/// search cannot converge on a two-trade fluke.
pub fn trade_penalty(total_trades: i32, min_trades: usize) -> f64 {
    if min_trades == 0 {
        return 1.0;
    }
    (total_trades.max(0) as f64 / min_trades as f64).min(1.0)
}

/// Fitness = Sharpe ratio times the trade-count penalty, evaluated by a
/// full backtest with a fresh strategy and portfolio per call.
pub struct BacktestObjective {
    data: Arc<StoredData>,
    strategy_id: String,
    backtest_config: BacktestConfig,
    min_trades: usize,
}

impl BacktestObjective {
    pub fn new(data: Arc<StoredData>, strategy_id: &str) -> Self {
        BacktestObjective {
            data,
            strategy_id: strategy_id.to_string(),
            backtest_config: BacktestConfig {
                fee_rate: 0.002,
                quiet: true,
                ..BacktestConfig::default()
            },
            min_trades: 5,
        }
    }

    pub fn with_backtest_config(mut self, config: BacktestConfig) -> Self {
        self.backtest_config = config;
        self
    }

    pub fn with_min_trades(mut self, min_trades: usize) -> Self {
        self.min_trades = min_trades;
        self
    }

    pub fn run_backtest(&self, params: &HashMap<String, f64>) -> anyhow::Result<BacktestResult> {
        let mut strategy = create_strategy(&self.strategy_id, params.clone())?;
        let engine = BacktestEngine::new(self.backtest_config.clone());
        engine.run(&self.data, strategy.as_mut())
    }
}

impl Objective for BacktestObjective {
    fn evaluate(&self, params: &HashMap<String, f64>) -> f64 {
        match self.run_backtest(params) {
            Ok(result) => {
                result.sharpe_ratio * trade_penalty(result.total_trades, self.min_trades)
            }
            Err(error) => {
                warn!("Backtest evaluation failed: {}", error);
                f64::NEG_INFINITY
            }
        }
    }
}

/// Parameter space helper shared by all algorithms. Names are kept
/// sorted so vector layouts and sweep orders are deterministic.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    names: Vec<String>,
    configs: HashMap<String, ParamConfig>,
}

impl SearchSpace {
    pub fn new(configs: HashMap<String, ParamConfig>) -> Self {
        let mut names: Vec<String> = configs.keys().cloned().collect();
        names.sort();
        SearchSpace { names, configs }
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn config(&self, name: &str) -> Option<&ParamConfig> {
        self.configs.get(name)
    }

    pub fn configs(&self) -> &HashMap<String, ParamConfig> {
        &self.configs
    }

    /// Map params into the unit hypercube, in name order.
    pub fn normalize(&self, params: &HashMap<String, f64>) -> Vec<f64> {
        self.names
            .iter()
            .map(|name| {
                let config = &self.configs[name];
                let span = config.max - config.min;
                if span <= 0.0 {
                    0.0
                } else {
                    let value = params.get(name).copied().unwrap_or(config.min);
                    ((value - config.min) / span).clamp(0.0, 1.0)
                }
            })
            .collect()
    }

    /// Map a unit-hypercube point back to parameter values: clamp to
    /// bounds, then snap to the step grid for discrete parameters
    /// (step_size >= 1).
    pub fn denormalize(&self, x: &[f64]) -> HashMap<String, f64> {
        let mut params = HashMap::with_capacity(self.names.len());
        for (i, name) in self.names.iter().enumerate() {
            let config = &self.configs[name];
            let raw = config.min + x.get(i).copied().unwrap_or(0.0) * (config.max - config.min);
            params.insert(name.clone(), Self::constrain(raw, config));
        }
        params
    }

    pub fn constrain(value: f64, config: &ParamConfig) -> f64 {
        let clamped = value.clamp(config.min, config.max);
        if config.step_size >= 1.0 {
            let steps = ((clamped - config.min) / config.step_size).round();
            (config.min + steps * config.step_size).clamp(config.min, config.max)
        } else {
            clamped
        }
    }

    pub fn clamp(&self, params: &mut HashMap<String, f64>) {
        for name in &self.names {
            let config = &self.configs[name];
            if let Some(value) = params.get_mut(name) {
                *value = Self::constrain(*value, config);
            }
        }
    }

    pub fn sample_random(&self, rng: &mut StdRng) -> HashMap<String, f64> {
        let mut params = HashMap::with_capacity(self.names.len());
        for name in &self.names {
            let config = &self.configs[name];
            let raw = config.min + rng.gen::<f64>() * (config.max - config.min);
            params.insert(name.clone(), Self::constrain(raw, config));
        }
        params
    }

    pub fn midpoint(&self) -> HashMap<String, f64> {
        let mut params = HashMap::with_capacity(self.names.len());
        for name in &self.names {
            let config = &self.configs[name];
            params.insert(
                name.clone(),
                Self::constrain((config.min + config.max) / 2.0, config),
            );
        }
        params
    }

    /// Mean squared distance between two points in normalized space.
    pub fn normalized_sq_distance(
        &self,
        a: &HashMap<String, f64>,
        b: &HashMap<String, f64>,
    ) -> f64 {
        if self.names.is_empty() {
            return 0.0;
        }
        let na = self.normalize(a);
        let nb = self.normalize(b);
        let sum: f64 = na
            .iter()
            .zip(nb.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        sum / self.names.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        let mut configs = HashMap::new();
        configs.insert(
            "period".to_string(),
            ParamConfig {
                min: 5.0,
                max: 50.0,
                step_size: 5.0,
                learning_rate: None,
            },
        );
        configs.insert(
            "stop_loss".to_string(),
            ParamConfig {
                min: 0.01,
                max: 0.10,
                step_size: 0.01,
                learning_rate: None,
            },
        );
        configs.insert(
            "trailing_stop".to_string(),
            ParamConfig {
                min: 0.0,
                max: 1.0,
                step_size: 1.0,
                learning_rate: None,
            },
        );
        SearchSpace::new(configs)
    }

    #[test]
    fn names_are_sorted_for_stable_layout() {
        let space = space();
        assert_eq!(space.names(), &["period", "stop_loss", "trailing_stop"]);
    }

    #[test]
    fn denormalize_clamps_and_snaps_discrete_params() {
        let space = space();
        let params = space.denormalize(&[1.4, -0.5, 0.73]);
        assert_eq!(params["period"], 50.0);
        assert_eq!(params["stop_loss"], 0.01);
        // 0.73 maps to 0.73, snaps to the nearest whole step: 1.
        assert_eq!(params["trailing_stop"], 1.0);
    }

    #[test]
    fn continuous_params_are_not_snapped() {
        let space = space();
        let params = space.denormalize(&[0.0, 0.5, 0.0]);
        assert!((params["stop_loss"] - 0.055).abs() < 1e-12);
    }

    #[test]
    fn normalize_roundtrips_inside_bounds() {
        let space = space();
        let mut params = HashMap::new();
        params.insert("period".to_string(), 25.0);
        params.insert("stop_loss".to_string(), 0.05);
        params.insert("trailing_stop".to_string(), 1.0);

        let x = space.normalize(&params);
        let back = space.denormalize(&x);
        assert!((back["period"] - 25.0).abs() < 1e-9);
        assert!((back["stop_loss"] - 0.05).abs() < 1e-9);
        assert_eq!(back["trailing_stop"], 1.0);
    }

    #[test]
    fn random_samples_respect_bounds_and_steps() {
        let space = space();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let params = space.sample_random(&mut rng);
            let period = params["period"];
            assert!((5.0..=50.0).contains(&period));
            assert!((period - 5.0) % 5.0 == 0.0);
            assert!((0.01..=0.10).contains(&params["stop_loss"]));
            let flag = params["trailing_stop"];
            assert!(flag == 0.0 || flag == 1.0);
        }
    }

    #[test]
    fn trade_penalty_scales_linearly_then_saturates() {
        assert_eq!(trade_penalty(0, 5), 0.0);
        assert!((trade_penalty(2, 5) - 0.4).abs() < 1e-12);
        assert_eq!(trade_penalty(5, 5), 1.0);
        assert_eq!(trade_penalty(50, 5), 1.0);
        assert_eq!(trade_penalty(0, 0), 1.0);
    }

    #[test]
    fn distance_is_mean_squared_over_dimensions() {
        let space = space();
        let a = space.denormalize(&[0.0, 0.0, 0.0]);
        let b = space.denormalize(&[1.0, 1.0, 1.0]);
        assert!((space.normalized_sq_distance(&a, &b) - 1.0).abs() < 1e-9);
        assert_eq!(space.normalized_sq_distance(&a, &a), 0.0);
    }
}
