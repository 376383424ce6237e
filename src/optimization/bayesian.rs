use crate::models::{BacktestConfig, StoredData};
use crate::optimization::{
    trade_penalty, HistoryEntry, OptimizationResult, Optimizer, OptimizerConfig, Objective,
    SearchSpace,
};
use crate::backtest::BacktestEngine;
use crate::strategy::create_strategy;
use log::{info, warn};
use rand::rngs::StdRng;
use statrs::statistics::Statistics;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

const LENGTH_SCALE: f64 = 0.1;
const NOISE: f64 = 0.01;
const VARIANCE_FLOOR: f64 = 1e-6;
const ACQUISITION_CANDIDATES: usize = 100;
const DUPLICATE_DISTANCE: f64 = 0.001;
const CV_FOLDS: usize = 5;
const CV_MIN_TRADES: usize = 5;

/// Gaussian process surrogate over the normalized hypercube: RBF kernel
/// on mean-squared distance, fixed length scale and observation noise,
/// exact solve by Gaussian elimination.
pub struct GpSurrogate {
    points: Vec<Vec<f64>>,
    gram: Vec<Vec<f64>>,
    alpha: Vec<f64>,
}

impl GpSurrogate {
    pub fn fit(points: Vec<Vec<f64>>, values: &[f64]) -> GpSurrogate {
        let n = points.len();
        let mut gram = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                gram[i][j] = Self::kernel(&points[i], &points[j]);
                if i == j {
                    gram[i][j] += NOISE;
                }
            }
        }
        let alpha = gaussian_solve(gram.clone(), values.to_vec());
        GpSurrogate {
            points,
            gram,
            alpha,
        }
    }

    fn kernel(a: &[f64], b: &[f64]) -> f64 {
        let dim = a.len().max(1) as f64;
        let dist: f64 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            / dim;
        (-dist / (2.0 * LENGTH_SCALE * LENGTH_SCALE)).exp()
    }

    /// Posterior mean and variance at a query point. Variance is floored
    /// so acquisition math never divides by zero.
    pub fn predict(&self, query: &[f64]) -> (f64, f64) {
        let k_star: Vec<f64> = self
            .points
            .iter()
            .map(|p| Self::kernel(p, query))
            .collect();

        let mean: f64 = k_star
            .iter()
            .zip(self.alpha.iter())
            .map(|(k, a)| k * a)
            .sum();

        let v = gaussian_solve(self.gram.clone(), k_star.clone());
        let explained: f64 = k_star.iter().zip(v.iter()).map(|(k, vi)| k * vi).sum();
        let variance = (Self::kernel(query, query) - explained).max(VARIANCE_FLOOR);

        (mean, variance)
    }
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
fn gaussian_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let n = b.len();

    for col in 0..n {
        let mut pivot = col;
        for row in col + 1..n {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let diag = a[col][col];
        if diag.abs() < 1e-12 {
            continue;
        }

        for row in col + 1..n {
            let factor = a[row][col] / diag;
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in row + 1..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = if a[row][row].abs() < 1e-12 {
            0.0
        } else {
            sum / a[row][row]
        };
    }
    x
}

/// Abramowitz-Stegun polynomial approximation of erf, good to ~1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let poly = ((((a5 * t + a4) * t + a3) * t + a2) * t + a1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn normal_pdf(z: f64) -> f64 {
    (-z * z / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Expected improvement over the incumbent; 0 once posterior std
/// collapses below 1e-6.
fn expected_improvement(mean: f64, variance: f64, best: f64) -> f64 {
    let std_dev = variance.sqrt();
    if std_dev < 1e-6 {
        return 0.0;
    }
    let z = (mean - best) / std_dev;
    (mean - best) * normal_cdf(z) + std_dev * normal_pdf(z)
}

/// Split the dataset into `k` contiguous folds along the global sorted
/// timestamp axis. Every price point lands in exactly one fold.
pub fn build_folds(data: &StoredData, k: usize) -> Vec<StoredData> {
    let mut timestamps = BTreeSet::new();
    for points in data.price_history.values() {
        for point in points {
            timestamps.insert(point.t);
        }
    }

    let all: Vec<i64> = timestamps.into_iter().collect();
    if all.is_empty() || k == 0 {
        return Vec::new();
    }

    let fold_len = all.len().div_ceil(k);
    all.chunks(fold_len)
        .map(|chunk| {
            let members: HashSet<i64> = chunk.iter().copied().collect();
            data.filter_timestamps(|t| members.contains(&t))
        })
        .collect()
}

/// Stability-weighted cross-validation fitness: mean fold Sharpe scaled
/// by `0.2 + 0.8 * stability` and the trade-count penalty, where
/// stability is one minus the (capped) coefficient of variation of the
/// per-fold returns.
pub struct CrossValidationObjective {
    folds: Vec<StoredData>,
    strategy_id: String,
    backtest_config: BacktestConfig,
}

impl CrossValidationObjective {
    pub fn new(data: &StoredData, strategy_id: &str) -> Self {
        CrossValidationObjective {
            folds: build_folds(data, CV_FOLDS),
            strategy_id: strategy_id.to_string(),
            backtest_config: BacktestConfig {
                fee_rate: 0.002,
                quiet: true,
                ..BacktestConfig::default()
            },
        }
    }

    pub fn fold_count(&self) -> usize {
        self.folds.len()
    }
}

impl Objective for CrossValidationObjective {
    fn evaluate(&self, params: &HashMap<String, f64>) -> f64 {
        if self.folds.is_empty() {
            return 0.0;
        }

        let mut sharpes = Vec::with_capacity(self.folds.len());
        let mut returns = Vec::with_capacity(self.folds.len());
        let mut trades = 0i64;

        for fold in &self.folds {
            let mut strategy = match create_strategy(&self.strategy_id, params.clone()) {
                Ok(strategy) => strategy,
                Err(error) => {
                    warn!("Cross-validation strategy construction failed: {}", error);
                    return f64::NEG_INFINITY;
                }
            };
            let engine = BacktestEngine::new(self.backtest_config.clone());
            match engine.run(fold, strategy.as_mut()) {
                Ok(result) => {
                    sharpes.push(result.sharpe_ratio);
                    returns.push(result.total_return);
                    trades += result.total_trades as i64;
                }
                Err(error) => {
                    warn!("Cross-validation fold failed: {}", error);
                    return f64::NEG_INFINITY;
                }
            }
        }

        let avg_sharpe = sharpes.iter().sum::<f64>() / sharpes.len() as f64;
        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
        let std_return = if returns.len() > 1 {
            returns.clone().std_dev()
        } else {
            0.0
        };

        let stability = if mean_return.abs() < 1e-12 {
            if std_return == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - (std_return / mean_return.abs()).min(1.0)
        };

        let avg_trades = (trades as f64 / self.folds.len() as f64).round() as i32;
        fold_fitness(avg_sharpe, stability, avg_trades)
    }
}

/// Mean fold Sharpe weighted by stability, scaled down when the average
/// fold trades fewer than `CV_MIN_TRADES` times.
fn fold_fitness(avg_sharpe: f64, stability: f64, avg_trades: i32) -> f64 {
    avg_sharpe * (0.2 + 0.8 * stability) * trade_penalty(avg_trades, CV_MIN_TRADES)
}

/// GP-EI Bayesian optimization: random probes, then one acquisition
/// maximization per evaluation over a random candidate set.
pub struct BayesianOptimizer {
    objective: Arc<dyn Objective>,
    space: SearchSpace,
    config: OptimizerConfig,
    quiet: bool,
}

impl BayesianOptimizer {
    pub fn new(objective: Arc<dyn Objective>, space: SearchSpace, config: OptimizerConfig) -> Self {
        BayesianOptimizer {
            objective,
            space,
            config,
            quiet: false,
        }
    }

    fn suggest(
        &self,
        rng: &mut StdRng,
        evaluated: &[(HashMap<String, f64>, f64)],
        best_score: f64,
    ) -> HashMap<String, f64> {
        let points: Vec<Vec<f64>> = evaluated
            .iter()
            .map(|(params, _)| self.space.normalize(params))
            .collect();
        let values: Vec<f64> = evaluated.iter().map(|(_, score)| *score).collect();
        let surrogate = GpSurrogate::fit(points, &values);

        let mut best_candidate = self.space.sample_random(rng);
        let mut best_ei = f64::NEG_INFINITY;
        for _ in 0..ACQUISITION_CANDIDATES {
            let candidate = self.space.sample_random(rng);
            let (mean, variance) = surrogate.predict(&self.space.normalize(&candidate));
            let ei = expected_improvement(mean, variance, best_score);
            if ei > best_ei {
                best_ei = ei;
                best_candidate = candidate;
            }
        }

        let too_close = evaluated.iter().any(|(params, _)| {
            self.space.normalized_sq_distance(params, &best_candidate) < DUPLICATE_DISTANCE
        });
        if too_close {
            self.space.sample_random(rng)
        } else {
            best_candidate
        }
    }
}

impl Optimizer for BayesianOptimizer {
    fn optimize(&mut self, initial_params: Option<&HashMap<String, f64>>) -> OptimizationResult {
        let mut rng = self.config.rng();
        let mut evaluated: Vec<(HashMap<String, f64>, f64)> = Vec::new();
        let mut history = Vec::new();

        let record =
            |params: HashMap<String, f64>,
             score: f64,
             evaluated: &mut Vec<(HashMap<String, f64>, f64)>,
             history: &mut Vec<HistoryEntry>| {
                history.push(HistoryEntry {
                    iteration: history.len(),
                    params: params.clone(),
                    score,
                });
                evaluated.push((params, score));
            };

        if let Some(initial) = initial_params {
            let mut seeded = initial.clone();
            self.space.clamp(&mut seeded);
            let score = self.objective.evaluate(&seeded);
            record(seeded, score, &mut evaluated, &mut history);
        }

        let probes = self
            .config
            .random_samples
            .min(self.config.max_iterations.saturating_sub(evaluated.len()));
        for _ in 0..probes {
            let params = self.space.sample_random(&mut rng);
            let score = self.objective.evaluate(&params);
            record(params, score, &mut evaluated, &mut history);
        }

        if !self.quiet {
            let best = evaluated
                .iter()
                .map(|(_, s)| *s)
                .fold(f64::NEG_INFINITY, f64::max);
            info!(
                "Bayesian optimization: {} initial evaluations, best {:.4}",
                evaluated.len(),
                best
            );
        }

        while evaluated.len() < self.config.max_iterations {
            let best_score = evaluated
                .iter()
                .map(|(_, s)| *s)
                .fold(f64::NEG_INFINITY, f64::max);
            let candidate = self.suggest(&mut rng, &evaluated, best_score);
            let score = self.objective.evaluate(&candidate);

            if !self.quiet {
                info!(
                    "Bayesian evaluation {}: score {:.4} (best {:.4})",
                    evaluated.len(),
                    score,
                    best_score.max(score)
                );
            }

            record(candidate, score, &mut evaluated, &mut history);
        }

        let (final_params, best_score) = evaluated
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(params, score)| (params.clone(), *score))
            .unwrap_or_else(|| (self.space.midpoint(), f64::NEG_INFINITY));

        if !self.quiet {
            info!(
                "Bayesian optimization finished: best {:.4} after {} evaluations",
                best_score,
                evaluated.len()
            );
        }

        OptimizationResult {
            final_params,
            best_score,
            history,
            iterations: evaluated.len(),
            converged: true,
        }
    }

    fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }
}
