use crate::optimization::{
    HistoryEntry, OptimizationResult, Optimizer, OptimizerConfig, Objective, SearchSpace,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// Exhaustive sweep over the cartesian product of per-parameter step
/// grids. Deterministic, and always "converged": every point was seen.
pub struct GridSearchOptimizer {
    objective: Arc<dyn Objective>,
    space: SearchSpace,
    quiet: bool,
}

impl GridSearchOptimizer {
    // The sweep is exhaustive, so the iteration/convergence knobs in
    // `OptimizerConfig` do not apply; the argument keeps construction
    // uniform across algorithms.
    pub fn new(objective: Arc<dyn Objective>, space: SearchSpace, _config: OptimizerConfig) -> Self {
        GridSearchOptimizer {
            objective,
            space,
            quiet: false,
        }
    }

    /// Grid values for one parameter, rounded to 3 decimals so float
    /// stepping cannot produce near-duplicate points.
    fn axis_values(min: f64, max: f64, step: f64) -> Vec<f64> {
        if step <= 0.0 || max < min {
            return vec![min];
        }

        let count = ((max - min) / step + 1e-9).floor() as usize + 1;
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let value = (min + i as f64 * step).min(max);
            let rounded = (value * 1000.0).round() / 1000.0;
            if values.last().map_or(true, |&last: &f64| last != rounded) {
                values.push(rounded);
            }
        }
        values
    }
}

impl Optimizer for GridSearchOptimizer {
    fn optimize(&mut self, _initial_params: Option<&HashMap<String, f64>>) -> OptimizationResult {
        let axes: Vec<(String, Vec<f64>)> = self
            .space
            .names()
            .iter()
            .map(|name| {
                let config = self.space.configs()[name];
                (
                    name.clone(),
                    Self::axis_values(config.min, config.max, config.step_size),
                )
            })
            .collect();

        let total: usize = axes.iter().map(|(_, values)| values.len()).product();
        if !self.quiet {
            let shape = axes
                .iter()
                .map(|(_, values)| values.len().to_string())
                .collect::<Vec<_>>()
                .join(" x ");
            info!("Grid search: {} = {} combinations", shape, total);
        }

        let progress = if self.quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb
        };

        let mut history = Vec::with_capacity(total);
        let mut best_params: Option<HashMap<String, f64>> = None;
        let mut best_score = f64::NEG_INFINITY;

        let mut indices = vec![0usize; axes.len()];
        for iteration in 0..total {
            let mut params = HashMap::with_capacity(axes.len());
            for (axis, &index) in axes.iter().zip(indices.iter()) {
                params.insert(axis.0.clone(), axis.1[index]);
            }

            let score = self.objective.evaluate(&params);
            if score > best_score {
                best_score = score;
                best_params = Some(params.clone());
            }
            history.push(HistoryEntry {
                iteration,
                params,
                score,
            });
            progress.inc(1);

            // Odometer advance over the axes.
            for axis in (0..axes.len()).rev() {
                indices[axis] += 1;
                if indices[axis] < axes[axis].1.len() {
                    break;
                }
                indices[axis] = 0;
            }
        }

        progress.finish_and_clear();

        let final_params = best_params.unwrap_or_default();
        if !self.quiet {
            info!(
                "Grid search finished: best score {:.4} after {} evaluations",
                best_score, total
            );
        }

        OptimizationResult {
            final_params,
            best_score,
            history,
            iterations: total,
            converged: true,
        }
    }

    fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }
}
