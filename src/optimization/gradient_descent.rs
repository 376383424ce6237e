use crate::optimization::{
    HistoryEntry, OptimizationResult, Optimizer, OptimizerConfig, Objective, SearchSpace,
};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// Finite-difference hill climber. The objective is treated as a loss
/// after negation, so each step moves uphill in fitness; boundary and
/// discrete parameters are re-constrained after every update.
pub struct GradientDescentOptimizer {
    objective: Arc<dyn Objective>,
    space: SearchSpace,
    config: OptimizerConfig,
    quiet: bool,
}

impl GradientDescentOptimizer {
    pub fn new(objective: Arc<dyn Objective>, space: SearchSpace, config: OptimizerConfig) -> Self {
        GradientDescentOptimizer {
            objective,
            space,
            config,
            quiet: false,
        }
    }

    /// Forward difference with the parameter's own step size; probes
    /// flip backward at the upper bound so the difference stays inside.
    fn gradient(
        &self,
        params: &HashMap<String, f64>,
        base_score: f64,
    ) -> HashMap<String, f64> {
        let mut gradients = HashMap::with_capacity(self.space.dim());
        for name in self.space.names() {
            let config = self.space.configs()[name];
            let value = params[name];
            let step = config.step_size.max(f64::MIN_POSITIVE);

            let (probe, h) = if value + step <= config.max {
                (value + step, step)
            } else {
                (value - step, -step)
            };

            let mut probe_params = params.clone();
            probe_params.insert(name.clone(), probe);
            let probe_score = self.objective.evaluate(&probe_params);
            gradients.insert(name.clone(), (probe_score - base_score) / h);
        }
        gradients
    }
}

impl Optimizer for GradientDescentOptimizer {
    fn optimize(&mut self, initial_params: Option<&HashMap<String, f64>>) -> OptimizationResult {
        let mut params = initial_params
            .cloned()
            .unwrap_or_else(|| self.space.midpoint());
        self.space.clamp(&mut params);

        let mut history = Vec::new();
        let mut best_params = params.clone();
        let mut best_score = f64::NEG_INFINITY;
        let mut converged = false;

        for iteration in 0..self.config.max_iterations {
            let score = self.objective.evaluate(&params);
            if score > best_score {
                best_score = score;
                best_params = params.clone();
            }
            history.push(HistoryEntry {
                iteration,
                params: params.clone(),
                score,
            });

            let gradients = self.gradient(&params, score);

            let mut max_change = 0.0_f64;
            let mut next = params.clone();
            for name in self.space.names() {
                let config = self.space.configs()[name];
                let learning_rate = config.learning_rate.unwrap_or(config.step_size);
                let updated = SearchSpace::constrain(
                    params[name] + learning_rate * gradients[name],
                    &config,
                );
                max_change = max_change.max((updated - params[name]).abs());
                next.insert(name.clone(), updated);
            }
            params = next;

            if !self.quiet {
                info!(
                    "Gradient descent iter {}: score {:.4}, max param change {:.6}",
                    iteration, score, max_change
                );
            }

            if max_change < self.config.convergence_threshold {
                converged = true;
                break;
            }
        }

        let iterations = history.len();
        if !self.quiet {
            info!(
                "Gradient descent finished: best score {:.4} after {} iterations (converged: {})",
                best_score, iterations, converged
            );
        }

        OptimizationResult {
            final_params: best_params,
            best_score,
            history,
            iterations,
            converged,
        }
    }

    fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::ParamConfig;

    struct ConcaveSurface;

    impl Objective for ConcaveSurface {
        fn evaluate(&self, params: &HashMap<String, f64>) -> f64 {
            let x = params["x"];
            1.0 - (x - 0.6) * (x - 0.6)
        }
    }

    fn space() -> SearchSpace {
        let mut configs = HashMap::new();
        configs.insert(
            "x".to_string(),
            ParamConfig {
                min: 0.0,
                max: 1.0,
                step_size: 0.01,
                learning_rate: Some(0.1),
            },
        );
        SearchSpace::new(configs)
    }

    #[test]
    fn climbs_toward_the_maximum() {
        let mut optimizer = GradientDescentOptimizer::new(
            Arc::new(ConcaveSurface),
            space(),
            OptimizerConfig {
                max_iterations: 200,
                convergence_threshold: 1e-5,
                ..OptimizerConfig::default()
            },
        );
        optimizer.set_quiet(true);

        let result = optimizer.optimize(None);
        assert!(result.converged);
        assert!((result.final_params["x"] - 0.6).abs() < 0.02);
        assert!(result.best_score > 0.99);
    }

    #[test]
    fn result_stays_within_bounds_from_any_start() {
        let mut initial = HashMap::new();
        initial.insert("x".to_string(), 0.0);

        let mut optimizer = GradientDescentOptimizer::new(
            Arc::new(ConcaveSurface),
            space(),
            OptimizerConfig::default(),
        );
        optimizer.set_quiet(true);

        let result = optimizer.optimize(Some(&initial));
        for entry in &result.history {
            let x = entry.params["x"];
            assert!((0.0..=1.0).contains(&x));
        }
        assert!((0.0..=1.0).contains(&result.final_params["x"]));
    }

    #[test]
    fn first_history_entry_uses_initial_params() {
        let mut initial = HashMap::new();
        initial.insert("x".to_string(), 0.25);

        let mut optimizer = GradientDescentOptimizer::new(
            Arc::new(ConcaveSurface),
            space(),
            OptimizerConfig::default(),
        );
        optimizer.set_quiet(true);

        let result = optimizer.optimize(Some(&initial));
        assert_eq!(result.history[0].params["x"], 0.25);
        assert_eq!(result.history[0].iteration, 0);
    }
}
