use crate::optimization::{
    HistoryEntry, OptimizationResult, Optimizer, OptimizerConfig, Objective, SearchSpace,
};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

const MEMORY: usize = 10;
const GRADIENT_STEP: f64 = 0.01;
const ARMIJO_C: f64 = 0.5;
const BACKTRACK_RHO: f64 = 0.5;
const MAX_BACKTRACKS: usize = 20;
const CURVATURE_FLOOR: f64 = 1e-10;
const MIN_ITERATIONS: usize = 10;

struct CurvaturePair {
    s: Vec<f64>,
    y: Vec<f64>,
    rho: f64,
}

/// Limited-memory BFGS on the normalized unit box. Internally the
/// objective is negated so the two-loop recursion produces a descent
/// direction for the loss and the Armijo test reads the usual way.
pub struct LbfgsOptimizer {
    objective: Arc<dyn Objective>,
    space: SearchSpace,
    config: OptimizerConfig,
    quiet: bool,
}

impl LbfgsOptimizer {
    pub fn new(objective: Arc<dyn Objective>, space: SearchSpace, config: OptimizerConfig) -> Self {
        LbfgsOptimizer {
            objective,
            space,
            config,
            quiet: false,
        }
    }

    fn loss(&self, x: &[f64]) -> f64 {
        -self.objective.evaluate(&self.space.denormalize(x))
    }

    /// Forward difference with probes kept inside the unit box.
    fn gradient(&self, x: &[f64], base_loss: f64) -> Vec<f64> {
        let mut gradient = vec![0.0; x.len()];
        for i in 0..x.len() {
            let (probe, h) = if x[i] + GRADIENT_STEP <= 1.0 {
                (x[i] + GRADIENT_STEP, GRADIENT_STEP)
            } else {
                (x[i] - GRADIENT_STEP, -GRADIENT_STEP)
            };
            let mut probe_x = x.to_vec();
            probe_x[i] = probe;
            gradient[i] = (self.loss(&probe_x) - base_loss) / h;
        }
        gradient
    }

    /// Two-loop recursion: approximates -H^-1 g from the stored
    /// curvature pairs, with gamma scaling of the initial Hessian.
    fn search_direction(pairs: &[CurvaturePair], gradient: &[f64]) -> Vec<f64> {
        let mut q = gradient.to_vec();
        let mut alphas = vec![0.0; pairs.len()];

        for (i, pair) in pairs.iter().enumerate().rev() {
            let alpha = pair.rho * dot(&pair.s, &q);
            alphas[i] = alpha;
            for (qj, yj) in q.iter_mut().zip(pair.y.iter()) {
                *qj -= alpha * yj;
            }
        }

        if let Some(last) = pairs.last() {
            let gamma = dot(&last.s, &last.y) / dot(&last.y, &last.y);
            for qj in q.iter_mut() {
                *qj *= gamma;
            }
        }

        for (i, pair) in pairs.iter().enumerate() {
            let beta = pair.rho * dot(&pair.y, &q);
            for (qj, sj) in q.iter_mut().zip(pair.s.iter()) {
                *qj += (alphas[i] - beta) * sj;
            }
        }

        q.iter().map(|v| -v).collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl Optimizer for LbfgsOptimizer {
    fn optimize(&mut self, initial_params: Option<&HashMap<String, f64>>) -> OptimizationResult {
        let dim = self.space.dim();
        let mut x = match initial_params {
            Some(params) => self.space.normalize(params),
            None => vec![0.5; dim],
        };
        let mut loss = self.loss(&x);
        let mut gradient = self.gradient(&x, loss);
        let mut pairs: Vec<CurvaturePair> = Vec::new();

        let mut best_params = self.space.denormalize(&x);
        let mut best_score = -loss;
        let mut history = Vec::new();
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..self.config.max_iterations {
            iterations = iteration + 1;

            let score = -loss;
            if score > best_score {
                best_score = score;
                best_params = self.space.denormalize(&x);
            }
            history.push(HistoryEntry {
                iteration,
                params: self.space.denormalize(&x),
                score,
            });

            let gradient_norm = dot(&gradient, &gradient).sqrt();
            if !self.quiet {
                info!(
                    "L-BFGS iter {}: score {:.4}, |grad| {:.6}",
                    iteration, score, gradient_norm
                );
            }
            if iteration > MIN_ITERATIONS && gradient_norm < self.config.convergence_threshold {
                converged = true;
                break;
            }

            let direction = Self::search_direction(&pairs, &gradient);
            let slope = dot(&gradient, &direction);

            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let candidate: Vec<f64> = x
                    .iter()
                    .zip(direction.iter())
                    .map(|(xi, di)| xi + alpha * di)
                    .collect();

                if candidate.iter().any(|&v| !(0.0..=1.0).contains(&v)) {
                    alpha *= BACKTRACK_RHO;
                    continue;
                }

                let candidate_loss = self.loss(&candidate);
                if candidate_loss <= loss + ARMIJO_C * alpha * slope {
                    accepted = Some((candidate, candidate_loss));
                    break;
                }
                alpha *= BACKTRACK_RHO;
            }

            let Some((x_new, loss_new)) = accepted else {
                break;
            };

            let gradient_new = self.gradient(&x_new, loss_new);
            let s: Vec<f64> = x_new.iter().zip(x.iter()).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = gradient_new
                .iter()
                .zip(gradient.iter())
                .map(|(a, b)| a - b)
                .collect();
            let sy = dot(&s, &y);
            if sy > CURVATURE_FLOOR {
                if pairs.len() == MEMORY {
                    pairs.remove(0);
                }
                let rho = 1.0 / sy;
                pairs.push(CurvaturePair { s, y, rho });
            }

            x = x_new;
            loss = loss_new;
            gradient = gradient_new;
        }

        // The final iterate may be the best point seen.
        let final_score = -loss;
        if final_score > best_score {
            best_score = final_score;
            best_params = self.space.denormalize(&x);
        }

        if !self.quiet {
            info!(
                "L-BFGS finished: best {:.4} after {} iterations (converged: {})",
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
