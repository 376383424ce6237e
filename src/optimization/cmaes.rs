use crate::optimization::{
    HistoryEntry, OptimizationResult, Optimizer, OptimizerConfig, Objective, SearchSpace,
};
use log::info;
use rand::distributions::Distribution;
use statrs::distribution::Normal;
use std::collections::HashMap;
use std::sync::Arc;

const INITIAL_SIGMA: f64 = 0.3;
const MIN_GENERATIONS: usize = 20;

/// (mu/mu_w, lambda) evolution strategy in the normalized hypercube.
/// The covariance stays isotropic: only the global step size adapts,
/// guided by the ps/pc evolution paths.
pub struct CmaEsOptimizer {
    objective: Arc<dyn Objective>,
    space: SearchSpace,
    config: OptimizerConfig,
    quiet: bool,
}

impl CmaEsOptimizer {
    pub fn new(objective: Arc<dyn Objective>, space: SearchSpace, config: OptimizerConfig) -> Self {
        CmaEsOptimizer {
            objective,
            space,
            config,
            quiet: false,
        }
    }
}

impl Optimizer for CmaEsOptimizer {
    fn optimize(&mut self, initial_params: Option<&HashMap<String, f64>>) -> OptimizationResult {
        let dim = self.space.dim().max(1);
        let dim_f = dim as f64;
        let lambda = 4 + (3.0 * dim_f.ln()).floor() as usize;
        let mu = lambda / 2;

        // Log-rank recombination weights over the top mu samples.
        let raw_weights: Vec<f64> = (0..mu)
            .map(|i| ((mu as f64) + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let weight_sum: f64 = raw_weights.iter().sum();
        let weights: Vec<f64> = raw_weights.iter().map(|w| w / weight_sum).collect();
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cs = (mu_eff + 2.0) / (dim_f + mu_eff + 5.0);
        let cc = (4.0 + mu_eff / dim_f) / (dim_f + 4.0 + 2.0 * mu_eff / dim_f);
        let damps = 1.0 + 2.0 * (((mu_eff - 1.0) / (dim_f + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let chi_n = dim_f.sqrt() * (1.0 - 1.0 / (4.0 * dim_f) + 1.0 / (21.0 * dim_f * dim_f));

        let mut rng = self.config.rng();
        let normal = Normal::new(0.0, 1.0).unwrap();

        let mut xmean = match initial_params {
            Some(params) => self.space.normalize(params),
            None => vec![0.5; dim],
        };
        let mut sigma = INITIAL_SIGMA;
        let mut ps = vec![0.0; dim];
        let mut pc = vec![0.0; dim];

        let mut best_params = self.space.denormalize(&xmean);
        let mut best_score = self.objective.evaluate(&best_params);

        if !self.quiet {
            info!(
                "CMA-ES: {} dims, lambda {}, mu {}, initial score {:.4}",
                dim, lambda, mu, best_score
            );
        }

        let mut history = Vec::new();
        let mut converged = false;
        let mut generations = 0;

        for generation in 0..self.config.max_iterations {
            generations = generation + 1;

            let mut samples: Vec<(Vec<f64>, HashMap<String, f64>, f64)> =
                Vec::with_capacity(lambda);
            for _ in 0..lambda {
                let z: Vec<f64> = (0..dim).map(|_| normal.sample(&mut rng)).collect();
                let x: Vec<f64> = xmean
                    .iter()
                    .zip(z.iter())
                    .map(|(m, zi)| m + sigma * zi)
                    .collect();
                let params = self.space.denormalize(&x);
                let score = self.objective.evaluate(&params);
                samples.push((x, params, score));
            }

            samples.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

            if samples[0].2 > best_score {
                best_score = samples[0].2;
                best_params = samples[0].1.clone();
            }

            let xold = xmean.clone();
            xmean = vec![0.0; dim];
            for (weight, (x, _, _)) in weights.iter().zip(samples.iter()) {
                for (mean, xi) in xmean.iter_mut().zip(x.iter()) {
                    *mean += weight * xi;
                }
            }

            let mean_shift: Vec<f64> = xmean
                .iter()
                .zip(xold.iter())
                .map(|(new, old)| (new - old) / sigma)
                .collect();

            let ps_coeff = (cs * (2.0 - cs) * mu_eff).sqrt();
            for (p, shift) in ps.iter_mut().zip(mean_shift.iter()) {
                *p = (1.0 - cs) * *p + ps_coeff * shift;
            }
            let ps_norm = ps.iter().map(|p| p * p).sum::<f64>().sqrt();

            let decay = 1.0 - (1.0 - cs).powi(2 * (generation as i32 + 1));
            let hsig = if decay > 0.0 {
                ps_norm / decay.sqrt() < (1.4 + 2.0 / (dim_f + 1.0)) * chi_n
            } else {
                false
            };
            let pc_coeff = (cc * (2.0 - cc) * mu_eff).sqrt();
            for (p, shift) in pc.iter_mut().zip(mean_shift.iter()) {
                *p = (1.0 - cc) * *p + if hsig { pc_coeff * shift } else { 0.0 };
            }

            sigma *= ((cs / damps) * (ps_norm * ps_norm / dim_f - 1.0) / 2.0).exp();

            history.push(HistoryEntry {
                iteration: generation,
                params: samples[0].1.clone(),
                score: samples[0].2,
            });

            if !self.quiet {
                info!(
                    "CMA-ES generation {}: best {:.4}, sigma {:.4}",
                    generation, best_score, sigma
                );
            }

            let max_shift = xmean
                .iter()
                .zip(xold.iter())
                .map(|(new, old)| (new - old).abs())
                .fold(0.0_f64, f64::max);
            if generation > MIN_GENERATIONS && max_shift < self.config.convergence_threshold {
                converged = true;
                break;
            }
        }

        if !self.quiet {
            info!(
                "CMA-ES finished: best {:.4} after {} generations (converged: {})",
                best_score, generations, converged
            );
        }

        OptimizationResult {
            final_params: best_params,
            best_score,
            history,
            iterations: generations,
            converged,
        }
    }

    fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }
}
