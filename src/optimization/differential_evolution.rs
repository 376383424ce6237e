use crate::models::{EvalOutcome, EvalTask};
use crate::optimization::{
    HistoryEntry, OptimizationResult, Optimizer, OptimizerConfig, Objective, SearchSpace,
};
use crossbeam_channel::bounded;
use log::info;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

const DIFFERENTIAL_WEIGHT: f64 = 0.8;
const CROSSOVER_RATE: f64 = 0.9;
const STAGNATION_WINDOW: usize = 20;

/// rand/1/bin differential evolution. Candidate evaluation is the
/// expensive part, so each generation's trials run on a worker pool.
pub struct DifferentialEvolutionOptimizer {
    objective: Arc<dyn Objective>,
    space: SearchSpace,
    config: OptimizerConfig,
    quiet: bool,
}

impl DifferentialEvolutionOptimizer {
    pub fn new(objective: Arc<dyn Objective>, space: SearchSpace, config: OptimizerConfig) -> Self {
        DifferentialEvolutionOptimizer {
            objective,
            space,
            config,
            quiet: false,
        }
    }

    fn population_size(&self) -> usize {
        std::cmp::max(10, self.space.dim() + 1)
    }

    /// Evaluate all candidates on a crossbeam worker pool, results
    /// rejoined by index.
    fn evaluate_batch(&self, candidates: &[HashMap<String, f64>]) -> Vec<f64> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let count = candidates.len();
        let num_workers = std::cmp::min(count, std::cmp::max(1, num_cpus::get()));

        let (task_tx, task_rx) = bounded::<EvalTask>(count);
        let (result_tx, result_rx) = bounded::<EvalOutcome>(count);

        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let objective = Arc::clone(&self.objective);
            handles.push(thread::spawn(move || {
                while let Ok(task) = task_rx.recv() {
                    let fitness = objective.evaluate(&task.params);
                    let outcome = EvalOutcome {
                        index: task.index,
                        fitness,
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            }));
        }

        for (index, params) in candidates.iter().enumerate() {
            let task = EvalTask {
                index,
                params: params.clone(),
            };
            if task_tx.send(task).is_err() {
                break;
            }
        }
        drop(task_tx);
        drop(result_tx);

        let mut fitness = vec![f64::NEG_INFINITY; count];
        while let Ok(outcome) = result_rx.recv() {
            fitness[outcome.index] = outcome.fitness;
        }

        for handle in handles {
            let _ = handle.join();
        }

        fitness
    }

    fn mutate_and_cross(
        &self,
        rng: &mut StdRng,
        population: &[HashMap<String, f64>],
        target_index: usize,
    ) -> HashMap<String, f64> {
        let pop_size = population.len();
        let mut pick_distinct = |exclude: &[usize]| loop {
            let candidate = rng.gen_range(0..pop_size);
            if !exclude.contains(&candidate) {
                return candidate;
            }
        };
        let a = pick_distinct(&[target_index]);
        let b = pick_distinct(&[target_index, a]);
        let c = pick_distinct(&[target_index, a, b]);

        let target = &population[target_index];
        let forced = rng.gen_range(0..self.space.dim().max(1));

        let mut trial = HashMap::with_capacity(self.space.dim());
        for (k, name) in self.space.names().iter().enumerate() {
            let config = self.space.configs()[name];
            let mut mutant = population[a][name]
                + DIFFERENTIAL_WEIGHT * (population[b][name] - population[c][name]);
            if mutant < config.min || mutant > config.max {
                mutant = config.min + rng.gen::<f64>() * (config.max - config.min);
            }

            let value = if rng.gen::<f64>() < CROSSOVER_RATE || k == forced {
                mutant
            } else {
                target[name]
            };
            trial.insert(name.clone(), SearchSpace::constrain(value, &config));
        }
        trial
    }
}

impl Optimizer for DifferentialEvolutionOptimizer {
    fn optimize(&mut self, initial_params: Option<&HashMap<String, f64>>) -> OptimizationResult {
        let mut rng = self.config.rng();
        let pop_size = self.population_size();

        let mut population: Vec<HashMap<String, f64>> = Vec::with_capacity(pop_size);
        if let Some(initial) = initial_params {
            let mut seeded = initial.clone();
            self.space.clamp(&mut seeded);
            population.push(seeded);
        }
        while population.len() < pop_size {
            population.push(self.space.sample_random(&mut rng));
        }

        let mut fitness = self.evaluate_batch(&population);

        let mut best_index = 0;
        for (i, &score) in fitness.iter().enumerate() {
            if score > fitness[best_index] {
                best_index = i;
            }
        }
        let mut best_params = population[best_index].clone();
        let mut best_score = fitness[best_index];

        if !self.quiet {
            info!(
                "Differential evolution: population {}, {} dims, initial best {:.4}",
                pop_size,
                self.space.dim(),
                best_score
            );
        }

        let mut history = Vec::new();
        let mut converged = false;
        let mut generations = 0;

        for generation in 0..self.config.max_iterations {
            generations = generation + 1;

            let trials: Vec<HashMap<String, f64>> = (0..pop_size)
                .map(|i| self.mutate_and_cross(&mut rng, &population, i))
                .collect();
            let trial_fitness = self.evaluate_batch(&trials);

            let mut improved = false;
            for i in 0..pop_size {
                if trial_fitness[i] >= fitness[i] {
                    population[i] = trials[i].clone();
                    fitness[i] = trial_fitness[i];
                }
                if fitness[i] > best_score {
                    best_score = fitness[i];
                    best_params = population[i].clone();
                    improved = true;
                }
            }

            let generation_best = fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            history.push(HistoryEntry {
                iteration: generation,
                params: best_params.clone(),
                score: generation_best,
            });

            if !self.quiet {
                info!(
                    "DE generation {}: best {:.4} (improved: {})",
                    generation, best_score, improved
                );
            }

            if generation >= STAGNATION_WINDOW {
                let recent = &history[history.len() - STAGNATION_WINDOW..];
                let window_max = recent.iter().map(|e| e.score).fold(f64::NEG_INFINITY, f64::max);
                let window_min = recent.iter().map(|e| e.score).fold(f64::INFINITY, f64::min);
                if !improved && window_max - window_min < self.config.convergence_threshold {
                    converged = true;
                    break;
                }
            }
        }

        if !self.quiet {
            info!(
                "Differential evolution finished: best {:.4} after {} generations (converged: {})",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::ParamConfig;
    use std::sync::Mutex;

    struct RecordingSphere {
        seen: Mutex<Vec<HashMap<String, f64>>>,
    }

    impl Objective for RecordingSphere {
        fn evaluate(&self, params: &HashMap<String, f64>) -> f64 {
            self.seen.lock().unwrap().push(params.clone());
            let x = params["x"];
            let y = params["y"];
            -((x - 0.3) * (x - 0.3)) - (y - 0.7) * (y - 0.7)
        }
    }

    fn space() -> SearchSpace {
        let mut configs = HashMap::new();
        for name in ["x", "y"] {
            configs.insert(
                name.to_string(),
                ParamConfig {
                    min: 0.0,
                    max: 1.0,
                    step_size: 0.01,
                    learning_rate: None,
                },
            );
        }
        SearchSpace::new(configs)
    }

    #[test]
    fn every_evaluated_candidate_respects_bounds() {
        let objective = Arc::new(RecordingSphere {
            seen: Mutex::new(Vec::new()),
        });
        let mut optimizer = DifferentialEvolutionOptimizer::new(
            objective.clone(),
            space(),
            OptimizerConfig {
                max_iterations: 15,
                seed: Some(42),
                ..OptimizerConfig::default()
            },
        );
        optimizer.set_quiet(true);

        optimizer.optimize(None);

        let seen = objective.seen.lock().unwrap();
        assert!(!seen.is_empty());
        for params in seen.iter() {
            assert!((0.0..=1.0).contains(&params["x"]));
            assert!((0.0..=1.0).contains(&params["y"]));
        }
    }

    #[test]
    fn finds_the_sphere_maximum() {
        let objective = Arc::new(RecordingSphere {
            seen: Mutex::new(Vec::new()),
        });
        let mut optimizer = DifferentialEvolutionOptimizer::new(
            objective,
            space(),
            OptimizerConfig {
                max_iterations: 60,
                seed: Some(7),
                ..OptimizerConfig::default()
            },
        );
        optimizer.set_quiet(true);

        let result = optimizer.optimize(None);
        assert!((result.final_params["x"] - 0.3).abs() < 0.1);
        assert!((result.final_params["y"] - 0.7).abs() < 0.1);
        assert!(result.best_score > -0.02);
    }

    #[test]
    fn seeds_initial_params_into_the_population() {
        let mut initial = HashMap::new();
        initial.insert("x".to_string(), 0.3);
        initial.insert("y".to_string(), 0.7);

        let objective = Arc::new(RecordingSphere {
            seen: Mutex::new(Vec::new()),
        });
        let mut optimizer = DifferentialEvolutionOptimizer::new(
            objective,
            space(),
            OptimizerConfig {
                max_iterations: 5,
                seed: Some(1),
                ..OptimizerConfig::default()
            },
        );
        optimizer.set_quiet(true);

        // Seeding the exact optimum means nothing can beat it.
        let result = optimizer.optimize(Some(&initial));
        assert!((result.final_params["x"] - 0.3).abs() < 1e-9);
        assert!((result.final_params["y"] - 0.7).abs() < 1e-9);
        assert!(result.best_score.abs() < 1e-12);
    }
}
