use crate::models::StoredData;
use crate::optimization::{
    BacktestObjective, BayesianOptimizer, CmaEsOptimizer, CrossValidationObjective,
    DifferentialEvolutionOptimizer, GradientDescentOptimizer, GridSearchOptimizer, LbfgsOptimizer,
    Objective, OptimizationResult, Optimizer, OptimizerConfig, SearchSpace,
};
use crate::params_store;
use crate::stored_data;
use crate::strategy;
use anyhow::Result;
use clap::ValueEnum;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    Grid,
    GradientDescent,
    DifferentialEvolution,
    CmaEs,
    Lbfgs,
    Bayesian,
}

impl Algorithm {
    pub fn label(&self) -> &'static str {
        match self {
            Algorithm::Grid => "grid",
            Algorithm::GradientDescent => "gradient-descent",
            Algorithm::DifferentialEvolution => "differential-evolution",
            Algorithm::CmaEs => "cma-es",
            Algorithm::Lbfgs => "lbfgs",
            Algorithm::Bayesian => "bayesian",
        }
    }
}

pub fn run(
    strategy_id: &str,
    data_dir: &Path,
    params_dir: &Path,
    algorithm: Algorithm,
    max_iterations: usize,
    seed: Option<u64>,
) -> Result<()> {
    let data = Arc::new(stored_data::load(data_dir)?);

    let configs = strategy::param_configs(strategy_id)?;
    let space = SearchSpace::new(configs);
    let config = OptimizerConfig {
        max_iterations,
        seed,
        ..OptimizerConfig::default()
    };

    // The Bayesian path scores on cross-validated folds; the rest score a
    // single full-window backtest.
    let objective: Arc<dyn Objective> = match algorithm {
        Algorithm::Bayesian => Arc::new(CrossValidationObjective::new(&data, strategy_id)),
        _ => Arc::new(BacktestObjective::new(Arc::clone(&data), strategy_id)),
    };

    info!(
        "Optimizing {} with {} over {} parameters ({} markets, {} price points)",
        strategy_id,
        algorithm.label(),
        space.dim(),
        data.markets.len(),
        data.total_price_points()
    );

    let mut initial = None;
    if let Some(saved) = params_store::load(params_dir, strategy_id) {
        let mut params = params_store::merge_params(
            &strategy::default_params(strategy_id)?,
            Some(&saved),
            &HashMap::new(),
        );
        space.clamp(&mut params);
        info!("Seeding search from previously optimized parameters");
        initial = Some(params);
    }

    let mut optimizer = build_optimizer(algorithm, Arc::clone(&objective), space, config);
    let result = optimizer.optimize(initial.as_ref());

    print_result(strategy_id, algorithm, &result);
    verify_on_full_window(&data, strategy_id, algorithm, &result);

    params_store::save(
        params_dir,
        strategy_id,
        &result.final_params,
        params_store::metadata_now(algorithm.label(), result.best_score, result.iterations),
    )?;
    params_store::save_history(params_dir, strategy_id, &result.history)?;
    info!("Saved optimized parameters to {}", params_dir.display());

    Ok(())
}

fn build_optimizer(
    algorithm: Algorithm,
    objective: Arc<dyn Objective>,
    space: SearchSpace,
    config: OptimizerConfig,
) -> Box<dyn Optimizer> {
    match algorithm {
        Algorithm::Grid => Box::new(GridSearchOptimizer::new(objective, space, config)),
        Algorithm::GradientDescent => {
            Box::new(GradientDescentOptimizer::new(objective, space, config))
        }
        Algorithm::DifferentialEvolution => {
            Box::new(DifferentialEvolutionOptimizer::new(objective, space, config))
        }
        Algorithm::CmaEs => Box::new(CmaEsOptimizer::new(objective, space, config)),
        Algorithm::Lbfgs => Box::new(LbfgsOptimizer::new(objective, space, config)),
        Algorithm::Bayesian => Box::new(BayesianOptimizer::new(objective, space, config)),
    }
}

fn print_result(strategy_id: &str, algorithm: Algorithm, result: &OptimizationResult) {
    println!(
        "\n=== OPTIMIZATION RESULT: {} ({}) ===\n",
        strategy_id,
        algorithm.label()
    );
    println!("  Best Score: {:.4}", result.best_score);
    println!(
        "  Iterations: {} (converged: {})",
        result.iterations, result.converged
    );
    println!("  Parameters:");
    let mut names: Vec<&String> = result.final_params.keys().collect();
    names.sort();
    for name in names {
        println!("    {}: {}", name, result.final_params[name]);
    }
    println!();
}

/// One loud full-window backtest with the winning parameters, so the
/// console shows real trade counts next to the fitness score.
fn verify_on_full_window(
    data: &Arc<StoredData>,
    strategy_id: &str,
    algorithm: Algorithm,
    result: &OptimizationResult,
) {
    let objective = BacktestObjective::new(Arc::clone(data), strategy_id);
    match objective.run_backtest(&result.final_params) {
        Ok(backtest) => {
            println!("  Full-window check:");
            println!(
                "    Return: ${:.2} ({:.2}%)",
                backtest.total_return, backtest.total_return_percent
            );
            println!("    Sharpe Ratio: {:.4}", backtest.sharpe_ratio);
            println!("    Max Drawdown: {:.2}%", backtest.max_drawdown_percent);
            println!("    Trades: {}", backtest.total_trades);
            println!();
        }
        Err(e) => {
            log::warn!(
                "Full-window check failed for {} ({}): {}",
                strategy_id,
                algorithm.label(),
                e
            );
        }
    }
}
