use crate::models::BacktestConfig;
use crate::params_store;
use crate::stored_data;
use crate::strategy;
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::path::Path;

pub fn run(
    strategy_id: &str,
    data_dir: &Path,
    params_dir: &Path,
    initial_capital: f64,
    fee_rate: f64,
) -> Result<()> {
    let data = stored_data::load(data_dir)?;

    let defaults = strategy::default_params(strategy_id)?;
    let saved = params_store::load(params_dir, strategy_id);
    if saved.is_some() {
        info!("Using optimized parameters from {}", params_dir.display());
    }
    let params = params_store::merge_params(&defaults, saved.as_ref(), &HashMap::new());

    let mut strategy = strategy::create_strategy(strategy_id, params.clone())?;
    let engine = crate::backtest::BacktestEngine::new(BacktestConfig {
        initial_capital,
        fee_rate,
        quiet: false,
    });
    let result = engine.run(&data, strategy.as_mut())?;

    println!("\n=== BACKTEST: {} ===\n", strategy_id);
    println!("  Initial Capital: ${:.2}", result.initial_capital);
    println!("  Final Capital: ${:.2}", result.final_capital);
    println!(
        "  Total Return: ${:.2} ({:.2}%)",
        result.total_return, result.total_return_percent
    );
    println!("  Sharpe Ratio: {:.4}", result.sharpe_ratio);
    println!("  Max Drawdown: {:.2}%", result.max_drawdown_percent);
    println!(
        "  Trades: {} ({} wins, {} losses, {} still open)",
        result.total_trades,
        result.winning_trades,
        result.losing_trades,
        result.open_positions.len()
    );
    println!("  Parameters:");
    let mut names: Vec<&String> = params.keys().collect();
    names.sort();
    for name in names {
        println!("    {}: {}", name, params[name]);
    }

    if !result.trade_history.is_empty() {
        let tail = result.trade_history.len().saturating_sub(10);
        println!("  Last trades:");
        for trade in &result.trade_history[tail..] {
            println!(
                "    {} {} {:.2} @ {:.4} (capital {:.2})",
                trade.side.as_str(),
                trade.token_id,
                trade.size,
                trade.price,
                trade.capital_after
            );
        }
    }
    println!();

    Ok(())
}
