use chrono::Utc;
use polybt::backtest::BacktestEngine;
use polybt::models::{
    BacktestConfig, CollectionMetadata, Market, MarketToken, PricePoint, StoredData,
};
use polybt::optimization::{
    BacktestObjective, GridSearchOptimizer, Optimizer, OptimizerConfig, ParamConfig, SearchSpace,
};
use polybt::{commands, stored_data, strategy};
use std::collections::HashMap;
use std::sync::Arc;

fn market(condition_id: &str, yes_id: &str, no_id: &str) -> Market {
    Market {
        condition_id: condition_id.to_string(),
        question: format!("{}?", condition_id),
        description: String::new(),
        tokens: vec![
            MarketToken {
                token_id: yes_id.to_string(),
                outcome: "Yes".to_string(),
                price: 0.5,
                winner: false,
            },
            MarketToken {
                token_id: no_id.to_string(),
                outcome: "No".to_string(),
                price: 0.5,
                winner: false,
            },
        ],
        active: true,
        closed: false,
        end_date_iso: None,
        minimum_order_size: 5.0,
        tick_size: 0.01,
        neg_risk: false,
    }
}

fn series(points: &[(i64, f64)]) -> Vec<PricePoint> {
    points.iter().map(|&(t, p)| PricePoint { t, p }).collect()
}

/// One market whose YES token dips below the threshold entry and later
/// recovers past the exit, while the NO token never trades.
fn dip_and_recover_data() -> StoredData {
    let mut price_history = HashMap::new();
    price_history.insert(
        "m1-yes".to_string(),
        series(&[
            (100, 0.30),
            (200, 0.10),
            (300, 0.20),
            (400, 0.50),
            (500, 0.55),
        ]),
    );
    price_history.insert(
        "m1-no".to_string(),
        series(&[(100, 0.70), (300, 0.80), (500, 0.45)]),
    );

    StoredData {
        markets: vec![market("m1", "m1-yes", "m1-no")],
        metadata: CollectionMetadata {
            collected_at: Utc::now(),
            version: "test".to_string(),
            total_markets: 1,
            total_price_points: 8,
        },
        price_history,
    }
}

#[test]
fn threshold_round_trip_produces_one_profitable_cycle() {
    let data = dip_and_recover_data();
    let params = strategy::default_params("threshold").unwrap();
    let mut strat = strategy::create_strategy("threshold", params).unwrap();

    let engine = BacktestEngine::new(BacktestConfig {
        initial_capital: 1000.0,
        fee_rate: 0.002,
        quiet: true,
    });
    let result = engine.run(&data, strat.as_mut()).unwrap();

    // Entry at 0.10 with 10% risk and the fee buffer: 995 tokens for
    // 99.699 including fees; exit at 0.50 nets 496.505.
    assert_eq!(result.total_trades, 2);
    assert_eq!(result.winning_trades, 1);
    assert_eq!(result.losing_trades, 0);
    assert!(result.open_positions.is_empty());
    assert!((result.final_capital - 1396.806).abs() < 1e-3);
    assert!(result.total_return > 0.0);
    assert!(result.sharpe_ratio > 0.0);
}

#[test]
fn no_token_never_triggers_an_entry() {
    let data = dip_and_recover_data();
    let params = strategy::default_params("threshold").unwrap();
    let mut strat = strategy::create_strategy("threshold", params).unwrap();

    let engine = BacktestEngine::new(BacktestConfig {
        initial_capital: 1000.0,
        fee_rate: 0.002,
        quiet: true,
    });
    let result = engine.run(&data, strat.as_mut()).unwrap();

    assert!(result
        .trade_history
        .iter()
        .all(|trade| trade.token_id == "m1-yes"));
}

#[test]
fn grid_optimize_runs_end_to_end_over_the_dataset() {
    let data = Arc::new(dip_and_recover_data());
    let objective = Arc::new(BacktestObjective::new(Arc::clone(&data), "threshold"));

    let mut configs = HashMap::new();
    configs.insert(
        "entry_below".to_string(),
        ParamConfig {
            min: 0.05,
            max: 0.25,
            step_size: 0.1,
            learning_rate: None,
        },
    );
    let space = SearchSpace::new(configs);

    let mut optimizer = GridSearchOptimizer::new(objective, space, OptimizerConfig::default());
    optimizer.set_quiet(true);
    let result = optimizer.optimize(None);

    assert_eq!(result.history.len(), 3);
    assert!(result.converged);

    let best_in_history = result
        .history
        .iter()
        .map(|entry| entry.score)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(result.best_score, best_in_history);
    assert!(result.best_score > 0.0);

    let entry_below = result.final_params["entry_below"];
    assert!((0.05..=0.25).contains(&entry_below));
    // Only thresholds at or above the 0.10 dip ever trade.
    assert!(entry_below >= 0.10);
}

#[test]
fn backtest_command_reports_a_finished_run() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let params_dir = dir.path().join("params");
    stored_data::save(&dip_and_recover_data(), &data_dir).unwrap();

    // Covers the whole command path, results report included.
    commands::backtest::run("threshold", &data_dir, &params_dir, 1000.0, 0.002).unwrap();
}

#[test]
fn exported_dataset_feeds_a_full_backtest() {
    let dir = tempfile::tempdir().unwrap();
    commands::export_data::run(dir.path(), 3).unwrap();

    let data = stored_data::load(dir.path()).unwrap();
    let params = strategy::default_params("bollinger").unwrap();
    let mut strat = strategy::create_strategy("bollinger", params).unwrap();

    let engine = BacktestEngine::new(BacktestConfig {
        initial_capital: 1000.0,
        fee_rate: 0.002,
        quiet: true,
    });
    let result = engine.run(&data, strat.as_mut()).unwrap();

    assert!(result.final_capital.is_finite());
    assert!(result.final_capital > 0.0);
    assert_eq!(
        result.total_trades as usize,
        result.trade_history.len()
    );
}
