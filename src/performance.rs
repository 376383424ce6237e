use crate::backtest::Portfolio;
use crate::models::{BacktestConfig, BacktestResult, OrderSide, TradeRecord};
use statrs::statistics::Statistics;
use std::collections::HashMap;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn reduce(config: &BacktestConfig, portfolio: &Portfolio) -> BacktestResult {
        let initial_capital = config.initial_capital;
        let final_capital = portfolio.total_value();
        let total_return = final_capital - initial_capital;
        let total_return_percent = if initial_capital > 0.0 {
            (total_return / initial_capital) * 100.0
        } else {
            0.0
        };

        let equity_curve = Self::build_equity_curve(initial_capital, portfolio.trade_history());
        let sharpe_ratio = Self::calculate_sharpe_ratio(&equity_curve);
        let max_drawdown_percent = Self::calculate_max_drawdown_percent(&equity_curve);
        let (winning_trades, losing_trades) = Self::count_wins_losses(portfolio.trade_history());

        BacktestResult {
            initial_capital,
            final_capital,
            total_return,
            total_return_percent,
            sharpe_ratio,
            max_drawdown_percent,
            total_trades: portfolio.trade_history().len() as i32,
            winning_trades,
            losing_trades,
            open_positions: portfolio.positions().cloned().collect(),
            trade_history: portfolio.trade_history().to_vec(),
        }
    }

    /// Portfolio value at each trade event: cash after the trade plus
    /// open positions valued at the latest trade price seen per token.
    fn build_equity_curve(initial_capital: f64, trades: &[TradeRecord]) -> Vec<f64> {
        let mut curve = Vec::with_capacity(trades.len() + 1);
        curve.push(initial_capital);

        let mut open_sizes: HashMap<&str, f64> = HashMap::new();
        let mut last_prices: HashMap<&str, f64> = HashMap::new();

        for trade in trades {
            last_prices.insert(&trade.token_id, trade.price);
            let entry = open_sizes.entry(&trade.token_id).or_insert(0.0);
            match trade.side {
                OrderSide::Buy => *entry += trade.size,
                OrderSide::Sell => *entry -= trade.size,
            }

            let positions_value: f64 = open_sizes
                .iter()
                .map(|(token_id, size)| size * last_prices.get(token_id).copied().unwrap_or(0.0))
                .sum();
            curve.push(trade.capital_after + positions_value);
        }

        curve
    }

    /// Annualized Sharpe over equity-curve step returns. Fewer than two
    /// returns or zero variance both yield exactly 0.
    pub fn calculate_sharpe_ratio(equity_curve: &[f64]) -> f64 {
        if equity_curve.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                if window[0] > 0.0 {
                    (window[1] - window[0]) / window[0]
                } else {
                    0.0
                }
            })
            .collect();

        if returns.len() < 2 {
            return 0.0;
        }

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();

        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        (mean_return / std_dev) * (252.0_f64).sqrt()
    }

    pub fn calculate_max_drawdown_percent(equity_curve: &[f64]) -> f64 {
        if equity_curve.is_empty() {
            return 0.0;
        }

        let mut max_drawdown_percent = 0.0;
        let mut peak = equity_curve[0];

        for &value in equity_curve {
            if value > peak {
                peak = value;
            } else if peak > 0.0 {
                let drawdown_percent = ((peak - value) / peak) * 100.0;
                if drawdown_percent > max_drawdown_percent {
                    max_drawdown_percent = drawdown_percent;
                }
            }
        }

        max_drawdown_percent
    }

    /// Classifies each sell against the VWAP cost basis accumulated from
    /// prior buys. Sells at exactly the basis count as neither.
    fn count_wins_losses(trades: &[TradeRecord]) -> (i32, i32) {
        let mut winning = 0;
        let mut losing = 0;
        let mut basis: HashMap<&str, (f64, f64)> = HashMap::new(); // (size, avg_price)

        for trade in trades {
            match trade.side {
                OrderSide::Buy => {
                    let entry = basis.entry(&trade.token_id).or_insert((0.0, 0.0));
                    let new_size = entry.0 + trade.size;
                    entry.1 = (entry.0 * entry.1 + trade.size * trade.price) / new_size;
                    entry.0 = new_size;
                }
                OrderSide::Sell => {
                    let mut flat = false;
                    if let Some(entry) = basis.get_mut(trade.token_id.as_str()) {
                        if trade.price > entry.1 {
                            winning += 1;
                        } else if trade.price < entry.1 {
                            losing += 1;
                        }
                        entry.0 = (entry.0 - trade.size).max(0.0);
                        flat = entry.0 == 0.0;
                    }
                    if flat {
                        basis.remove(trade.token_id.as_str());
                    }
                }
            }
        }

        (winning, losing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(
        timestamp: i64,
        token_id: &str,
        side: OrderSide,
        size: f64,
        price: f64,
        capital_after: f64,
    ) -> TradeRecord {
        TradeRecord {
            timestamp,
            token_id: token_id.to_string(),
            side,
            size,
            price,
            total_cost: size * price,
            position_size_after: 0.0,
            capital_after,
        }
    }

    #[test]
    fn sharpe_is_zero_with_too_few_points() {
        assert_eq!(PerformanceCalculator::calculate_sharpe_ratio(&[]), 0.0);
        assert_eq!(PerformanceCalculator::calculate_sharpe_ratio(&[1000.0]), 0.0);
        assert_eq!(
            PerformanceCalculator::calculate_sharpe_ratio(&[1000.0, 1010.0]),
            0.0
        );
    }

    #[test]
    fn sharpe_is_zero_with_constant_equity() {
        let curve = vec![1000.0, 1000.0, 1000.0, 1000.0];
        assert_eq!(PerformanceCalculator::calculate_sharpe_ratio(&curve), 0.0);
    }

    #[test]
    fn sharpe_positive_for_steady_gains() {
        let curve = vec![1000.0, 1010.0, 1021.0, 1030.0, 1042.0];
        assert!(PerformanceCalculator::calculate_sharpe_ratio(&curve) > 0.0);
    }

    #[test]
    fn drawdown_measures_peak_to_trough() {
        let curve = vec![1000.0, 1200.0, 900.0, 1100.0];
        let dd = PerformanceCalculator::calculate_max_drawdown_percent(&curve);
        assert!((dd - 25.0).abs() < 1e-9);
    }

    #[test]
    fn equity_curve_values_open_positions_at_trade_prices() {
        // Buy 100 @ 0.5 from 1000 cash, then the position is worth 100 * 0.5.
        let trades = vec![
            trade(1, "tok", OrderSide::Buy, 100.0, 0.5, 950.0),
            trade(2, "tok", OrderSide::Sell, 100.0, 0.7, 1020.0),
        ];
        let curve = PerformanceCalculator::build_equity_curve(1000.0, &trades);
        assert_eq!(curve.len(), 3);
        assert!((curve[0] - 1000.0).abs() < 1e-9);
        assert!((curve[1] - 1000.0).abs() < 1e-9); // 950 cash + 50 position
        assert!((curve[2] - 1020.0).abs() < 1e-9); // flat again
    }

    #[test]
    fn wins_and_losses_compare_against_vwap() {
        let trades = vec![
            trade(1, "tok", OrderSide::Buy, 100.0, 0.4, 0.0),
            trade(2, "tok", OrderSide::Buy, 100.0, 0.6, 0.0),
            // VWAP is 0.5: selling at 0.55 wins, at 0.45 loses.
            trade(3, "tok", OrderSide::Sell, 100.0, 0.55, 0.0),
            trade(4, "tok", OrderSide::Sell, 100.0, 0.45, 0.0),
        ];
        let (wins, losses) = PerformanceCalculator::count_wins_losses(&trades);
        assert_eq!(wins, 1);
        assert_eq!(losses, 1);
    }
}
