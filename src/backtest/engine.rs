use crate::backtest::Portfolio;
use crate::models::{Bar, BacktestConfig, BacktestResult, OrderResult, OrderSide, Position, StoredData};
use crate::performance::PerformanceCalculator;
use crate::strategy::Strategy;
use anyhow::Result;
use log::info;
use std::collections::{BTreeSet, HashMap};

/// What a strategy sees on each callback: the ledger, per-token bar
/// history up to the current timestep, and the prices quoted so far.
/// Order primitives fill at the target token's close for this step.
pub struct BacktestContext<'a> {
    portfolio: &'a mut Portfolio,
    history: &'a HashMap<String, Vec<Bar>>,
    current_prices: &'a HashMap<String, f64>,
    timestamp: i64,
}

impl<'a> BacktestContext<'a> {
    pub fn buy(&mut self, token_id: &str, size: f64) -> OrderResult {
        match self.current_prices.get(token_id) {
            Some(&price) => self.portfolio.buy(token_id, size, price, self.timestamp),
            None => OrderResult::rejected(token_id, OrderSide::Buy, "no current price"),
        }
    }

    pub fn sell(&mut self, token_id: &str, size: f64) -> OrderResult {
        match self.current_prices.get(token_id) {
            Some(&price) => self.portfolio.sell(token_id, size, price, self.timestamp),
            None => OrderResult::rejected(token_id, OrderSide::Sell, "no current price"),
        }
    }

    pub fn close(&mut self, token_id: &str) -> OrderResult {
        match self.current_prices.get(token_id) {
            Some(&price) => self.portfolio.close(token_id, price, self.timestamp),
            None => OrderResult::rejected(token_id, OrderSide::Sell, "no current price"),
        }
    }

    pub fn capital(&self) -> f64 {
        self.portfolio.capital()
    }

    pub fn total_value(&self) -> f64 {
        self.portfolio.total_value()
    }

    pub fn total_pnl(&self) -> f64 {
        self.portfolio.total_pnl()
    }

    pub fn position(&self, token_id: &str) -> Option<&Position> {
        self.portfolio.position(token_id)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.portfolio.positions().collect()
    }

    pub fn current_price(&self, token_id: &str) -> Option<f64> {
        self.current_prices.get(token_id).copied()
    }

    /// Bars seen so far for this token, oldest first, current bar last.
    pub fn history(&self, token_id: &str) -> &[Bar] {
        self.history
            .get(token_id)
            .map(|bars| bars.as_slice())
            .unwrap_or(&[])
    }

    /// Bar `offset` steps back; offset 0 is the most recent bar.
    pub fn bar(&self, token_id: &str, offset: usize) -> Option<&Bar> {
        let bars = self.history.get(token_id)?;
        bars.len().checked_sub(offset + 1).map(|i| &bars[i])
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Replays stored price history chronologically against one strategy.
/// Each run owns a fresh portfolio; engines are not reused.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        BacktestEngine { config }
    }

    pub fn run(&self, data: &StoredData, strategy: &mut dyn Strategy) -> Result<BacktestResult> {
        let series = self.prepare_series(data);

        let mut timestamps = BTreeSet::new();
        for (_, _, bars) in &series {
            for bar in bars {
                timestamps.insert(bar.timestamp);
            }
        }

        if !self.config.quiet {
            info!(
                "Backtest: {} tokens across {} markets, {} timesteps, capital {:.2}, fee {:.4}",
                series.len(),
                data.markets.len(),
                timestamps.len(),
                self.config.initial_capital,
                self.config.fee_rate
            );
        }

        let mut portfolio = Portfolio::new(self.config.initial_capital, self.config.fee_rate);
        let mut history: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut current_prices: HashMap<String, f64> = HashMap::new();
        let mut cursors = vec![0usize; series.len()];

        {
            let mut ctx = BacktestContext {
                portfolio: &mut portfolio,
                history: &history,
                current_prices: &current_prices,
                timestamp: timestamps.iter().next().copied().unwrap_or(0),
            };
            strategy.on_init(&mut ctx);
        }

        for &ts in &timestamps {
            let mut due_bars = Vec::new();
            for (i, (token_id, _, bars)) in series.iter().enumerate() {
                if cursors[i] < bars.len() && bars[cursors[i]].timestamp == ts {
                    let bar = bars[cursors[i]].clone();
                    cursors[i] += 1;
                    current_prices.insert(token_id.clone(), bar.close);
                    history.entry(token_id.clone()).or_default().push(bar.clone());
                    due_bars.push(bar);
                }
            }

            for bar in &due_bars {
                let mut ctx = BacktestContext {
                    portfolio: &mut portfolio,
                    history: &history,
                    current_prices: &current_prices,
                    timestamp: ts,
                };
                strategy.on_next(&mut ctx, bar);
            }

            portfolio.update_position_values(&current_prices);
        }

        {
            let mut ctx = BacktestContext {
                portfolio: &mut portfolio,
                history: &history,
                current_prices: &current_prices,
                timestamp: timestamps.iter().next_back().copied().unwrap_or(0),
            };
            strategy.on_complete(&mut ctx);
        }

        let result = PerformanceCalculator::reduce(&self.config, &portfolio);

        if !self.config.quiet {
            info!(
                "Backtest finished: final {:.2} ({:+.2}%), {} trades, Sharpe {:.4}, max drawdown {:.2}%",
                result.final_capital,
                result.total_return_percent,
                result.total_trades,
                result.sharpe_ratio,
                result.max_drawdown_percent
            );
        }

        Ok(result)
    }

    /// Per-token bar series sorted by time, tokens in deterministic
    /// order. Tokens without a listed market or without history drop out.
    fn prepare_series(&self, data: &StoredData) -> Vec<(String, String, Vec<Bar>)> {
        let mut series = Vec::new();
        for market in &data.markets {
            for token in &market.tokens {
                let Some(points) = data.price_history.get(&token.token_id) else {
                    continue;
                };
                if points.is_empty() {
                    continue;
                }

                let mut sorted = points.clone();
                sorted.sort_by_key(|p| p.t);
                let bars: Vec<Bar> = sorted
                    .into_iter()
                    .map(|p| Bar::from_quote(&token.token_id, &market.condition_id, p))
                    .collect();
                series.push((token.token_id.clone(), market.condition_id.clone(), bars));
            }
        }
        series.sort_by(|a, b| a.0.cmp(&b.0));
        series
    }
}
