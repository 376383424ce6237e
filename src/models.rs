use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One observed quote for an outcome token. `t` is a unix timestamp in
/// seconds, `p` the price in the 0..=1 probability range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub t: i64,
    pub p: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketToken {
    pub token_id: String,
    pub outcome: String,
    pub price: f64,
    pub winner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    #[serde(default)]
    pub description: String,
    pub tokens: Vec<MarketToken>,
    pub active: bool,
    pub closed: bool,
    #[serde(default)]
    pub end_date_iso: Option<String>,
    #[serde(default)]
    pub minimum_order_size: f64,
    #[serde(default)]
    pub tick_size: f64,
    #[serde(default)]
    pub neg_risk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub collected_at: DateTime<Utc>,
    pub version: String,
    pub total_markets: usize,
    pub total_price_points: usize,
}

/// Everything a collection run produces: market definitions plus the
/// per-token price series keyed by token id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredData {
    pub markets: Vec<Market>,
    pub price_history: HashMap<String, Vec<PricePoint>>,
    pub metadata: CollectionMetadata,
}

impl StoredData {
    /// A view of this dataset containing only price points whose
    /// timestamp passes the filter. Markets carry over unchanged.
    pub fn filter_timestamps<F>(&self, keep: F) -> StoredData
    where
        F: Fn(i64) -> bool,
    {
        let mut price_history = HashMap::new();
        let mut total_price_points = 0;
        for (token_id, points) in &self.price_history {
            let kept: Vec<PricePoint> = points.iter().copied().filter(|p| keep(p.t)).collect();
            if !kept.is_empty() {
                total_price_points += kept.len();
                price_history.insert(token_id.clone(), kept);
            }
        }

        StoredData {
            markets: self.markets.clone(),
            price_history,
            metadata: CollectionMetadata {
                total_price_points,
                ..self.metadata.clone()
            },
        }
    }

    pub fn total_price_points(&self) -> usize {
        self.price_history.values().map(|points| points.len()).sum()
    }
}

/// A synthetic OHLC bar built from one quote. Prediction-market history
/// carries a single price per observation, so all four fields match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub token_id: String,
    pub condition_id: String,
}

impl Bar {
    pub fn from_quote(token_id: &str, condition_id: &str, point: PricePoint) -> Self {
        Bar {
            timestamp: point.t,
            open: point.p,
            high: point.p,
            low: point.p,
            close: point.p,
            token_id: token_id.to_string(),
            condition_id: condition_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Outcome of an order attempt. Rejections are values, not errors:
/// strategies inspect `success`/`error` and move on.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub success: bool,
    pub token_id: String,
    pub side: OrderSide,
    pub size: f64,
    pub price: f64,
    pub total_cost: f64,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn filled(token_id: &str, side: OrderSide, size: f64, price: f64, total_cost: f64) -> Self {
        OrderResult {
            success: true,
            token_id: token_id.to_string(),
            side,
            size,
            price,
            total_cost,
            error: None,
        }
    }

    pub fn rejected(token_id: &str, side: OrderSide, reason: impl Into<String>) -> Self {
        OrderResult {
            success: false,
            token_id: token_id.to_string(),
            side,
            size: 0.0,
            price: 0.0,
            total_cost: 0.0,
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token_id: String,
    pub size: f64,
    pub avg_price: f64,
    /// Price of the first buy that opened this position; unchanged by
    /// later averaging buys.
    pub entry_price: f64,
    pub current_value: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: i64,
    pub token_id: String,
    pub side: OrderSide,
    pub size: f64,
    pub price: f64,
    pub total_cost: f64,
    pub position_size_after: f64,
    pub capital_after: f64,
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub fee_rate: f64,
    /// Suppresses per-run info logging; optimizers run thousands of
    /// backtests and only want the fitness back.
    pub quiet: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 1000.0,
            fee_rate: 0.0,
            quiet: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub total_return_percent: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_percent: f64,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    pub open_positions: Vec<Position>,
    pub trade_history: Vec<TradeRecord>,
}

/// One parameter set queued for a worker thread.
#[derive(Debug, Clone)]
pub struct EvalTask {
    pub index: usize,
    pub params: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub index: usize,
    pub fitness: f64,
}
