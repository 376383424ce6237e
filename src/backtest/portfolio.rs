use crate::models::{OrderResult, OrderSide, Position, TradeRecord};
use std::collections::HashMap;

/// Cash, open positions and the trade log for one simulation run. Every
/// order either fills in full at the given price or comes back as a
/// rejected `OrderResult`; the ledger never goes negative.
#[derive(Debug, Clone)]
pub struct Portfolio {
    capital: f64,
    initial_capital: f64,
    fee_rate: f64,
    positions: HashMap<String, Position>,
    trade_history: Vec<TradeRecord>,
}

impl Portfolio {
    pub fn new(initial_capital: f64, fee_rate: f64) -> Self {
        Portfolio {
            capital: initial_capital,
            initial_capital,
            fee_rate,
            positions: HashMap::new(),
            trade_history: Vec::new(),
        }
    }

    pub fn buy(&mut self, token_id: &str, size: f64, price: f64, timestamp: i64) -> OrderResult {
        if size <= 0.0 || !size.is_finite() {
            return OrderResult::rejected(token_id, OrderSide::Buy, "invalid size");
        }
        if price <= 0.0 || !price.is_finite() {
            return OrderResult::rejected(token_id, OrderSide::Buy, "invalid price");
        }

        let total_cost = size * price * (1.0 + self.fee_rate);
        if total_cost > self.capital {
            return OrderResult::rejected(
                token_id,
                OrderSide::Buy,
                format!(
                    "insufficient capital: need {:.4}, have {:.4}",
                    total_cost, self.capital
                ),
            );
        }

        self.capital -= total_cost;

        let position = self
            .positions
            .entry(token_id.to_string())
            .or_insert_with(|| Position {
                token_id: token_id.to_string(),
                size: 0.0,
                avg_price: 0.0,
                entry_price: price,
                current_value: 0.0,
                pnl: 0.0,
            });
        let new_size = position.size + size;
        position.avg_price = (position.size * position.avg_price + size * price) / new_size;
        position.size = new_size;
        position.current_value = position.size * price;
        position.pnl = position.current_value - position.size * position.avg_price;
        let position_size_after = position.size;

        self.trade_history.push(TradeRecord {
            timestamp,
            token_id: token_id.to_string(),
            side: OrderSide::Buy,
            size,
            price,
            total_cost,
            position_size_after,
            capital_after: self.capital,
        });

        OrderResult::filled(token_id, OrderSide::Buy, size, price, total_cost)
    }

    pub fn sell(&mut self, token_id: &str, size: f64, price: f64, timestamp: i64) -> OrderResult {
        if size <= 0.0 || !size.is_finite() {
            return OrderResult::rejected(token_id, OrderSide::Sell, "invalid size");
        }
        if price <= 0.0 || !price.is_finite() {
            return OrderResult::rejected(token_id, OrderSide::Sell, "invalid price");
        }

        let proceeds = size * price * (1.0 - self.fee_rate);
        let position_size_after = match self.positions.get_mut(token_id) {
            None => {
                return OrderResult::rejected(token_id, OrderSide::Sell, "no position");
            }
            Some(position) => {
                if size > position.size {
                    return OrderResult::rejected(
                        token_id,
                        OrderSide::Sell,
                        format!(
                            "insufficient position: have {:.4}, selling {:.4}",
                            position.size, size
                        ),
                    );
                }
                position.size -= size;
                position.current_value = position.size * price;
                position.pnl = position.current_value - position.size * position.avg_price;
                position.size
            }
        };
        self.capital += proceeds;
        if position_size_after <= 0.0 {
            self.positions.remove(token_id);
        }

        self.trade_history.push(TradeRecord {
            timestamp,
            token_id: token_id.to_string(),
            side: OrderSide::Sell,
            size,
            price,
            total_cost: proceeds,
            position_size_after,
            capital_after: self.capital,
        });

        OrderResult::filled(token_id, OrderSide::Sell, size, price, proceeds)
    }

    /// Sell the full position at the given price.
    pub fn close(&mut self, token_id: &str, price: f64, timestamp: i64) -> OrderResult {
        let size = match self.positions.get(token_id) {
            Some(position) => position.size,
            None => {
                return OrderResult::rejected(token_id, OrderSide::Sell, "no position");
            }
        };
        self.sell(token_id, size, price, timestamp)
    }

    /// Mark open positions to the latest prices. Tokens missing from the
    /// map keep their previous valuation.
    pub fn update_position_values(&mut self, prices: &HashMap<String, f64>) {
        for (token_id, position) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(token_id) {
                position.current_value = position.size * price;
                position.pnl = position.current_value - position.size * position.avg_price;
            }
        }
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn position(&self, token_id: &str) -> Option<&Position> {
        self.positions.get(token_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.trade_history
    }

    /// Cash plus open positions at their last marked values.
    pub fn total_value(&self) -> f64 {
        self.capital
            + self
                .positions
                .values()
                .map(|position| position.current_value)
                .sum::<f64>()
    }

    pub fn total_pnl(&self) -> f64 {
        self.total_value() - self.initial_capital
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_debits_cost_plus_fee() {
        let mut portfolio = Portfolio::new(1000.0, 0.002);
        let result = portfolio.buy("tok", 100.0, 0.5, 1);

        assert!(result.success);
        assert!((result.total_cost - 50.1).abs() < 1e-9);
        assert!((portfolio.capital() - 949.9).abs() < 1e-9);
        let position = portfolio.position("tok").unwrap();
        assert!((position.size - 100.0).abs() < 1e-12);
        assert!((position.avg_price - 0.5).abs() < 1e-12);
    }

    #[test]
    fn buy_rejects_when_cost_exceeds_cash() {
        let mut portfolio = Portfolio::new(10.0, 0.0);
        let result = portfolio.buy("tok", 100.0, 0.5, 1);

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("insufficient capital"));
        assert_eq!(portfolio.capital(), 10.0);
        assert!(portfolio.position("tok").is_none());
        assert!(portfolio.trade_history().is_empty());
    }

    #[test]
    fn buys_average_into_vwap() {
        let mut portfolio = Portfolio::new(1000.0, 0.0);
        portfolio.buy("tok", 100.0, 0.4, 1);
        portfolio.buy("tok", 100.0, 0.6, 2);

        let position = portfolio.position("tok").unwrap();
        assert!((position.avg_price - 0.5).abs() < 1e-12);
        assert!((position.size - 200.0).abs() < 1e-12);
    }

    #[test]
    fn sell_rejects_oversized_orders() {
        let mut portfolio = Portfolio::new(1000.0, 0.0);
        portfolio.buy("tok", 50.0, 0.5, 1);
        let result = portfolio.sell("tok", 60.0, 0.5, 2);

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("insufficient position"));
        assert!((portfolio.position("tok").unwrap().size - 50.0).abs() < 1e-12);
    }

    #[test]
    fn full_roundtrip_without_fees_restores_capital() {
        let mut portfolio = Portfolio::new(1000.0, 0.0);
        portfolio.buy("tok", 200.0, 0.25, 1);
        let result = portfolio.close("tok", 0.25, 2);

        assert!(result.success);
        assert!((portfolio.capital() - 1000.0).abs() < 1e-9);
        assert!(portfolio.position("tok").is_none());
        assert_eq!(portfolio.trade_history().len(), 2);
    }

    #[test]
    fn sell_without_position_is_rejected() {
        let mut portfolio = Portfolio::new(1000.0, 0.0);
        let result = portfolio.sell("tok", 10.0, 0.5, 1);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no position"));
    }

    #[test]
    fn mark_to_market_updates_value_and_pnl() {
        let mut portfolio = Portfolio::new(1000.0, 0.0);
        portfolio.buy("tok", 100.0, 0.5, 1);

        let mut prices = HashMap::new();
        prices.insert("tok".to_string(), 0.7);
        portfolio.update_position_values(&prices);

        let position = portfolio.position("tok").unwrap();
        assert!((position.current_value - 70.0).abs() < 1e-9);
        assert!((position.pnl - 20.0).abs() < 1e-9);
        assert!((portfolio.total_value() - 1020.0).abs() < 1e-9);
    }
}
