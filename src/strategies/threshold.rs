use crate::backtest::BacktestContext;
use crate::models::Bar;
use crate::optimization::ParamConfig;
use crate::param_utils::{get_param_bool, get_param_f64};
use crate::strategy::Strategy;
use log::debug;
use std::collections::HashMap;

// Cash headroom left for the taker fee when sizing an entry.
const FEE_BUFFER: f64 = 0.995;

/// Buys outcome tokens trading below an entry threshold and exits when
/// the price recovers above the exit threshold, with a stop loss and an
/// optional trailing stop underneath.
pub struct ThresholdStrategy {
    entry_below: f64,
    exit_above: f64,
    stop_loss: f64,
    trailing_stop: bool,
    risk_percent: f64,
    buy_price: HashMap<String, f64>,
    highest_price: HashMap<String, f64>,
}

impl ThresholdStrategy {
    pub fn new(params: HashMap<String, f64>) -> Self {
        ThresholdStrategy {
            entry_below: get_param_f64(&params, "entry_below", 0.15),
            exit_above: get_param_f64(&params, "exit_above", 0.45),
            stop_loss: get_param_f64(&params, "stop_loss", 0.05),
            trailing_stop: get_param_bool(&params, "trailing_stop", false),
            risk_percent: get_param_f64(&params, "risk_percent", 0.1),
            buy_price: HashMap::new(),
            highest_price: HashMap::new(),
        }
    }

    pub fn default_params() -> HashMap<String, f64> {
        HashMap::from([
            ("entry_below".to_string(), 0.15),
            ("exit_above".to_string(), 0.45),
            ("stop_loss".to_string(), 0.05),
            ("trailing_stop".to_string(), 0.0),
            ("risk_percent".to_string(), 0.1),
        ])
    }

    pub fn param_configs() -> HashMap<String, ParamConfig> {
        HashMap::from([
            (
                "entry_below".to_string(),
                ParamConfig {
                    min: 0.02,
                    max: 0.5,
                    step_size: 0.02,
                    learning_rate: Some(0.05),
                },
            ),
            (
                "exit_above".to_string(),
                ParamConfig {
                    min: 0.1,
                    max: 0.95,
                    step_size: 0.05,
                    learning_rate: Some(0.05),
                },
            ),
            (
                "stop_loss".to_string(),
                ParamConfig {
                    min: 0.01,
                    max: 0.2,
                    step_size: 0.01,
                    learning_rate: Some(0.02),
                },
            ),
            (
                "trailing_stop".to_string(),
                ParamConfig {
                    min: 0.0,
                    max: 1.0,
                    step_size: 1.0,
                    learning_rate: None,
                },
            ),
            (
                "risk_percent".to_string(),
                ParamConfig {
                    min: 0.01,
                    max: 0.5,
                    step_size: 0.01,
                    learning_rate: Some(0.05),
                },
            ),
        ])
    }

    fn forget(&mut self, token_id: &str) {
        self.buy_price.remove(token_id);
        self.highest_price.remove(token_id);
    }
}

impl Strategy for ThresholdStrategy {
    fn name(&self) -> &str {
        "threshold"
    }

    fn on_init(&mut self, _ctx: &mut BacktestContext) {
        debug!(
            "threshold: entry below {:.3}, exit above {:.3}, stop {:.3}, trailing {}, risk {:.2}",
            self.entry_below, self.exit_above, self.stop_loss, self.trailing_stop, self.risk_percent
        );
    }

    fn on_next(&mut self, ctx: &mut BacktestContext, bar: &Bar) {
        let holding = ctx
            .position(&bar.token_id)
            .map(|p| p.size > 0.0)
            .unwrap_or(false);

        if holding {
            if let Some(&entry) = self.buy_price.get(&bar.token_id) {
                let stop_price = entry * (1.0 - self.stop_loss);
                if bar.close <= stop_price {
                    debug!(
                        "threshold: stop loss on {} at {:.4}",
                        bar.token_id, bar.close
                    );
                    ctx.close(&bar.token_id);
                    self.forget(&bar.token_id);
                    return;
                }

                if self.trailing_stop {
                    let highest = self
                        .highest_price
                        .get(&bar.token_id)
                        .copied()
                        .unwrap_or(bar.close)
                        .max(bar.close);
                    self.highest_price.insert(bar.token_id.clone(), highest);

                    let trailing_price = highest * (1.0 - self.stop_loss);
                    if bar.close <= trailing_price && bar.close > entry {
                        debug!(
                            "threshold: trailing stop on {} at {:.4}",
                            bar.token_id, bar.close
                        );
                        ctx.close(&bar.token_id);
                        self.forget(&bar.token_id);
                        return;
                    }
                }
            }

            if bar.close >= self.exit_above {
                debug!(
                    "threshold: exit on {} at {:.4}",
                    bar.token_id, bar.close
                );
                ctx.close(&bar.token_id);
                self.forget(&bar.token_id);
            }
        } else if bar.close > 0.0 && bar.close <= self.entry_below {
            let cash = ctx.capital() * self.risk_percent * FEE_BUFFER;
            let size = cash / bar.close;
            if size > 0.0 {
                let result = ctx.buy(&bar.token_id, size);
                if result.success {
                    debug!(
                        "threshold: entry on {} at {:.4}, size {:.2}",
                        bar.token_id, bar.close, size
                    );
                    self.buy_price.insert(bar.token_id.clone(), bar.close);
                    self.highest_price.insert(bar.token_id.clone(), bar.close);
                } else {
                    debug!(
                        "threshold: entry rejected on {}: {}",
                        bar.token_id,
                        result.error.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }
}
