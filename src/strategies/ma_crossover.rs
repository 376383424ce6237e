use crate::backtest::BacktestContext;
use crate::indicators::{CrossoverDetector, RollingSma};
use crate::models::Bar;
use crate::optimization::ParamConfig;
use crate::param_utils::{get_param_bool, get_param_f64, get_param_usize};
use crate::strategy::Strategy;
use log::debug;
use std::collections::HashMap;

const FEE_BUFFER: f64 = 0.995;

struct TokenState {
    fast: RollingSma,
    slow: RollingSma,
    cross: CrossoverDetector,
}

/// Classic fast/slow SMA crossover, tracked independently per token.
/// An upward cross enters, a downward cross exits; stop loss and an
/// optional trailing stop guard the position in between.
pub struct MaCrossoverStrategy {
    fast_period: usize,
    slow_period: usize,
    stop_loss: f64,
    trailing_stop: bool,
    risk_percent: f64,
    state: HashMap<String, TokenState>,
    buy_price: HashMap<String, f64>,
    highest_price: HashMap<String, f64>,
}

impl MaCrossoverStrategy {
    pub fn new(params: HashMap<String, f64>) -> Self {
        let mut fast_period = get_param_usize(&params, "fast_period", 5, 1);
        let mut slow_period = get_param_usize(&params, "slow_period", 20, 2);
        // An inverted pair is a labeling mistake, not a different strategy.
        if fast_period > slow_period {
            std::mem::swap(&mut fast_period, &mut slow_period);
        }
        if fast_period == slow_period {
            slow_period = fast_period + 1;
        }

        MaCrossoverStrategy {
            fast_period,
            slow_period,
            stop_loss: get_param_f64(&params, "stop_loss", 0.05),
            trailing_stop: get_param_bool(&params, "trailing_stop", false),
            risk_percent: get_param_f64(&params, "risk_percent", 0.1),
            state: HashMap::new(),
            buy_price: HashMap::new(),
            highest_price: HashMap::new(),
        }
    }

    pub fn default_params() -> HashMap<String, f64> {
        HashMap::from([
            ("fast_period".to_string(), 5.0),
            ("slow_period".to_string(), 20.0),
            ("stop_loss".to_string(), 0.05),
            ("trailing_stop".to_string(), 0.0),
            ("risk_percent".to_string(), 0.1),
        ])
    }

    pub fn param_configs() -> HashMap<String, ParamConfig> {
        HashMap::from([
            (
                "fast_period".to_string(),
                ParamConfig {
                    min: 2.0,
                    max: 50.0,
                    step_size: 1.0,
                    learning_rate: Some(2.0),
                },
            ),
            (
                "slow_period".to_string(),
                ParamConfig {
                    min: 5.0,
                    max: 200.0,
                    step_size: 5.0,
                    learning_rate: Some(5.0),
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

impl Strategy for MaCrossoverStrategy {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn on_init(&mut self, _ctx: &mut BacktestContext) {
        debug!(
            "ma_crossover: fast {}, slow {}, stop {:.3}, trailing {}, risk {:.2}",
            self.fast_period, self.slow_period, self.stop_loss, self.trailing_stop,
            self.risk_percent
        );
    }

    fn on_next(&mut self, ctx: &mut BacktestContext, bar: &Bar) {
        let fast_period = self.fast_period;
        let slow_period = self.slow_period;
        let state = self
            .state
            .entry(bar.token_id.clone())
            .or_insert_with(|| TokenState {
                fast: RollingSma::new(fast_period),
                slow: RollingSma::new(slow_period),
                cross: CrossoverDetector::new(),
            });
        state.fast.update(bar.close);
        state.slow.update(bar.close);
        let signal = state.cross.update(state.fast.value(), state.slow.value());

        let holding = ctx
            .position(&bar.token_id)
            .map(|p| p.size > 0.0)
            .unwrap_or(false);

        if holding {
            if let Some(&entry) = self.buy_price.get(&bar.token_id) {
                if bar.close <= entry * (1.0 - self.stop_loss) {
                    debug!(
                        "ma_crossover: stop loss on {} at {:.4}",
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

                    if bar.close <= highest * (1.0 - self.stop_loss) && bar.close > entry {
                        debug!(
                            "ma_crossover: trailing stop on {} at {:.4}",
                            bar.token_id, bar.close
                        );
                        ctx.close(&bar.token_id);
                        self.forget(&bar.token_id);
                        return;
                    }
                }
            }

            if signal < 0 {
                debug!(
                    "ma_crossover: downward cross, exit {} at {:.4}",
                    bar.token_id, bar.close
                );
                ctx.close(&bar.token_id);
                self.forget(&bar.token_id);
            }
        } else if signal > 0 && bar.close > 0.0 {
            let cash = ctx.capital() * self.risk_percent * FEE_BUFFER;
            let size = cash / bar.close;
            if size > 0.0 {
                let result = ctx.buy(&bar.token_id, size);
                if result.success {
                    debug!(
                        "ma_crossover: upward cross, entry {} at {:.4}, size {:.2}",
                        bar.token_id, bar.close, size
                    );
                    self.buy_price.insert(bar.token_id.clone(), bar.close);
                    self.highest_price.insert(bar.token_id.clone(), bar.close);
                }
            }
        }
    }
}
