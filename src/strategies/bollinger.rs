use crate::backtest::BacktestContext;
use crate::indicators::{RollingSma, RollingStdDev};
use crate::models::Bar;
use crate::optimization::ParamConfig;
use crate::param_utils::{get_param_bool, get_param_f64, get_param_usize};
use crate::strategy::Strategy;
use log::debug;
use std::collections::HashMap;

const FEE_BUFFER: f64 = 0.995;

struct TokenState {
    sma: RollingSma,
    std_dev: RollingStdDev,
}

/// Bollinger band mean reversion: buy a touch of the lower band, sell a
/// touch of the upper band. The mean_reversion switch gates the band
/// rules; the stop loss and trailing stop stay active either way.
pub struct BollingerBandsStrategy {
    period: usize,
    std_dev_multiplier: f64,
    stop_loss: f64,
    trailing_stop: bool,
    risk_percent: f64,
    mean_reversion: bool,
    state: HashMap<String, TokenState>,
    buy_price: HashMap<String, f64>,
    highest_price: HashMap<String, f64>,
}

impl BollingerBandsStrategy {
    pub fn new(params: HashMap<String, f64>) -> Self {
        BollingerBandsStrategy {
            period: get_param_usize(&params, "period", 20, 2),
            std_dev_multiplier: get_param_f64(&params, "std_dev_multiplier", 2.0),
            stop_loss: get_param_f64(&params, "stop_loss", 0.03),
            trailing_stop: get_param_bool(&params, "trailing_stop", true),
            risk_percent: get_param_f64(&params, "risk_percent", 0.15),
            mean_reversion: get_param_bool(&params, "mean_reversion", true),
            state: HashMap::new(),
            buy_price: HashMap::new(),
            highest_price: HashMap::new(),
        }
    }

    pub fn default_params() -> HashMap<String, f64> {
        HashMap::from([
            ("period".to_string(), 20.0),
            ("std_dev_multiplier".to_string(), 2.0),
            ("stop_loss".to_string(), 0.03),
            ("trailing_stop".to_string(), 1.0),
            ("risk_percent".to_string(), 0.15),
            ("mean_reversion".to_string(), 1.0),
        ])
    }

    pub fn param_configs() -> HashMap<String, ParamConfig> {
        HashMap::from([
            (
                "period".to_string(),
                ParamConfig {
                    min: 5.0,
                    max: 50.0,
                    step_size: 1.0,
                    learning_rate: Some(2.0),
                },
            ),
            (
                "std_dev_multiplier".to_string(),
                ParamConfig {
                    min: 0.5,
                    max: 4.0,
                    step_size: 0.25,
                    learning_rate: Some(0.25),
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
            (
                "mean_reversion".to_string(),
                ParamConfig {
                    min: 0.0,
                    max: 1.0,
                    step_size: 1.0,
                    learning_rate: None,
                },
            ),
        ])
    }

    fn forget(&mut self, token_id: &str) {
        self.buy_price.remove(token_id);
        self.highest_price.remove(token_id);
    }
}

impl Strategy for BollingerBandsStrategy {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn on_init(&mut self, _ctx: &mut BacktestContext) {
        debug!(
            "bollinger: period {}, mult {:.2}, stop {:.3}, trailing {}, risk {:.2}, mean_reversion {}",
            self.period,
            self.std_dev_multiplier,
            self.stop_loss,
            self.trailing_stop,
            self.risk_percent,
            self.mean_reversion
        );
    }

    fn on_next(&mut self, ctx: &mut BacktestContext, bar: &Bar) {
        let period = self.period;
        let state = self
            .state
            .entry(bar.token_id.clone())
            .or_insert_with(|| TokenState {
                sma: RollingSma::new(period),
                std_dev: RollingStdDev::new(period),
            });
        state.sma.update(bar.close);
        state.std_dev.update(bar.close);

        let bands = match (state.sma.value(), state.std_dev.value()) {
            (Some(mid), Some(sd)) => Some((
                mid - self.std_dev_multiplier * sd,
                mid + self.std_dev_multiplier * sd,
            )),
            _ => None,
        };

        let holding = ctx
            .position(&bar.token_id)
            .map(|p| p.size > 0.0)
            .unwrap_or(false);

        if holding {
            if let Some(&entry) = self.buy_price.get(&bar.token_id) {
                if bar.close <= entry * (1.0 - self.stop_loss) {
                    debug!(
                        "bollinger: stop loss on {} at {:.4}",
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
                            "bollinger: trailing stop on {} at {:.4}",
                            bar.token_id, bar.close
                        );
                        ctx.close(&bar.token_id);
                        self.forget(&bar.token_id);
                        return;
                    }
                }
            }

            if let (true, Some((_, upper))) = (self.mean_reversion, bands) {
                if bar.close >= upper {
                    debug!(
                        "bollinger: upper band exit on {} at {:.4}",
                        bar.token_id, bar.close
                    );
                    ctx.close(&bar.token_id);
                    self.forget(&bar.token_id);
                }
            }
        } else if self.mean_reversion {
            if let Some((lower, _)) = bands {
                if bar.close > 0.0 && bar.close <= lower {
                    let cash = ctx.capital() * self.risk_percent * FEE_BUFFER;
                    let size = cash / bar.close;
                    if size > 0.0 {
                        let result = ctx.buy(&bar.token_id, size);
                        if result.success {
                            debug!(
                                "bollinger: lower band entry on {} at {:.4}, size {:.2}",
                                bar.token_id, bar.close, size
                            );
                            self.buy_price.insert(bar.token_id.clone(), bar.close);
                            self.highest_price.insert(bar.token_id.clone(), bar.close);
                        }
                    }
                }
            }
        }
    }
}
