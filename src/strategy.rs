use crate::backtest::BacktestContext;
use crate::models::Bar;
use crate::optimization::ParamConfig;
use anyhow::Result;
use std::collections::HashMap;

/// Trading rules driven bar by bar by the engine. Implementations keep
/// their own indicator state; a fresh instance is built per run.
pub trait Strategy: Send {
    fn name(&self) -> &str;
    fn on_init(&mut self, _ctx: &mut BacktestContext) {}
    fn on_next(&mut self, ctx: &mut BacktestContext, bar: &Bar);
    fn on_complete(&mut self, _ctx: &mut BacktestContext) {}
}

#[path = "strategies/threshold.rs"]
pub mod threshold;

pub use threshold::ThresholdStrategy;

#[path = "strategies/ma_crossover.rs"]
pub mod ma_crossover;

pub use ma_crossover::MaCrossoverStrategy;

#[path = "strategies/bollinger.rs"]
pub mod bollinger;

pub use bollinger::BollingerBandsStrategy;

pub const STRATEGY_IDS: &[&str] = &["threshold", "ma_crossover", "bollinger"];

pub fn create_strategy(
    strategy_id: &str,
    parameters: HashMap<String, f64>,
) -> Result<Box<dyn Strategy + Send>> {
    match strategy_id {
        "threshold" => Ok(Box::new(ThresholdStrategy::new(parameters))),
        "ma_crossover" => Ok(Box::new(MaCrossoverStrategy::new(parameters))),
        "bollinger" => Ok(Box::new(BollingerBandsStrategy::new(parameters))),
        _ => Err(anyhow::anyhow!("Unknown strategy: {}", strategy_id)),
    }
}

pub fn default_params(strategy_id: &str) -> Result<HashMap<String, f64>> {
    match strategy_id {
        "threshold" => Ok(ThresholdStrategy::default_params()),
        "ma_crossover" => Ok(MaCrossoverStrategy::default_params()),
        "bollinger" => Ok(BollingerBandsStrategy::default_params()),
        _ => Err(anyhow::anyhow!("Unknown strategy: {}", strategy_id)),
    }
}

pub fn param_configs(strategy_id: &str) -> Result<HashMap<String, ParamConfig>> {
    match strategy_id {
        "threshold" => Ok(ThresholdStrategy::param_configs()),
        "ma_crossover" => Ok(MaCrossoverStrategy::param_configs()),
        "bollinger" => Ok(BollingerBandsStrategy::param_configs()),
        _ => Err(anyhow::anyhow!("Unknown strategy: {}", strategy_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_covers_every_registered_strategy() {
        for id in STRATEGY_IDS {
            let params = default_params(id).unwrap();
            let strategy = create_strategy(id, params).unwrap();
            assert_eq!(strategy.name(), *id);
            assert!(!param_configs(id).unwrap().is_empty());
        }
    }

    #[test]
    fn factory_rejects_unknown_ids() {
        assert!(create_strategy("nope", HashMap::new()).is_err());
        assert!(default_params("nope").is_err());
        assert!(param_configs("nope").is_err());
    }

    #[test]
    fn default_params_sit_inside_their_configs() {
        for id in STRATEGY_IDS {
            let defaults = default_params(id).unwrap();
            let configs = param_configs(id).unwrap();
            for (name, config) in &configs {
                let value = defaults[name];
                assert!(
                    value >= config.min && value <= config.max,
                    "{}::{} default {} outside [{}, {}]",
                    id,
                    name,
                    value,
                    config.min,
                    config.max
                );
            }
        }
    }
}
