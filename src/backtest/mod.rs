pub mod engine;
pub mod portfolio;

pub use engine::{BacktestContext, BacktestEngine};
pub use portfolio::Portfolio;
