pub mod backtest;
pub mod commands;
pub mod indicators;
pub mod models;
pub mod optimization;
pub mod param_utils;
pub mod params_store;
pub mod performance;
pub mod stored_data;
pub mod strategy;
