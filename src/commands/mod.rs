pub mod backtest;
pub mod export_data;
pub mod optimize;
