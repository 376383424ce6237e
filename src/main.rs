use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use polybt::commands::{backtest, export_data, optimize};
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_PARAMS_DIR: &str = "params";

#[derive(Parser)]
#[command(name = "polybt")]
#[command(about = "Backtest and optimize prediction market strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest with saved or default parameters
    Backtest {
        /// Strategy to run (threshold, ma_crossover, bollinger)
        strategy_id: String,
        /// Directory holding the chunked dataset
        #[arg(long = "data-dir", value_name = "PATH", default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
        /// Directory holding optimized parameter files
        #[arg(long = "params-dir", value_name = "PATH", default_value = DEFAULT_PARAMS_DIR)]
        params_dir: PathBuf,
        /// Starting capital
        #[arg(long, default_value_t = 1000.0)]
        initial_capital: f64,
        /// Taker fee applied to both sides of every fill
        #[arg(long, default_value_t = 0.002)]
        fee_rate: f64,
    },
    /// Search for better strategy parameters
    Optimize {
        /// Strategy to optimize (threshold, ma_crossover, bollinger)
        strategy_id: String,
        /// Search algorithm
        #[arg(long, value_enum, default_value_t = optimize::Algorithm::Bayesian)]
        algorithm: optimize::Algorithm,
        /// Directory holding the chunked dataset
        #[arg(long = "data-dir", value_name = "PATH", default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
        /// Directory for optimized parameter files
        #[arg(long = "params-dir", value_name = "PATH", default_value = DEFAULT_PARAMS_DIR)]
        params_dir: PathBuf,
        /// Iteration cap for the search
        #[arg(long, default_value_t = 100)]
        max_iterations: usize,
        /// Fixed RNG seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Write a synthetic dataset for offline runs
    ExportData {
        /// Destination directory for the dataset
        #[arg(short, long = "output", value_name = "PATH", default_value = DEFAULT_DATA_DIR)]
        output: PathBuf,
        /// RNG seed for the generated price paths
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting polybt. Backtests are not a promise of live performance.");

    match cli.command {
        Commands::Backtest {
            strategy_id,
            data_dir,
            params_dir,
            initial_capital,
            fee_rate,
        } => backtest::run(
            &strategy_id,
            &data_dir,
            &params_dir,
            initial_capital,
            fee_rate,
        ),
        Commands::Optimize {
            strategy_id,
            algorithm,
            data_dir,
            params_dir,
            max_iterations,
            seed,
        } => optimize::run(
            &strategy_id,
            &data_dir,
            &params_dir,
            algorithm,
            max_iterations,
            seed,
        ),
        Commands::ExportData { output, seed } => export_data::run(&output, seed),
    }
}
