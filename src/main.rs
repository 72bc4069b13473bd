//! Anchor threshold trader - main entry point
//!
//! This binary provides three subcommands:
//! - live: Poll the bridge and trade the daily anchor thresholds
//! - backtest: Replay historical CSV ticks through the threshold model
//! - status: Inspect the state store for a trading day

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "anchor-trader")]
#[command(about = "Anchor-relative threshold trading with hedged backtesting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live polling loop against the bridge
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/anchor_trader.json")]
        config: String,
    },

    /// Replay historical CSV ticks on a 5 minute grid
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/anchor_trader.json")]
        config: String,

        /// Tick CSV directory (overrides config file)
        #[arg(short, long)]
        data_dir: Option<String>,

        /// Output directory (overrides config file)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show the state store for a trading day
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/anchor_trader.json")]
        config: String,

        /// Server day to inspect (YYYY-MM-DD, default today)
        #[arg(short, long)]
        day: Option<String>,

        /// Export the day as JSON to this path
        #[arg(short, long)]
        export: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // File appender
    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        // File layer - same format but without ANSI colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Backtest logs to file only so the console stays clean for the bar
    let (command_name, file_only) = match &cli.command {
        Commands::Live { .. } => ("live", false),
        Commands::Backtest { .. } => ("backtest", true),
        Commands::Status { .. } => ("status", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Live { config } => commands::live::run(config),

        Commands::Backtest {
            config,
            data_dir,
            output,
        } => commands::backtest::run(config, data_dir, output),

        Commands::Status {
            config,
            day,
            export,
        } => commands::status::run(config, day, export),
    }
}
