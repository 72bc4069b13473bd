//! Backtest command implementation
//!
//! Replays historical CSV ticks through the threshold plus hedge model on
//! a 5 minute grid and writes per-day logs, per-symbol CSVs, and the
//! combined run report.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use anchor_trader::backtest::{run_backtest_for_symbol, write_combined_outputs};
use anchor_trader::config::Config;
use anchor_trader::data;

pub fn run(config_path: String, data_dir: Option<String>, output: Option<String>) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;

    let data_dir = PathBuf::from(data_dir.unwrap_or_else(|| config.backtest.data_dir.clone()));
    let out_root = PathBuf::from(output.unwrap_or_else(|| config.backtest.results_dir.clone()));
    let server_tz = config.schedule.server_tz()?;

    info!("Loading ticks from {}", data_dir.display());
    let series = data::load_all(&data_dir, server_tz)?;

    // Resample each file up front so the bar runs over replay days. Files
    // whose symbol has no replay parameters are skipped, as is each file's
    // contribution when a symbol repeats.
    let mut jobs = Vec::new();
    let mut skipped = 0usize;
    for s in &series {
        match config.backtest.symbols.get(s.symbol.as_str()) {
            Some(cfg) => {
                let prices_5m = data::resample_5m(&s.samples);
                let days = data::split_by_server_day(&prices_5m).len();
                jobs.push((s, cfg, prices_5m, days));
            }
            None => {
                warn!(
                    "No replay parameters for {}, skipping {}",
                    s.symbol,
                    s.path.display()
                );
                skipped += 1;
            }
        }
    }

    if jobs.is_empty() {
        info!("No files matched a configured symbol. Check data availability.");
        return Ok(());
    }

    let total_days: usize = jobs.iter().map(|j| j.3).sum();

    println!("\n{}", "=".repeat(60));
    println!("THRESHOLD REPLAY (5m)");
    println!("{}", "=".repeat(60));
    println!("  Inputs:   {}", data_dir.display());
    println!("  Outputs:  {}", out_root.display());
    println!("  Files:    {} matched, {} skipped", jobs.len(), skipped);
    println!("  Days:     {}", total_days);
    println!("{}\n", "=".repeat(60));

    fs::create_dir_all(&out_root)
        .with_context(|| format!("Failed to create {}", out_root.display()))?;

    let pb = ProgressBar::new(total_days as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} days [{elapsed}<{eta}] {msg}")
            .unwrap()
            .progress_chars("█░ "),
    );

    let mut runs = Vec::new();
    for (s, cfg, prices_5m, days) in &jobs {
        pb.set_message(s.symbol.as_str().to_string());
        let run = run_backtest_for_symbol(prices_5m, cfg, &out_root)?;
        pb.inc(*days as u64);
        runs.push(run);
    }
    pb.finish_with_message(format!("{} files", jobs.len()));
    println!();

    let report = write_combined_outputs(&runs, &data_dir, &out_root)?;

    println!("\n{}", "=".repeat(60));
    println!("REPLAY SUMMARY");
    println!("{}", "=".repeat(60));
    for run in &runs {
        let pnl: f64 = run.trades.iter().map(|t| t.profit_usd).sum();
        println!(
            "  {:<8} {:>5} days {:>6} legs {:>14.2} USD",
            run.symbol,
            run.summaries.len(),
            run.trades.len(),
            pnl
        );
    }
    println!("{}", "=".repeat(60));
    println!("  Symbols:  {}", report.symbols_processed.join(", "));
    println!("  Days:     {}", report.total_days);
    println!("  Legs:     {}", report.total_legs);
    println!("  Net PnL:  {:.2} USD", report.net_pnl_usd);
    println!("  Report:   {}", out_root.join("report.json").display());
    println!("{}\n", "=".repeat(60));

    Ok(())
}
