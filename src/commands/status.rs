//! Status command implementation
//!
//! Read-only view over the state store: the day's watchdog state, per-symbol
//! threshold crossings, and the trade event journal. Optionally exports the
//! whole day as JSON.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};

use anchor_trader::config::Config;
use anchor_trader::state_store::create_state_store;

pub fn run(config_path: String, day: Option<String>, export: Option<String>) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;
    let server_tz = config.schedule.server_tz()?;

    let day = match day {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .with_context(|| format!("Invalid day '{}', expected YYYY-MM-DD", s))?,
        None => Utc::now().with_timezone(&server_tz).date_naive(),
    };

    let store = create_state_store(&config.state)?;
    let state = store.day_state(day)?;
    let thresholds = store.threshold_states_for_day(day)?;
    let events = store.events_for_day(day)?;

    println!("\n{}", "=".repeat(60));
    println!("STATUS for {} (server day)", day);
    println!("{}", "=".repeat(60));
    println!("  State DB:   {}", store.path().display());
    println!(
        "  Watchdog:   {}",
        if state.locked {
            format!(
                "LOCKED ({})",
                state.lock_reason.as_deref().unwrap_or("no reason recorded")
            )
        } else {
            "open".to_string()
        }
    );
    println!("  Max PnL:    {:.2} USD", state.max_total_pnl);
    println!("{}", "=".repeat(60));

    if thresholds.is_empty() {
        println!("  No threshold crossings recorded.");
    } else {
        println!("  Threshold crossings:");
        for (symbol, ts) in &thresholds {
            let first = ts
                .first_threshold_at
                .map(|t| t.format("%H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string());
            let second = ts
                .second_threshold_at
                .map(|t| t.format("%H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("    {:<8} T1 {:<14} T2 {:<14}", symbol.as_str(), first, second);
        }
    }
    println!("{}", "=".repeat(60));

    if events.is_empty() {
        println!("  No trade events recorded.");
    } else {
        println!("  Trade events ({}):", events.len());
        for ev in &events {
            println!(
                "    {} {:<8} {:<18} {:<12} pnl {:>10.2}",
                ev.ts.format("%H:%M:%S"),
                ev.symbol.as_str(),
                ev.event,
                ev.action.to_string(),
                ev.total_pnl
            );
        }
    }
    println!("{}\n", "=".repeat(60));

    if let Some(path) = export {
        store.export_json(day, &path)?;
        println!("Exported day {} to {}\n", day, path);
    }

    Ok(())
}
