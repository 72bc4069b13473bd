//! Hedge-policy replay over five-minute samples
//!
//! Replays each server-calendar day independently: the first sample anchors
//! the day, an entry opens inside the threshold window, a retrace through the
//! anchor opens a double-lot hedge and combined-profit rules close both legs.
//! Anything still open at end of day is marked to market and force-closed.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use itertools::Itertools;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::config::BacktestSymbolConfig;
use crate::data::{split_by_server_day, PriceSample};

// =============================================================================
// Types
// =============================================================================

/// Leg classification in trade logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LegType {
    #[serde(rename = "solo_exit_T2")]
    SoloExitT2,
    #[serde(rename = "hedge_close")]
    HedgeClose,
    #[serde(rename = "eod_close")]
    EodClose,
    #[serde(rename = "eod_close_hedge")]
    EodCloseHedge,
}

impl LegType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegType::SoloExitT2 => "solo_exit_T2",
            LegType::HedgeClose => "hedge_close",
            LegType::EodClose => "eod_close",
            LegType::EodCloseHedge => "eod_close_hedge",
        }
    }
}

/// Which way a replay leg points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSide {
    Long,
    Short,
}

impl LegSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegSide::Long => "long",
            LegSide::Short => "short",
        }
    }

    fn opposite(&self) -> LegSide {
        match self {
            LegSide::Long => LegSide::Short,
            LegSide::Short => LegSide::Long,
        }
    }
}

/// One closed leg of the replay
#[derive(Debug, Clone, Serialize)]
pub struct TradeLeg {
    pub day: NaiveDate,
    pub symbol: String,
    #[serde(rename = "type")]
    pub leg_type: LegType,
    pub entry_time: DateTime<Tz>,
    pub exit_time: DateTime<Tz>,
    pub direction: LegSide,
    pub entry: f64,
    pub exit: f64,
    pub lot: f64,
    pub profit_usd: f64,
}

/// Per-day rollup
#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub day: NaiveDate,
    pub symbol: String,
    pub profit_usd: f64,
    pub num_legs: usize,
    pub wins: usize,
    pub losses: usize,
}

/// Everything one day's replay produced
#[derive(Debug, Clone, Serialize)]
pub struct DayResult {
    pub day: NaiveDate,
    pub summary: DaySummary,
    pub trades: Vec<TradeLeg>,
    pub anchor_price: f64,
    pub num_samples: usize,
}

/// Everything one symbol's replay produced
#[derive(Debug, Clone)]
pub struct SymbolRun {
    pub symbol: String,
    pub trades: Vec<TradeLeg>,
    pub summaries: Vec<DaySummary>,
}

/// Cross-symbol rollup written at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub inputs_dir: String,
    pub outputs_dir: String,
    pub symbols_processed: Vec<String>,
    pub total_days: usize,
    pub total_legs: usize,
    pub net_pnl_usd: f64,
}

#[derive(Debug, Clone, Copy)]
struct OpenTrade {
    side: LegSide,
    entry_time: DateTime<Tz>,
    entry_price: f64,
    lot: f64,
    t2_level: f64,
}

#[derive(Debug, Clone, Copy)]
struct OpenHedge {
    side: LegSide,
    open_time: DateTime<Tz>,
    entry_price: f64,
    lot: f64,
}

// =============================================================================
// Pip Arithmetic
// =============================================================================

fn pips_between(a: f64, b: f64, pip_size: f64) -> f64 {
    (b - a) / pip_size
}

fn price_from_pips(base: f64, pips: f64, pip_size: f64) -> f64 {
    base + pips * pip_size
}

fn pnl_usd(price_diff: f64, pip_size: f64, lot: f64, pip_value_per_lot: f64) -> f64 {
    price_diff / pip_size * pip_value_per_lot * lot
}

// =============================================================================
// Backtester
// =============================================================================

/// Day-by-day replay of the threshold strategy with the hedge policy
pub struct ThresholdHedgeBacktester {
    cfg: BacktestSymbolConfig,
}

impl ThresholdHedgeBacktester {
    pub fn new(cfg: BacktestSymbolConfig) -> Self {
        ThresholdHedgeBacktester { cfg }
    }

    /// Replay one server-calendar day of samples
    ///
    /// The first sample anchors the day. `samples` must be non-empty and
    /// sorted by time.
    pub fn run_day(&self, samples: &[PriceSample]) -> Result<DayResult> {
        let cfg = &self.cfg;
        let first = samples.first().context("Cannot replay an empty day")?;
        let day = first.time.date_naive();
        let start_price = first.price;

        let t1 = cfg.threshold_pips;
        let t2 = t1 * cfg.t2_multiple;
        let up_t1 = price_from_pips(start_price, t1, cfg.pip_size);
        let up_t2 = price_from_pips(start_price, t2, cfg.pip_size);
        let up_max = price_from_pips(start_price, t1 * cfg.spike_tolerance, cfg.pip_size);
        let dn_t1 = price_from_pips(start_price, -t1, cfg.pip_size);
        let dn_t2 = price_from_pips(start_price, -t2, cfg.pip_size);
        let dn_max = price_from_pips(start_price, -t1 * cfg.spike_tolerance, cfg.pip_size);

        let mut open_trade: Option<OpenTrade> = None;
        let mut open_hedge: Option<OpenHedge> = None;
        let mut trades: Vec<TradeLeg> = Vec::new();
        let mut entries_taken: u32 = 0;

        for sample in samples {
            let price = sample.price;
            let ts = sample.time;

            if open_trade.is_none() && entries_taken < cfg.max_trades_per_day {
                if price >= up_t1 && price <= up_max {
                    open_trade = Some(OpenTrade {
                        side: LegSide::Long,
                        entry_time: ts,
                        entry_price: price,
                        lot: cfg.lot_size,
                        t2_level: up_t2,
                    });
                    entries_taken += 1;
                    continue;
                }
                if price <= dn_t1 && price >= dn_max {
                    open_trade = Some(OpenTrade {
                        side: LegSide::Short,
                        entry_time: ts,
                        entry_price: price,
                        lot: cfg.lot_size,
                        t2_level: dn_t2,
                    });
                    entries_taken += 1;
                    continue;
                }
            }

            if let Some(trade) = open_trade {
                if open_hedge.is_none() {
                    let hit_t2 = match trade.side {
                        LegSide::Long => price >= trade.t2_level,
                        LegSide::Short => price <= trade.t2_level,
                    };
                    if hit_t2 {
                        trades.push(self.close_leg(
                            day,
                            LegType::SoloExitT2,
                            trade.side,
                            trade.entry_time,
                            ts,
                            trade.entry_price,
                            price,
                            trade.lot,
                        ));
                        open_trade = None;
                        continue;
                    }

                    let retraced = match trade.side {
                        LegSide::Long => price <= start_price,
                        LegSide::Short => price >= start_price,
                    };
                    if retraced {
                        open_hedge = Some(OpenHedge {
                            side: trade.side.opposite(),
                            open_time: ts,
                            entry_price: price,
                            lot: trade.lot * 2.0,
                        });
                        continue;
                    }
                }
            }

            if let (Some(trade), Some(hedge)) = (open_trade, open_hedge) {
                let pnl_trade = self.leg_pnl(trade.side, trade.entry_price, price, trade.lot);
                let pnl_hedge = self.leg_pnl(hedge.side, hedge.entry_price, price, hedge.lot);
                let hedge_move_pips = match hedge.side {
                    LegSide::Long => pips_between(hedge.entry_price, price, cfg.pip_size),
                    LegSide::Short => pips_between(price, hedge.entry_price, cfg.pip_size),
                };

                let combined = pnl_trade + pnl_hedge;
                let min_move_ok = hedge_move_pips >= cfg.hedge_min_move_pips;
                if combined >= cfg.hedge_close_spike
                    || (combined >= cfg.hedge_close_pref && min_move_ok)
                {
                    trades.push(self.close_leg(
                        day,
                        LegType::HedgeClose,
                        trade.side,
                        trade.entry_time,
                        ts,
                        trade.entry_price,
                        price,
                        trade.lot,
                    ));
                    trades.push(self.close_leg(
                        day,
                        LegType::HedgeClose,
                        hedge.side,
                        hedge.open_time,
                        ts,
                        hedge.entry_price,
                        price,
                        hedge.lot,
                    ));
                    open_trade = None;
                    open_hedge = None;
                }
            }
        }

        if let Some(last) = samples.last() {
            if let Some(trade) = open_trade {
                trades.push(self.close_leg(
                    day,
                    LegType::EodClose,
                    trade.side,
                    trade.entry_time,
                    last.time,
                    trade.entry_price,
                    last.price,
                    trade.lot,
                ));
            }
            if let Some(hedge) = open_hedge {
                trades.push(self.close_leg(
                    day,
                    LegType::EodCloseHedge,
                    hedge.side,
                    hedge.open_time,
                    last.time,
                    hedge.entry_price,
                    last.price,
                    hedge.lot,
                ));
            }
        }

        let profit_usd: f64 = trades.iter().map(|t| t.profit_usd).sum();
        let summary = DaySummary {
            day,
            symbol: cfg.symbol.clone(),
            profit_usd,
            num_legs: trades.len(),
            wins: trades.iter().filter(|t| t.profit_usd > 0.0).count(),
            losses: trades.iter().filter(|t| t.profit_usd < 0.0).count(),
        };
        Ok(DayResult {
            day,
            summary,
            trades,
            anchor_price: start_price,
            num_samples: samples.len(),
        })
    }

    fn leg_pnl(&self, side: LegSide, entry: f64, exit: f64, lot: f64) -> f64 {
        let diff = match side {
            LegSide::Long => exit - entry,
            LegSide::Short => entry - exit,
        };
        pnl_usd(diff, self.cfg.pip_size, lot, self.cfg.pip_value_per_lot)
    }

    #[allow(clippy::too_many_arguments)]
    fn close_leg(
        &self,
        day: NaiveDate,
        leg_type: LegType,
        side: LegSide,
        entry_time: DateTime<Tz>,
        exit_time: DateTime<Tz>,
        entry: f64,
        exit: f64,
        lot: f64,
    ) -> TradeLeg {
        TradeLeg {
            day,
            symbol: self.cfg.symbol.clone(),
            leg_type,
            entry_time,
            exit_time,
            direction: side,
            entry,
            exit,
            lot,
            profit_usd: self.leg_pnl(side, entry, exit, lot),
        }
    }
}

// =============================================================================
// Run Outputs
// =============================================================================

/// Replay a full sample series and write per-day logs plus symbol CSVs
///
/// Produces `{day}.json` for every day, `{symbol}_trades_5m.csv` and
/// `{symbol}_summary_5m.csv` under `out_root/{symbol}/`.
pub fn run_backtest_for_symbol(
    prices_5m: &[PriceSample],
    cfg: &BacktestSymbolConfig,
    out_root: impl AsRef<Path>,
) -> Result<SymbolRun> {
    let backtester = ThresholdHedgeBacktester::new(cfg.clone());
    let logs_dir = out_root.as_ref().join(&cfg.symbol);
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create {}", logs_dir.display()))?;

    let mut trades = Vec::new();
    let mut summaries = Vec::new();
    let days = split_by_server_day(prices_5m);
    for (day, day_samples) in &days {
        let result = backtester.run_day(day_samples)?;
        let log_path = logs_dir.join(format!("{day}.json"));
        fs::write(&log_path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("Failed to write {}", log_path.display()))?;
        trades.extend(result.trades);
        summaries.push(result.summary);
    }

    write_trades_csv(
        &logs_dir.join(format!("{}_trades_5m.csv", cfg.symbol)),
        &trades,
    )?;
    write_summary_csv(
        &logs_dir.join(format!("{}_summary_5m.csv", cfg.symbol)),
        &summaries,
    )?;

    info!(
        "Replayed {} days for {}: {} legs",
        days.len(),
        cfg.symbol,
        trades.len()
    );

    Ok(SymbolRun {
        symbol: cfg.symbol.clone(),
        trades,
        summaries,
    })
}

/// Write the combined CSVs and the run report for a set of symbol runs
pub fn write_combined_outputs(
    runs: &[SymbolRun],
    inputs_dir: &Path,
    out_root: &Path,
) -> Result<RunReport> {
    let all_trades: Vec<TradeLeg> = runs
        .iter()
        .flat_map(|r| r.trades.iter().cloned())
        .collect();
    let all_summaries: Vec<DaySummary> = runs
        .iter()
        .flat_map(|r| r.summaries.iter().cloned())
        .collect();

    write_trades_csv(&out_root.join("all_trades_5m.csv"), &all_trades)?;
    write_summary_csv(&out_root.join("all_summary_5m.csv"), &all_summaries)?;

    let symbols_processed: Vec<String> = all_summaries
        .iter()
        .map(|s| s.symbol.clone())
        .unique()
        .sorted()
        .collect();
    let total_days = all_summaries.iter().map(|s| s.day).unique().count();

    let report = RunReport {
        inputs_dir: inputs_dir.display().to_string(),
        outputs_dir: out_root.display().to_string(),
        symbols_processed,
        total_days,
        total_legs: all_trades.len(),
        net_pnl_usd: all_trades.iter().map(|t| t.profit_usd).sum(),
    };

    let report_path = out_root.join("report.json");
    fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    Ok(report)
}

fn write_trades_csv(path: &Path, trades: &[TradeLeg]) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    writeln!(
        file,
        "day,symbol,type,entry_time,exit_time,direction,entry,exit,lot,profit_usd"
    )?;
    for leg in trades {
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{}",
            leg.day,
            leg.symbol,
            leg.leg_type.as_str(),
            leg.entry_time.to_rfc3339(),
            leg.exit_time.to_rfc3339(),
            leg.direction.as_str(),
            leg.entry,
            leg.exit,
            leg.lot,
            leg.profit_usd
        )?;
    }
    Ok(())
}

fn write_summary_csv(path: &Path, summaries: &[DaySummary]) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    writeln!(file, "day,symbol,profit_usd,num_legs,wins,losses")?;
    for summary in summaries {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            summary.day,
            summary.symbol,
            summary.profit_usd,
            summary.num_legs,
            summary.wins,
            summary.losses
        )?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn xau_cfg() -> BacktestSymbolConfig {
        // threshold 20 pips at 0.1 pip size: entry band [+2.0, +2.5], T2 at +4.0
        BacktestSymbolConfig::new("XAUUSD", 20.0, 0.1, 10.0)
    }

    fn server_tz() -> Tz {
        "Etc/GMT-3".parse().unwrap()
    }

    fn samples_from(hour: u32, prices: &[f64]) -> Vec<PriceSample> {
        let tz = server_tz();
        let start = tz.with_ymd_and_hms(2025, 3, 3, hour, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PriceSample {
                time: start + chrono::Duration::minutes(5 * i as i64),
                price,
            })
            .collect()
    }

    fn day_samples(prices: &[f64]) -> Vec<PriceSample> {
        samples_from(0, prices)
    }

    #[test]
    fn long_entry_exits_solo_at_t2() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        let samples = day_samples(&[2000.0, 2002.2, 2004.5]);

        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.anchor_price, 2000.0);
        assert_eq!(result.trades.len(), 1);

        let leg = &result.trades[0];
        assert_eq!(leg.leg_type, LegType::SoloExitT2);
        assert_eq!(leg.direction, LegSide::Long);
        assert_eq!(leg.entry, 2002.2);
        assert_eq!(leg.exit, 2004.5);
        assert_eq!(leg.entry_time, samples[1].time);
        assert_eq!(leg.exit_time, samples[2].time);
        // 23 pips at $10/pip on 0.5 lots
        assert_abs_diff_eq!(leg.profit_usd, 115.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.summary.profit_usd, 115.0, epsilon = 1e-6);
        assert_eq!(result.summary.num_legs, 1);
        assert_eq!(result.summary.wins, 1);
        assert_eq!(result.summary.losses, 0);
        assert_eq!(result.num_samples, 3);
    }

    #[test]
    fn short_side_mirrors_long() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        let samples = day_samples(&[2000.0, 1997.8, 1995.9]);

        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.trades.len(), 1);
        let leg = &result.trades[0];
        assert_eq!(leg.leg_type, LegType::SoloExitT2);
        assert_eq!(leg.direction, LegSide::Short);
        assert_abs_diff_eq!(leg.profit_usd, 95.0, epsilon = 1e-6);
    }

    #[test]
    fn spike_overshoot_blocks_the_entry() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        // 2002.6 is past the 1.25x tolerance band; 2002.4 is inside it
        let samples = day_samples(&[2000.0, 2002.6, 2002.4, 2004.5]);

        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].entry, 2002.4);
        assert_eq!(result.trades[0].entry_time, samples[2].time);
    }

    #[test]
    fn retrace_opens_a_double_lot_hedge_and_combined_profit_closes_both() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        // Enter long at 2002.2, the retrace to 1999.8 hedges short at 1.0 lot,
        // 1996.0 puts the combined book at +70 which clears the spike level
        let samples = day_samples(&[2000.0, 2002.2, 1999.8, 1998.0, 1996.0]);

        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.trades.len(), 2);

        let trade = &result.trades[0];
        assert_eq!(trade.leg_type, LegType::HedgeClose);
        assert_eq!(trade.direction, LegSide::Long);
        assert_eq!(trade.lot, 0.5);
        assert_abs_diff_eq!(trade.profit_usd, -310.0, epsilon = 1e-6);

        let hedge = &result.trades[1];
        assert_eq!(hedge.leg_type, LegType::HedgeClose);
        assert_eq!(hedge.direction, LegSide::Short);
        assert_eq!(hedge.lot, 1.0);
        assert_eq!(hedge.entry, 1999.8);
        assert_abs_diff_eq!(hedge.profit_usd, 380.0, epsilon = 1e-6);

        assert_eq!(trade.exit_time, hedge.exit_time);
        assert_abs_diff_eq!(result.summary.profit_usd, 70.0, epsilon = 1e-6);
        assert_eq!(result.summary.wins, 1);
        assert_eq!(result.summary.losses, 1);
    }

    #[test]
    fn hedge_needs_its_minimum_move_before_the_preferred_close() {
        // At 1996.5 the combined book sits at +45: past the preferred level
        // but short of the spike. A large minimum move keeps both legs open
        // until the spike level is cleared at 1995.6.
        let mut strict = xau_cfg();
        strict.hedge_min_move_pips = 40.0;
        let path = [2000.0, 2002.2, 1999.8, 1996.5, 1995.6];

        let bt = ThresholdHedgeBacktester::new(strict);
        let samples = day_samples(&path);
        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].exit, 1995.6);

        // With the default minimum move the preferred close fires earlier
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].exit, 1996.5);
    }

    #[test]
    fn open_legs_are_marked_to_market_at_end_of_day() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        let samples = day_samples(&[2000.0, 2002.2, 1999.8, 1999.0]);

        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].leg_type, LegType::EodClose);
        assert_abs_diff_eq!(result.trades[0].profit_usd, -160.0, epsilon = 1e-6);
        assert_eq!(result.trades[1].leg_type, LegType::EodCloseHedge);
        assert_abs_diff_eq!(result.trades[1].profit_usd, 80.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.summary.profit_usd, -80.0, epsilon = 1e-6);
    }

    #[test]
    fn entry_cap_limits_trades_per_day() {
        let path = [2000.0, 2002.2, 2004.5, 2002.2, 2004.5];

        let mut capped = xau_cfg();
        capped.max_trades_per_day = 1;
        let bt = ThresholdHedgeBacktester::new(capped);
        let result = bt.run_day(&day_samples(&path)).unwrap();
        assert_eq!(result.trades.len(), 1);

        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        let result = bt.run_day(&day_samples(&path)).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_abs_diff_eq!(result.summary.profit_usd, 230.0, epsilon = 1e-6);
    }

    #[test]
    fn a_quiet_day_produces_no_legs() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        let samples = day_samples(&[2000.0, 2000.5, 1999.5, 2000.1]);

        let result = bt.run_day(&samples).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.summary.num_legs, 0);
        assert_eq!(result.summary.profit_usd, 0.0);
        assert_eq!(result.anchor_price, 2000.0);
    }

    #[test]
    fn a_day_starting_mid_session_anchors_on_its_first_sample() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        let samples = samples_from(10, &[1980.0, 1982.2, 1984.5]);

        let result = bt.run_day(&samples).unwrap();
        assert_eq!(result.anchor_price, 1980.0);
        assert_eq!(result.trades.len(), 1);
        assert_abs_diff_eq!(result.trades[0].profit_usd, 115.0, epsilon = 1e-6);
    }

    #[test]
    fn empty_day_is_an_error() {
        let bt = ThresholdHedgeBacktester::new(xau_cfg());
        assert!(bt.run_day(&[]).is_err());
    }

    #[test]
    fn symbol_run_writes_day_logs_csvs_and_the_report() {
        let out_root = std::env::temp_dir().join(format!(
            "anchor_trader_backtest_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&out_root).unwrap();

        let tz = server_tz();
        let mut samples = day_samples(&[2000.0, 2002.2, 2004.5]);
        let next_day = tz.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap();
        samples.push(PriceSample { time: next_day, price: 2010.0 });
        samples.push(PriceSample {
            time: next_day + chrono::Duration::minutes(5),
            price: 2010.5,
        });

        let run = run_backtest_for_symbol(&samples, &xau_cfg(), &out_root).unwrap();
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.summaries.len(), 2);

        let day_log = out_root.join("XAUUSD").join("2025-03-03.json");
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&day_log).unwrap()).unwrap();
        assert_eq!(parsed["anchor_price"], 2000.0);
        assert_eq!(parsed["num_samples"], 3);
        assert_eq!(parsed["summary"]["num_legs"], 1);
        assert_eq!(parsed["trades"][0]["type"], "solo_exit_T2");
        assert_eq!(parsed["trades"][0]["direction"], "long");

        let trades_csv =
            std::fs::read_to_string(out_root.join("XAUUSD").join("XAUUSD_trades_5m.csv")).unwrap();
        assert_eq!(trades_csv.lines().count(), 2);
        assert!(trades_csv.starts_with("day,symbol,type,"));

        let report = write_combined_outputs(&[run], Path::new("data"), &out_root).unwrap();
        assert_eq!(report.symbols_processed, vec!["XAUUSD".to_string()]);
        assert_eq!(report.total_days, 2);
        assert_eq!(report.total_legs, 1);
        assert_abs_diff_eq!(report.net_pnl_usd, 115.0, epsilon = 1e-6);
        assert!(out_root.join("all_trades_5m.csv").exists());
        assert!(out_root.join("report.json").exists());
    }
}
