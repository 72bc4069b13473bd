//! Backtest sample loading
//!
//! Reads raw price CSVs in several layouts, stamps every row in server time
//! and resamples onto the five-minute grid the replay runs on.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::Symbol;

// =============================================================================
// Constants
// =============================================================================

/// Symbols recognized when guessing from a filename (`XAUUSD_2025.csv` etc.)
const KNOWN_SYMBOLS: &[&str] = &["EURUSD", "GBPUSD", "USDJPY", "XAGUSD", "XAUUSD"];

const RESAMPLE_MINUTES: i64 = 5;

// =============================================================================
// Types
// =============================================================================

/// One price observation, stamped in server time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub time: DateTime<Tz>,
    pub price: f64,
}

/// One CSV file parsed into a sample series
#[derive(Debug, Clone)]
pub struct SampleSeries {
    pub path: PathBuf,
    pub symbol: Symbol,
    pub samples: Vec<PriceSample>,
}

/// Which columns supply the price
enum PriceLayout {
    Price(usize),
    Close(usize),
    BidAsk(usize, usize),
}

impl PriceLayout {
    fn detect(columns: &HashMap<String, usize>) -> Option<Self> {
        if let Some(&idx) = columns.get("price") {
            return Some(PriceLayout::Price(idx));
        }
        if ["open", "high", "low"].iter().all(|c| columns.contains_key(*c)) {
            if let Some(&close) = columns.get("close") {
                return Some(PriceLayout::Close(close));
            }
        }
        if let (Some(&bid), Some(&ask)) = (columns.get("bid"), columns.get("ask")) {
            return Some(PriceLayout::BidAsk(bid, ask));
        }
        None
    }

    fn price(&self, record: &csv::StringRecord) -> Result<f64> {
        match *self {
            PriceLayout::Price(idx) => parse_price_field(record, idx, "price"),
            PriceLayout::Close(idx) => parse_price_field(record, idx, "close"),
            PriceLayout::BidAsk(bid_idx, ask_idx) => {
                let bid = parse_price_field(record, bid_idx, "bid")?;
                let ask = parse_price_field(record, ask_idx, "ask")?;
                Ok((bid + ask) / 2.0)
            }
        }
    }
}

// =============================================================================
// CSV Loading
// =============================================================================

/// Load price samples from a CSV file
///
/// Accepted layouts (header names are case-insensitive):
/// - `timestamp,price[,symbol]`
/// - `timestamp,open,high,low,close[,symbol]` (uses the close)
/// - `timestamp,bid,ask[,symbol]` (uses the mid price)
///
/// Naive timestamps are taken as already server-local; zoned ones are
/// converted. The symbol comes from the `symbol` column when present, then
/// from the filename, then from `default_symbol`. Samples come back sorted
/// by time.
pub fn load_samples_csv(
    path: impl AsRef<Path>,
    server_tz: Tz,
    default_symbol: Option<&str>,
) -> Result<(Symbol, Vec<PriceSample>)> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let headers = reader.headers().context("Failed to read CSV header")?.clone();
    let columns = column_index(&headers);
    let ts_idx = *columns
        .get("timestamp")
        .with_context(|| format!("{}: missing 'timestamp' column", path.display()))?;
    let layout = PriceLayout::detect(&columns).with_context(|| {
        format!(
            "{}: cannot infer price column (need price or OHLC or bid/ask)",
            path.display()
        )
    })?;
    let symbol_idx = columns.get("symbol").copied();

    let mut symbol: Option<Symbol> = None;
    let mut samples = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let raw_ts = record
            .get(ts_idx)
            .with_context(|| format!("Missing timestamp in row {}", row_idx + 1))?;
        let time = parse_server_time(raw_ts, server_tz)
            .with_context(|| format!("Bad timestamp in row {}", row_idx + 1))?;
        let price = layout
            .price(&record)
            .with_context(|| format!("Bad price in row {}", row_idx + 1))?;

        if symbol.is_none() {
            if let Some(idx) = symbol_idx {
                if let Some(s) = record.get(idx).map(str::trim).filter(|s| !s.is_empty()) {
                    symbol = Some(Symbol::new(s.to_uppercase()));
                }
            }
        }

        samples.push(PriceSample { time, price });
    }

    samples.sort_by_key(|s| s.time);

    let symbol = symbol
        .or_else(|| guess_symbol_from_filename(path))
        .or_else(|| default_symbol.map(Symbol::new))
        .unwrap_or_else(|| Symbol::new("UNKNOWN"));

    Ok((symbol, samples))
}

fn column_index(headers: &csv::StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_lowercase(), idx))
        .collect()
}

fn parse_price_field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .with_context(|| format!("Missing {name} column"))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {name}"))
}

/// Parse a CSV timestamp and stamp it in server time
fn parse_server_time(raw: &str, server_tz: Tz) -> Result<DateTime<Tz>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&server_tz));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return server_tz
                .from_local_datetime(&naive)
                .single()
                .with_context(|| format!("Ambiguous server-local time {naive}"));
        }
    }
    bail!("Unrecognized timestamp {raw:?}")
}

fn guess_symbol_from_filename(path: &Path) -> Option<Symbol> {
    let stem = path.file_stem()?.to_str()?.to_uppercase();
    KNOWN_SYMBOLS
        .iter()
        .find(|s| stem.contains(*s))
        .map(|s| Symbol::new(*s))
}

// =============================================================================
// Resampling and Day Splitting
// =============================================================================

/// Collapse samples onto a five-minute grid
///
/// Keeps the last sample in each bucket, stamped at the bucket start; empty
/// buckets produce nothing. Input must be sorted by time.
pub fn resample_5m(samples: &[PriceSample]) -> Vec<PriceSample> {
    let mut out: Vec<PriceSample> = Vec::new();
    for sample in samples {
        let bucket = floor_to_bucket(sample.time);
        match out.last_mut() {
            Some(last) if last.time == bucket => last.price = sample.price,
            _ => out.push(PriceSample {
                time: bucket,
                price: sample.price,
            }),
        }
    }
    out
}

fn floor_to_bucket(time: DateTime<Tz>) -> DateTime<Tz> {
    let step = RESAMPLE_MINUTES * 60;
    let overshoot = time.timestamp().rem_euclid(step);
    time - Duration::seconds(overshoot)
}

/// Split samples into server-calendar days, in order
///
/// Input must be sorted by time; each day's samples keep that order.
pub fn split_by_server_day(samples: &[PriceSample]) -> Vec<(NaiveDate, Vec<PriceSample>)> {
    let mut days: Vec<(NaiveDate, Vec<PriceSample>)> = Vec::new();
    for sample in samples {
        let date = sample.time.date_naive();
        match days.last_mut() {
            Some((day, bucket)) if *day == date => bucket.push(*sample),
            _ => days.push((date, vec![*sample])),
        }
    }
    days
}

// =============================================================================
// Directory Loading
// =============================================================================

/// Recursively collect CSV files under a directory, sorted by path
pub fn discover_csvs(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    collect_csvs(root.as_ref(), &mut paths)?;
    paths.sort();
    Ok(paths)
}

fn collect_csvs(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read data directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_csvs(&path, paths)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        {
            paths.push(path);
        }
    }
    Ok(())
}

/// Parse every CSV under `data_dir` in parallel, one series per file
///
/// A file whose symbol cannot be determined still loads under `UNKNOWN`; the
/// caller skips it when no config matches.
pub fn load_all(data_dir: impl AsRef<Path>, server_tz: Tz) -> Result<Vec<SampleSeries>> {
    let paths = discover_csvs(&data_dir)?;
    if paths.is_empty() {
        bail!("No CSV files found in {}", data_dir.as_ref().display());
    }

    let results: Vec<Result<SampleSeries>> = paths
        .par_iter()
        .map(|path| {
            let (symbol, samples) = load_samples_csv(path, server_tz, None)?;
            info!(
                "Loaded {} samples for {} from {}",
                samples.len(),
                symbol,
                path.display()
            );
            Ok(SampleSeries {
                path: path.clone(),
                symbol,
                samples,
            })
        })
        .collect();

    let mut series = Vec::new();
    for result in results {
        series.push(result?);
    }
    Ok(series)
}

// =============================================================================
// Tests
// =============================================================================
