//! Performance benchmarks for anchor-trader
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use anchor_trader::backtest::ThresholdHedgeBacktester;
use anchor_trader::config::BacktestSymbolConfig;
use anchor_trader::data::PriceSample;
use anchor_trader::threshold::{ThresholdEngine, TickWindow};
use anchor_trader::types::{Symbol, ThresholdState};

fn benchmark_threshold_evaluate(c: &mut Criterion) {
    let engine = ThresholdEngine::from_parts(0.1, 20.0);
    let symbol = Symbol::new("XAUUSD");
    let previous = ThresholdState::default();
    let now = Utc::now();

    c.bench_function("threshold_evaluate", |b| {
        b.iter(|| {
            engine.evaluate(
                black_box(&symbol),
                black_box(2000.0),
                black_box(TickWindow {
                    current: 2002.2,
                    high: 2003.0,
                    low: 1999.5,
                }),
                &previous,
                now,
            )
        })
    });
}

fn benchmark_replay_day(c: &mut Criterion) {
    let tz: chrono_tz::Tz = "Etc/GMT-3".parse().unwrap();
    let start = tz.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap();

    // A full server day of 5 minute samples oscillating around the anchor,
    // wide enough to trip entries and hedges along the way
    let samples: Vec<PriceSample> = (0..288)
        .map(|i| PriceSample {
            time: start + Duration::minutes(5 * i),
            price: 2000.0 + 3.0 * ((i as f64) * 0.7).sin(),
        })
        .collect();

    let backtester =
        ThresholdHedgeBacktester::new(BacktestSymbolConfig::new("XAUUSD", 20.0, 0.1, 10.0));

    c.bench_function("replay_day_288_samples", |b| {
        b.iter(|| backtester.run_day(black_box(&samples)).unwrap())
    });
}

criterion_group!(benches, benchmark_threshold_evaluate, benchmark_replay_day);
criterion_main!(benches);
