//! Anchor Trader
//!
//! An automated intraday trading system built around a daily anchor price:
//! each symbol is anchored at a scheduled wall-clock time, watched for pip
//! threshold crossings relative to that anchor, and executed through an
//! HMAC-signed HTTP bridge. The same threshold model can be replayed over
//! historical tick CSVs with a hedged exit ladder.

pub mod anchor;
pub mod backtest;
pub mod bridge;
pub mod common;
pub mod config;
pub mod data;
pub mod executor;
pub mod notify;
pub mod state_store;
pub mod threshold;
pub mod types;
pub mod watchdog;

pub use config::Config;
pub use types::*;
