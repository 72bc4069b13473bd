//! Terminal bridge access
//!
//! The broker terminal runs on a Windows VPS behind a small REST shim (the
//! "bridge"). Everything the engine needs from the terminal (bars, ticks,
//! orders, positions, deal history) goes through the two traits below, so
//! tests can substitute in-memory fakes and the live commands can plug in
//! [`BridgeClient`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use anchor_trader::bridge::{BridgeClient, ClientConfig, PriceFeed};
//! use anchor_trader::types::Symbol;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default()
//!         .with_max_retries(5)
//!         .with_timeout(Duration::from_secs(60))
//!         .with_rate_limit(20);
//!
//!     let client = BridgeClient::with_config(
//!         "http://127.0.0.1:8787",
//!         "api_key",
//!         "api_secret",
//!         config,
//!     );
//!     let tick = client.get_tick(&Symbol::new("XAUUSD")).await?;
//!     println!("XAUUSD: {:?}", tick.price());
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Bar, Deal, ExecutionReport, Position, QuoteTick, Side, Symbol, Timeframe};

pub mod auth;
pub mod client;

pub use auth::Credentials;
pub use client::{BridgeClient, ClientConfig};

/// Read access to terminal prices
///
/// A time range with no bars is an empty `Vec`, not an error; errors mean the
/// bridge itself failed.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Bars of `timeframe` with open time in `[start, end]`
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;

    /// Up to `count` bars starting with the first bar at or after `from`
    async fn get_bars_from(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        count: u32,
    ) -> Result<Vec<Bar>>;

    /// Latest quote for the symbol
    async fn get_tick(&self, symbol: &Symbol) -> Result<QuoteTick>;
}

/// Order and account access on the terminal
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Send a market order tagged with `comment`
    async fn place_order(
        &self,
        symbol: &Symbol,
        side: Side,
        volume: f64,
        comment: &str,
    ) -> Result<ExecutionReport>;

    /// Close every open position on the symbol, one report per position
    async fn close_positions(&self, symbol: &Symbol) -> Result<Vec<ExecutionReport>>;

    /// Open positions, optionally filtered by symbol
    async fn open_positions(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>>;

    /// Closed deals with close time in `[from, to]`
    async fn deal_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>>;
}
