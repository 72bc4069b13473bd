//! Core data types shared across the trading engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("tick volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLC bar as returned by the terminal bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        tick_volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self {
            time,
            open,
            high,
            low,
            close,
            tick_volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (for trusted sources or when validation is done separately)
    pub fn new_unchecked(
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        tick_volume: f64,
    ) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            tick_volume,
        }
    }

    /// Validate the bar data
    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.tick_volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.tick_volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// Check if the bar is valid without returning detailed error
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Trading symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned into every bar request, decision, and journal row.
/// Using Arc<str> instead of String reduces heap allocations from O(n) to O(1) per clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bar timeframe requested from the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
        }
    }

    /// Bar length in minutes
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order side sent to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Direction of the current price relative to the anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
            Direction::Neutral => "neutral",
        }
    }
}

/// Action decided for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    PlaceLong,
    PlaceShort,
    Close,
    Wait,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::PlaceLong => "place_long",
            TradeAction::PlaceShort => "place_short",
            TradeAction::Close => "close",
            TradeAction::Wait => "wait",
        }
    }

    /// Entry actions open a new position; close and wait do not
    pub fn is_entry(&self) -> bool {
        matches!(self, TradeAction::PlaceLong | TradeAction::PlaceShort)
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Latest quote for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuoteTick {
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

impl QuoteTick {
    /// Usable price for decisions: last trade if present, else bid, else ask.
    /// Returns None when the terminal reported no usable quote at all.
    pub fn price(&self) -> Option<f64> {
        for candidate in [self.last, self.bid, self.ask] {
            if candidate > 0.0 {
                return Some(candidate);
            }
        }
        None
    }
}

/// Open position reported by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: i64,
    pub symbol: Symbol,
    pub side: Side,
    pub volume: f64,
    pub price_open: f64,
    /// Floating PnL in account currency
    pub profit: f64,
    pub comment: String,
}

/// Closed deal from the account history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: i64,
    pub time: DateTime<Utc>,
    pub symbol: Symbol,
    pub profit: f64,
    pub comment: String,
}

/// Retcode the terminal reports for a completed order
pub const RETCODE_DONE: i64 = 10009;

/// Normalized result of a gateway order call
///
/// The terminal returns differently shaped payloads for market orders and
/// close requests; this flattens both into the handful of fields the engine
/// journals and inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub symbol: Symbol,
    pub side: Side,
    pub volume: f64,
    pub price: Option<f64>,
    pub comment: String,
    pub retcode: Option<i64>,
    pub order_id: Option<i64>,
    pub deal_id: Option<i64>,
    pub position_id: Option<i64>,
}

impl ExecutionReport {
    /// The order is done only when the terminal said so explicitly
    pub fn ok(&self) -> bool {
        self.retcode == Some(RETCODE_DONE)
    }
}

/// Sticky threshold crossing stamps for one symbol and trading day
///
/// Once a crossing is stamped it is never cleared within the day, even if the
/// price later retreats below the level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdState {
    pub first_threshold_at: Option<DateTime<Utc>>,
    pub second_threshold_at: Option<DateTime<Utc>>,
}

/// Account-wide daily watchdog state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayState {
    pub locked: bool,
    pub lock_reason: Option<String>,
    /// High-water mark of total PnL seen during the day
    pub max_total_pnl: f64,
}

/// Append-only journal row describing one executor outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub date: NaiveDate,
    pub ts: DateTime<Utc>,
    pub symbol: Symbol,
    pub event: String,
    pub action: TradeAction,
    pub direction: Direction,
    pub total_pnl: f64,
    pub trade_response: Option<serde_json::Value>,
}
