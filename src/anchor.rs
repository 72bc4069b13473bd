//! Daily anchor resolution
//!
//! Each trading day starts from an anchor price: the open of the first bar at
//! or after the scheduled wall-clock time. The schedule is expressed in the
//! display time zone, converted to the broker's server time zone, and shifted
//! off weekends per policy. Quiet markets and Monday openings mean the exact
//! bar often does not exist, so the search runs in widening tiers before
//! giving up for the tick.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::PriceFeed;
use crate::config::ScheduleConfig;
use crate::types::{Symbol, Timeframe};

/// Forward search window for the primary bar lookup, in minutes
const SEARCH_MINUTES: i64 = 90;
/// Widened forward window for tier two
const WIDE_SEARCH_MINUTES: i64 = 180;
/// Backward window for the last-resort previous-bar lookup
const LOOKBACK_MINUTES: i64 = 240;

/// What to do when the scheduled date lands on a weekend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekendPolicy {
    /// Keep the weekend date as-is
    Skip,
    /// Sat -> Fri, Sun -> Fri
    PreviousTradingDay,
    /// Sat -> Mon, Sun -> Mon
    NextTradingDay,
}

fn is_weekend(d: NaiveDate) -> bool {
    matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Shift a weekend date per policy. Returns the date and a note describing
/// the shift, if any.
pub fn shift_trading_day(d: NaiveDate, policy: WeekendPolicy) -> (NaiveDate, Option<String>) {
    if !is_weekend(d) {
        return (d, None);
    }
    match policy {
        WeekendPolicy::Skip => (d, Some("weekend_no_shift".to_string())),
        WeekendPolicy::PreviousTradingDay => {
            let delta = if d.weekday() == Weekday::Sat { 1 } else { 2 };
            (
                d - Duration::days(delta),
                Some(format!(
                    "shifted_from_weekend_to_previous_trading_day({delta}d)"
                )),
            )
        }
        WeekendPolicy::NextTradingDay => {
            let delta = if d.weekday() == Weekday::Sat { 2 } else { 1 };
            (
                d + Duration::days(delta),
                Some(format!(
                    "shifted_from_weekend_to_next_trading_day({delta}d)"
                )),
            )
        }
    }
}

/// First usable bar found for one timeframe
#[derive(Debug, Clone, Serialize)]
pub struct AnchorBar {
    pub time: DateTime<Tz>,
    pub open: f64,
    /// True when the bar came from the backward last-resort search
    pub fallback: bool,
}

/// Result of resolving the daily anchor for one symbol
#[derive(Debug, Clone, Serialize)]
pub struct AnchorSnapshot {
    pub symbol: Symbol,
    /// Server-calendar trading day after the weekend shift
    pub trading_day: NaiveDate,
    pub anchor_server: DateTime<Tz>,
    pub anchor_display: DateTime<Tz>,
    /// Open of the first M1 bar at/after the anchor; None until bars exist
    pub price_at_anchor: Option<f64>,
    pub timeframes: HashMap<Timeframe, Option<AnchorBar>>,
    pub weekend_note: Option<String>,
}

/// Rolling high/low over M1 bars
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HighLow {
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub bars: usize,
}

/// Extremes strictly beyond a reference price, with first-breach times
#[derive(Debug, Clone, Serialize)]
pub struct RelativeExtremes {
    pub reference_price: f64,
    pub highest_above: Option<f64>,
    pub lowest_below: Option<f64>,
    pub breached_up: bool,
    pub breached_down: bool,
    pub first_up_break_at: Option<DateTime<Utc>>,
    pub first_down_break_at: Option<DateTime<Utc>>,
    pub bars: usize,
}

/// Resolves daily anchors against a price feed
pub struct AnchorResolver {
    feed: Arc<dyn PriceFeed>,
    server_tz: Tz,
    display_tz: Tz,
    hour: u32,
    minute: u32,
    weekend_policy: WeekendPolicy,
}

impl AnchorResolver {
    pub fn new(feed: Arc<dyn PriceFeed>, schedule: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            feed,
            server_tz: schedule.server_tz()?,
            display_tz: schedule.display_tz()?,
            hour: schedule.hour,
            minute: schedule.minute,
            weekend_policy: schedule.weekend_policy,
        })
    }

    /// The anchor target in server time for a date.
    ///
    /// The scheduled hour/minute is wall-clock time in the display zone; it is
    /// converted to server time first, then the weekend shift is applied to
    /// the server calendar day while keeping the converted time of day.
    pub fn target_server_time(
        &self,
        requested_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Tz>, Option<String>)> {
        let date = requested_date.unwrap_or_else(|| now.with_timezone(&self.display_tz).date_naive());
        let display_dt = at_wall_time(self.display_tz, date, self.hour, self.minute)?;
        let server_dt = display_dt.with_timezone(&self.server_tz);

        let (shifted, note) = shift_trading_day(server_dt.date_naive(), self.weekend_policy);
        let target = at_wall_time(self.server_tz, shifted, server_dt.hour(), server_dt.minute())?;
        Ok((target, note))
    }

    /// Resolve the anchor snapshot across all tracked timeframes.
    ///
    /// `price_at_anchor` stays `None` when no bar exists yet anywhere in the
    /// search tiers; callers retry on a later tick rather than treat that as
    /// an error.
    pub async fn resolve(
        &self,
        symbol: &Symbol,
        requested_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<AnchorSnapshot> {
        let (target, weekend_note) = self.target_server_time(requested_date, now)?;

        let mut timeframes = HashMap::new();
        let mut price_at_anchor = None;

        for timeframe in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
        ] {
            let mut bar = self.first_bar_at_or_after(symbol, timeframe, target).await?;
            if bar.is_none() {
                bar = self.nearest_previous_bar(symbol, timeframe, target).await?;
            }
            if timeframe == Timeframe::M1 {
                price_at_anchor = bar.as_ref().map(|b| b.open);
            }
            timeframes.insert(timeframe, bar);
        }

        Ok(AnchorSnapshot {
            symbol: symbol.clone(),
            trading_day: target.date_naive(),
            anchor_server: target,
            anchor_display: target.with_timezone(&self.display_tz),
            price_at_anchor,
            timeframes,
            weekend_note,
        })
    }

    /// Tiered forward search for the first bar at or after the target
    async fn first_bar_at_or_after(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        target: DateTime<Tz>,
    ) -> Result<Option<AnchorBar>> {
        let target_utc = target.with_timezone(&Utc);

        // Main attempt
        let mut bars = self
            .feed
            .get_bars(
                symbol,
                timeframe,
                target_utc,
                target_utc + Duration::minutes(SEARCH_MINUTES),
            )
            .await?;

        // Widen the window (Monday openings, holiday gaps)
        if bars.is_empty() {
            bars = self
                .feed
                .get_bars(
                    symbol,
                    timeframe,
                    target_utc - Duration::minutes(5),
                    target_utc + Duration::minutes(WIDE_SEARCH_MINUTES.max(SEARCH_MINUTES)),
                )
                .await?;
        }

        // Next available bar anywhere after the target
        if bars.is_empty() {
            bars = self
                .feed
                .get_bars_from(symbol, timeframe, target_utc, 1)
                .await?;
        }

        if bars.is_empty() {
            return Ok(None);
        }

        // Pick the first bar at/after the target, else the first available
        let chosen = bars
            .iter()
            .find(|bar| bar.time >= target_utc)
            .unwrap_or(&bars[0]);

        Ok(Some(AnchorBar {
            time: chosen.time.with_timezone(&self.server_tz),
            open: chosen.open,
            fallback: false,
        }))
    }

    /// Last resort: the most recent bar before the target
    async fn nearest_previous_bar(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        target: DateTime<Tz>,
    ) -> Result<Option<AnchorBar>> {
        let target_utc = target.with_timezone(&Utc);
        let bars = self
            .feed
            .get_bars(
                symbol,
                timeframe,
                target_utc - Duration::minutes(LOOKBACK_MINUTES),
                target_utc,
            )
            .await?;

        Ok(bars.last().map(|bar| AnchorBar {
            time: bar.time.with_timezone(&self.server_tz),
            open: bar.open,
            fallback: true,
        }))
    }

    /// High/low over M1 bars from the anchor up to `now`
    pub async fn high_low_since(
        &self,
        symbol: &Symbol,
        anchor_server: DateTime<Tz>,
        now: DateTime<Utc>,
    ) -> Result<HighLow> {
        let start = anchor_server.with_timezone(&Utc);
        if now <= start {
            return Ok(HighLow {
                high: None,
                low: None,
                bars: 0,
            });
        }

        let bars = self
            .feed
            .get_bars(symbol, Timeframe::M1, start, now)
            .await?;
        if bars.is_empty() {
            return Ok(HighLow {
                high: None,
                low: None,
                bars: 0,
            });
        }

        let high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        Ok(HighLow {
            high: Some(high),
            low: Some(low),
            bars: bars.len(),
        })
    }

    /// Extremes strictly beyond `reference_price` since `since` (default: the
    /// last 24 hours), with the first breach time on each side
    pub async fn extremes_relative(
        &self,
        symbol: &Symbol,
        reference_price: f64,
        since: Option<DateTime<Tz>>,
        now: DateTime<Utc>,
    ) -> Result<RelativeExtremes> {
        let start = since
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now - Duration::hours(24));

        let bars = self
            .feed
            .get_bars(symbol, Timeframe::M1, start, now)
            .await?;

        let mut highest_above: Option<f64> = None;
        let mut lowest_below: Option<f64> = None;
        let mut first_up_break_at = None;
        let mut first_down_break_at = None;

        for bar in &bars {
            if bar.high > reference_price {
                if highest_above.is_none_or(|h| bar.high > h) {
                    highest_above = Some(bar.high);
                }
                if first_up_break_at.is_none() {
                    first_up_break_at = Some(bar.time);
                }
            }
            if bar.low < reference_price {
                if lowest_below.is_none_or(|l| bar.low < l) {
                    lowest_below = Some(bar.low);
                }
                if first_down_break_at.is_none() {
                    first_down_break_at = Some(bar.time);
                }
            }
        }

        Ok(RelativeExtremes {
            reference_price,
            highest_above,
            lowest_below,
            breached_up: highest_above.is_some(),
            breached_down: lowest_below.is_some(),
            first_up_break_at,
            first_down_break_at,
            bars: bars.len(),
        })
    }

    pub fn server_tz(&self) -> Tz {
        self.server_tz
    }

    pub fn display_tz(&self) -> Tz {
        self.display_tz
    }
}

fn at_wall_time(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Result<DateTime<Tz>> {
    tz.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
        .single()
        .with_context(|| format!("Invalid wall time {date} {hour:02}:{minute:02} in {tz}"))
}
