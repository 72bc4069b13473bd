//! Anchor-relative threshold evaluation
//!
//! Measures how far the current price has travelled from the daily anchor in
//! pips, expresses that distance as a multiple of the per-symbol threshold,
//! and maps the multiple onto an action: enter inside `[1.00, 1.25]`, close at
//! `2.00` and beyond, wait everywhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SymbolConfig;
use crate::types::{Direction, Symbol, ThresholdState, TradeAction};

/// Lower edge of the entry window, in threshold multiples
pub const ENTRY_MIN: f64 = 1.00;
/// Upper edge of the entry window, inclusive
pub const ENTRY_MAX: f64 = 1.25;
/// Close-everything level
pub const CLOSE_AT: f64 = 2.00;

/// Round half away from zero to `dp` decimal places
fn round_dp(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}

/// Rolling price window observed for one evaluation tick
#[derive(Debug, Clone, Copy)]
pub struct TickWindow {
    pub current: f64,
    /// Highest price seen since the anchor
    pub high: f64,
    /// Lowest price seen since the anchor
    pub low: f64,
}

/// Full evaluation output for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: Symbol,
    pub anchor: f64,
    pub current: f64,
    pub high: f64,
    pub low: f64,
    /// Signed distance from the anchor, in pips, rounded to 2 decimals
    pub pip_diff: f64,
    pub abs_pip_diff: f64,
    /// `pip_diff / threshold_pips`, rounded to 4 decimals
    pub scale: f64,
    pub abs_scale: f64,
    pub direction: Direction,
    pub action: TradeAction,
    pub above_first_threshold: bool,
    pub in_entry_window: bool,
    pub should_close: bool,
    /// Current price exceeds the rolling high
    pub breach_high: bool,
    /// Current price undercuts the rolling low
    pub breach_low: bool,
    pub dist_above_high_pips: f64,
    pub dist_below_low_pips: f64,
    pub strong_buy: bool,
    pub strong_sell: bool,
    /// Sticky crossing stamps after this tick; persist and feed back next tick
    pub state: ThresholdState,
}

/// Pure threshold evaluator for one instrument
#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    pip_size: f64,
    threshold_pips: f64,
}

impl ThresholdEngine {
    pub fn new(config: &SymbolConfig) -> Self {
        Self::from_parts(config.pip_size, f64::from(config.threshold_pips))
    }

    pub fn from_parts(pip_size: f64, threshold_pips: f64) -> Self {
        ThresholdEngine {
            pip_size,
            threshold_pips,
        }
    }

    pub fn pip_size(&self) -> f64 {
        self.pip_size
    }

    pub fn threshold_pips(&self) -> f64 {
        self.threshold_pips
    }

    /// Evaluate one tick against the anchor.
    ///
    /// `previous` carries the sticky crossing stamps from the last evaluation
    /// of the same trading day; stamps are copied forward and only ever filled
    /// in, never cleared. `now` is stamped into newly reached stages.
    pub fn evaluate(
        &self,
        symbol: &Symbol,
        anchor: f64,
        window: TickWindow,
        previous: &ThresholdState,
        now: DateTime<Utc>,
    ) -> Decision {
        let pip_diff = round_dp((window.current - anchor) / self.pip_size, 2);
        let scale = round_dp(pip_diff / self.threshold_pips, 4);
        let abs_scale = scale.abs();

        let direction = if window.current > anchor {
            Direction::Buy
        } else if window.current < anchor {
            Direction::Sell
        } else {
            Direction::Neutral
        };

        let above_first_threshold = abs_scale >= ENTRY_MIN;
        let in_entry_window = (ENTRY_MIN..=ENTRY_MAX).contains(&abs_scale);
        let should_close = abs_scale >= CLOSE_AT;

        let action = if should_close {
            TradeAction::Close
        } else if in_entry_window {
            if scale > 0.0 {
                TradeAction::PlaceLong
            } else {
                TradeAction::PlaceShort
            }
        } else {
            TradeAction::Wait
        };

        let breach_high = window.current > window.high;
        let breach_low = window.current < window.low;
        let dist_above_high_pips =
            round_dp(((window.current - window.high) / self.pip_size).max(0.0), 2);
        let dist_below_low_pips =
            round_dp(((window.low - window.current) / self.pip_size).max(0.0), 2);

        let mut state = previous.clone();
        if abs_scale >= ENTRY_MIN && state.first_threshold_at.is_none() {
            state.first_threshold_at = Some(now);
        }
        if abs_scale >= CLOSE_AT && state.second_threshold_at.is_none() {
            state.second_threshold_at = Some(now);
        }

        Decision {
            symbol: symbol.clone(),
            anchor,
            current: window.current,
            high: window.high,
            low: window.low,
            pip_diff,
            abs_pip_diff: round_dp(pip_diff.abs(), 2),
            scale,
            abs_scale: round_dp(abs_scale, 4),
            direction,
            action,
            above_first_threshold,
            in_entry_window,
            should_close,
            breach_high,
            breach_low,
            dist_above_high_pips,
            dist_below_low_pips,
            strong_buy: breach_high,
            strong_sell: breach_low,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> ThresholdEngine {
        // XAUUSD-style replay parameters: 20 pips at a pip size of 0.1
        ThresholdEngine::from_parts(0.1, 20.0)
    }

    fn sym() -> Symbol {
        Symbol::new("XAUUSD")
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, minute, 0).unwrap()
    }

    fn window(current: f64) -> TickWindow {
        TickWindow {
            current,
            high: current,
            low: 2000.0_f64.min(current),
        }
    }

    #[test]
    fn double_threshold_closes() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            window(2004.0),
            &ThresholdState::default(),
            at(0),
        );
        assert_eq!(decision.pip_diff, 40.0);
        assert_eq!(decision.scale, 2.0);
        assert_eq!(decision.action, TradeAction::Close);
        assert_eq!(decision.direction, Direction::Buy);
        assert!(decision.should_close);
    }

    #[test]
    fn entry_window_upper_edge_is_inclusive() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            window(2002.5),
            &ThresholdState::default(),
            at(0),
        );
        assert_eq!(decision.scale, 1.25);
        assert_eq!(decision.action, TradeAction::PlaceLong);
        assert!(decision.in_entry_window);
    }

    #[test]
    fn just_past_entry_window_waits() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            window(2002.6),
            &ThresholdState::default(),
            at(0),
        );
        assert_eq!(decision.scale, 1.3);
        assert_eq!(decision.action, TradeAction::Wait);
        assert!(!decision.in_entry_window);
        assert!(decision.above_first_threshold);
    }

    #[test]
    fn negative_scale_places_short() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            TickWindow {
                current: 1997.5,
                high: 2000.0,
                low: 1997.5,
            },
            &ThresholdState::default(),
            at(0),
        );
        assert_eq!(decision.scale, -1.25);
        assert_eq!(decision.action, TradeAction::PlaceShort);
        assert_eq!(decision.direction, Direction::Sell);
    }

    #[test]
    fn below_entry_window_waits() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            window(2001.0),
            &ThresholdState::default(),
            at(0),
        );
        assert_eq!(decision.scale, 0.5);
        assert_eq!(decision.action, TradeAction::Wait);
        assert_eq!(decision.state, ThresholdState::default());
    }

    #[test]
    fn equal_prices_are_neutral() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            window(2000.0),
            &ThresholdState::default(),
            at(0),
        );
        assert_eq!(decision.direction, Direction::Neutral);
        assert_eq!(decision.action, TradeAction::Wait);
        assert_eq!(decision.pip_diff, 0.0);
    }

    #[test]
    fn stamps_are_sticky_within_the_day() {
        let engine = engine();
        let symbol = sym();

        // First crossing stamps the first threshold.
        let d1 = engine.evaluate(
            &symbol,
            2000.0,
            window(2002.0),
            &ThresholdState::default(),
            at(1),
        );
        assert_eq!(d1.state.first_threshold_at, Some(at(1)));
        assert_eq!(d1.state.second_threshold_at, None);

        // Price retreats; the stamp survives.
        let d2 = engine.evaluate(&symbol, 2000.0, window(2000.5), &d1.state, at(2));
        assert_eq!(d2.state.first_threshold_at, Some(at(1)));

        // Second crossing stamps the second threshold and keeps the first.
        let d3 = engine.evaluate(&symbol, 2000.0, window(2004.5), &d2.state, at(3));
        assert_eq!(d3.state.first_threshold_at, Some(at(1)));
        assert_eq!(d3.state.second_threshold_at, Some(at(3)));

        // Later crossings never move either stamp.
        let d4 = engine.evaluate(&symbol, 2000.0, window(2005.0), &d3.state, at(4));
        assert_eq!(d4.state, d3.state);
    }

    #[test]
    fn jump_straight_to_close_stamps_both() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            window(2004.0),
            &ThresholdState::default(),
            at(7),
        );
        assert_eq!(decision.state.first_threshold_at, Some(at(7)));
        assert_eq!(decision.state.second_threshold_at, Some(at(7)));
    }

    #[test]
    fn breach_flags_track_rolling_extremes() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            TickWindow {
                current: 2003.0,
                high: 2002.0,
                low: 1999.0,
            },
            &ThresholdState::default(),
            at(0),
        );
        assert!(decision.breach_high);
        assert!(decision.strong_buy);
        assert!(!decision.breach_low);
        assert_eq!(decision.dist_above_high_pips, 10.0);
        assert_eq!(decision.dist_below_low_pips, 0.0);

        let low_break = engine().evaluate(
            &sym(),
            2000.0,
            TickWindow {
                current: 1998.5,
                high: 2002.0,
                low: 1999.0,
            },
            &ThresholdState::default(),
            at(0),
        );
        assert!(low_break.breach_low);
        assert!(low_break.strong_sell);
        assert_eq!(low_break.dist_below_low_pips, 5.0);
    }

    #[test]
    fn pip_diff_rounds_to_two_decimals_scale_to_four() {
        let decision = engine().evaluate(
            &sym(),
            2000.0,
            window(2000.0333),
            &ThresholdState::default(),
            at(0),
        );
        assert_eq!(decision.pip_diff, 0.33);
        assert_eq!(decision.scale, 0.0165);
    }
}
