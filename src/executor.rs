//! Execution coordination
//!
//! Takes a threshold decision and drives it to a terminal outcome: watchdog
//! gate, daily-lock blocking, per-symbol action de-duplication, dry-run
//! short-circuit, then the real gateway call. Every path appends a TradeEvent
//! to the store before returning, and outcomes are mirrored to the
//! notification channels.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bridge::OrderGateway;
use crate::config::SymbolConfig;
use crate::notify::{Channel, Notifier};
use crate::state_store::SqliteStateStore;
use crate::threshold::Decision;
use crate::types::{ExecutionReport, Side, Symbol, TradeAction, TradeEvent};
use crate::watchdog::WatchdogController;

/// Broker-safe comment length, including the symbol suffix
const MAX_COMMENT_LEN: usize = 31;

// =============================================================================
// Comment Tags
// =============================================================================

/// Keep letters, digits, and hyphens; drop everything else
fn ascii_tag(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// Order comment for one side and day, e.g. `Astra-171125-BUY-XAUUSD`.
/// ASCII-only and truncated so the terminal never rejects it.
pub fn order_comment(prefix: &str, side: Side, symbol: &Symbol, day: NaiveDate) -> String {
    let raw = format!(
        "{prefix}-{}-{}-{symbol}",
        day.format("%d%m%y"),
        side.as_str().to_uppercase()
    );
    let mut tag = ascii_tag(&raw);
    tag.truncate(MAX_COMMENT_LEN);
    tag
}

/// Prefix identifying the bot's trades for one day, e.g. `Astra-171125-`
pub fn daily_comment_prefix(prefix: &str, day: NaiveDate) -> String {
    format!("{}-{}-", ascii_tag(prefix), day.format("%d%m%y"))
}

// =============================================================================
// Trade Messages
// =============================================================================

/// Human-readable summary of a fill report and the channel it belongs on
pub fn trade_message(report: &ExecutionReport) -> (Channel, String) {
    let ok = report.ok();
    let channel = if ok { Channel::Trade } else { Channel::Critical };
    let title = if ok {
        "**Trade Executed Successfully**"
    } else {
        "**Trade Failed**"
    };

    let mut parts = vec![
        title.to_string(),
        format!("**Symbol:** {}", report.symbol),
        format!("**Type:** {}", report.side.as_str().to_uppercase()),
        format!("**Volume:** {}", report.volume),
    ];
    if let Some(price) = report.price {
        parts.push(format!("**Price:** {price}"));
    }
    parts.push(format!(
        "**Retcode:** {}",
        report
            .retcode
            .map_or_else(|| "N/A".to_string(), |c| c.to_string())
    ));
    if !report.comment.is_empty() {
        parts.push(format!("**Comment:** {}", report.comment));
    }
    if report.order_id.is_some() || report.deal_id.is_some() {
        parts.push(format!(
            "**Order ID:** {}  **Deal ID:** {}",
            report
                .order_id
                .map_or_else(|| "N/A".to_string(), |v| v.to_string()),
            report
                .deal_id
                .map_or_else(|| "N/A".to_string(), |v| v.to_string()),
        ));
    }
    (channel, parts.join("\n"))
}

// =============================================================================
// Coordinator
// =============================================================================

/// Terminal result of handling one decision
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub ts: DateTime<Utc>,
    pub symbol: Symbol,
    pub action: TradeAction,
    pub note: String,
    pub total_pnl: f64,
    pub locked: bool,
    pub lock_reason: Option<String>,
    pub trade_response: Option<serde_json::Value>,
}

pub struct ExecutionCoordinator {
    gateway: Arc<dyn OrderGateway>,
    store: Arc<SqliteStateStore>,
    watchdog: WatchdogController,
    notifier: Notifier,
    comment_prefix: String,
    dry_run: bool,
    /// Last action fired per symbol; identical repeats are suppressed
    last_action: HashMap<Symbol, TradeAction>,
}

impl ExecutionCoordinator {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        store: Arc<SqliteStateStore>,
        watchdog: WatchdogController,
        notifier: Notifier,
        comment_prefix: &str,
        dry_run: bool,
    ) -> Self {
        Self {
            gateway,
            store,
            watchdog,
            notifier,
            comment_prefix: comment_prefix.to_string(),
            dry_run,
            last_action: HashMap::new(),
        }
    }

    /// Forget the last fired action for a symbol. Called on day rollover so
    /// yesterday's final action never suppresses today's first decision.
    pub fn reset_symbol(&mut self, symbol: &Symbol) {
        self.last_action.remove(symbol);
    }

    /// True when `action` differs from the last one fired for this symbol.
    /// Records the new action either way, so the next identical decision is
    /// suppressed even if this one fails downstream.
    fn should_fire(&mut self, symbol: &Symbol, action: TradeAction) -> bool {
        match self.last_action.get(symbol) {
            Some(prev) if *prev == action => false,
            _ => {
                self.last_action.insert(symbol.clone(), action);
                true
            }
        }
    }

    /// Drive one decision to a terminal outcome.
    ///
    /// Flow: watchdog check, lock handling, wait no-op, de-dup, dry-run, then
    /// the real gateway call. Exactly one TradeEvent is appended per call.
    pub async fn execute(
        &mut self,
        config: &SymbolConfig,
        decision: &Decision,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome> {
        let symbol = decision.symbol.clone();
        info!(
            "{symbol} decision: action={} scale={} (pips {:+.2})",
            decision.action, decision.scale, decision.pip_diff
        );

        let verdict = self.watchdog.check(day, now).await?;
        let mut outcome = ExecutionOutcome {
            ts: now,
            symbol: symbol.clone(),
            action: decision.action,
            note: String::new(),
            total_pnl: verdict.total_pnl,
            locked: verdict.locked,
            lock_reason: verdict.lock_reason.clone(),
            trade_response: None,
        };

        // The lock transition fires a one-time close of all bot positions
        if verdict.just_locked {
            let reason = verdict.lock_reason.clone().unwrap_or_default();
            self.notifier.send(
                Channel::Critical,
                &format!(
                    "Watchdog locked the day: {reason} (total PnL {:.2})",
                    verdict.total_pnl
                ),
            );
            if !self.dry_run {
                warn!("Watchdog lock triggered, closing bot positions: {reason}");
                match self.close_bot_positions(day).await {
                    Ok(reports) => {
                        outcome.note = "watchdog_lock_close".to_string();
                        outcome.trade_response = Some(serde_json::json!({
                            "lock_reason": reason,
                            "close_reports": reports,
                        }));
                    }
                    Err(e) => {
                        error!("Close during watchdog lock failed: {e:#}");
                        outcome.note = format!("watchdog_close_error: {e}");
                        outcome.trade_response =
                            Some(serde_json::json!({ "lock_reason": reason }));
                    }
                }
                self.append_event(day, &outcome, "watchdog_lock")?;
                return Ok(outcome);
            }
        }

        // A locked day blocks new entries; close is still allowed
        if verdict.locked && decision.action.is_entry() {
            let reason = verdict.lock_reason.clone().unwrap_or_default();
            info!("{symbol} entry blocked by daily lock ({reason})");
            outcome.note = "blocked_by_daily_lock".to_string();
            outcome.trade_response = Some(serde_json::json!({ "lock_reason": reason }));
            self.append_event(day, &outcome, "blocked_by_daily_lock")?;
            self.notifier.send(
                Channel::Alert,
                &format!("Entry blocked by daily lock for {symbol} ({reason})"),
            );
            return Ok(outcome);
        }

        // Wait is a no-op and must not disturb the de-dup cache
        if decision.action == TradeAction::Wait {
            outcome.note = "no-op".to_string();
            self.append_event(day, &outcome, "wait")?;
            return Ok(outcome);
        }

        if !self.should_fire(&symbol, decision.action) {
            info!("{symbol} duplicate action suppressed: {}", decision.action);
            outcome.note = "duplicate_action_suppressed".to_string();
            self.append_event(day, &outcome, "duplicate_action_suppressed")?;
            return Ok(outcome);
        }

        if self.dry_run {
            info!("{symbol} dry run, skipping gateway call: {}", decision.action);
            outcome.note = "dry_run".to_string();
            self.append_event(day, &outcome, "dry_run_action")?;
            return Ok(outcome);
        }

        if !config.is_tradeable {
            info!("{symbol} is not tradeable, skipping execution");
            outcome.note = "not_tradeable".to_string();
            self.append_event(day, &outcome, "not_tradeable")?;
            return Ok(outcome);
        }

        // Real execution
        match decision.action {
            TradeAction::PlaceLong => {
                self.place(&mut outcome, config, Side::Buy, day).await;
            }
            TradeAction::PlaceShort => {
                self.place(&mut outcome, config, Side::Sell, day).await;
            }
            TradeAction::Close => {
                self.close_symbol(&mut outcome).await;
            }
            TradeAction::Wait => {}
        }

        self.append_event(day, &outcome, &outcome.note.clone())?;
        Ok(outcome)
    }

    /// Place a market order, guarding against an opposite-side position
    async fn place(
        &self,
        outcome: &mut ExecutionOutcome,
        config: &SymbolConfig,
        side: Side,
        day: NaiveDate,
    ) {
        let symbol = &outcome.symbol;

        match self.gateway.open_positions(Some(symbol)).await {
            Ok(positions) => {
                if positions.iter().any(|p| p.side != side) {
                    info!("{symbol} has an opposite-side position open, skipping {side:?}");
                    outcome.note = "conflicting_position".to_string();
                    self.notifier.send(
                        Channel::Alert,
                        &format!(
                            "Trade skipped (conflicting position exists)\n**Symbol:** {symbol}\n**Requested:** {} {}",
                            side.as_str().to_uppercase(),
                            config.lot_size
                        ),
                    );
                    return;
                }
            }
            Err(e) => {
                error!("{symbol} position check failed: {e:#}");
                outcome.note = format!("execution_error: {e}");
                self.notifier.send(
                    Channel::Critical,
                    &format!("Execution error for {symbol}: {e}"),
                );
                return;
            }
        }

        let comment = order_comment(&self.comment_prefix, side, symbol, day);
        match self
            .gateway
            .place_order(symbol, side, config.lot_size, &comment)
            .await
        {
            Ok(report) => {
                outcome.trade_response = serde_json::to_value(&report).ok();
                let (channel, message) = trade_message(&report);
                self.notifier.send(channel, &message);
                if report.ok() {
                    outcome.note = match side {
                        Side::Buy => "placed_long".to_string(),
                        Side::Sell => "placed_short".to_string(),
                    };
                    info!(
                        "{symbol} {} placed: lot={} comment={comment}",
                        side.as_str().to_uppercase(),
                        config.lot_size
                    );
                } else {
                    warn!("{symbol} order rejected: retcode={:?}", report.retcode);
                    outcome.note = "execution_failed".to_string();
                }
            }
            Err(e) => {
                error!("{symbol} order send failed: {e:#}");
                outcome.note = format!("execution_error: {e}");
                self.notifier.send(
                    Channel::Critical,
                    &format!("Execution error for {symbol}: {e}"),
                );
            }
        }
    }

    /// Close every open position on the symbol
    async fn close_symbol(&self, outcome: &mut ExecutionOutcome) {
        let symbol = &outcome.symbol;
        match self.gateway.close_positions(symbol).await {
            Ok(reports) => {
                if reports.is_empty() {
                    self.notifier.send(
                        Channel::Info,
                        &format!("No open positions to close for {symbol}"),
                    );
                } else {
                    for report in &reports {
                        let (channel, message) = trade_message(report);
                        self.notifier.send(channel, &message);
                    }
                    info!("{symbol} closed {} positions", reports.len());
                }
                outcome.note = "closed_positions".to_string();
                outcome.trade_response = serde_json::to_value(&reports).ok();
            }
            Err(e) => {
                error!("{symbol} close failed: {e:#}");
                outcome.note = format!("execution_error: {e}");
                self.notifier.send(
                    Channel::Critical,
                    &format!("Execution error for {symbol}: {e}"),
                );
            }
        }
    }

    /// Close all positions carrying the bot's tag for this day, across symbols
    async fn close_bot_positions(&self, day: NaiveDate) -> Result<Vec<ExecutionReport>> {
        let prefix = daily_comment_prefix(&self.comment_prefix, day);
        let positions = self.gateway.open_positions(None).await?;

        let symbols: Vec<Symbol> = positions
            .iter()
            .filter(|p| p.comment.starts_with(&prefix))
            .map(|p| p.symbol.clone())
            .unique()
            .collect();

        let mut reports = Vec::new();
        for symbol in symbols {
            reports.extend(self.gateway.close_positions(&symbol).await?);
        }
        Ok(reports)
    }

    fn append_event(&self, day: NaiveDate, outcome: &ExecutionOutcome, event: &str) -> Result<()> {
        self.store.append_trade_event(&TradeEvent {
            date: day,
            ts: outcome.ts,
            symbol: outcome.symbol.clone(),
            event: event.to_string(),
            action: outcome.action,
            direction: match outcome.action {
                TradeAction::PlaceLong => crate::types::Direction::Buy,
                TradeAction::PlaceShort => crate::types::Direction::Sell,
                _ => crate::types::Direction::Neutral,
            },
            total_pnl: outcome.total_pnl,
            trade_response: outcome.trade_response.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchdogConfig;
    use crate::threshold::{ThresholdEngine, TickWindow};
    use crate::types::{Deal, Position, ThresholdState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct GatewayLog {
        orders: Vec<(String, Side, f64, String)>,
        closes: Vec<String>,
    }

    struct FakeGateway {
        log: Mutex<GatewayLog>,
        deals: Mutex<Vec<Deal>>,
        positions: Mutex<Vec<Position>>,
        retcode: Mutex<i64>,
    }

    impl FakeGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(GatewayLog::default()),
                deals: Mutex::new(Vec::new()),
                positions: Mutex::new(Vec::new()),
                retcode: Mutex::new(crate::types::RETCODE_DONE),
            })
        }

        fn orders(&self) -> Vec<(String, Side, f64, String)> {
            self.log.lock().unwrap().orders.clone()
        }

        fn closes(&self) -> Vec<String> {
            self.log.lock().unwrap().closes.clone()
        }

        fn set_retcode(&self, code: i64) {
            *self.retcode.lock().unwrap() = code;
        }

        fn set_realized(&self, profit: f64) {
            *self.deals.lock().unwrap() = vec![Deal {
                ticket: 1,
                time: Utc::now(),
                symbol: Symbol::new("XAUUSD"),
                profit,
                comment: "Astra-140325-BUY".to_string(),
            }];
        }

        fn add_position(&self, symbol: &str, side: Side, comment: &str) {
            self.positions.lock().unwrap().push(Position {
                ticket: 7,
                symbol: Symbol::new(symbol),
                side,
                volume: 0.5,
                price_open: 2000.0,
                profit: 0.0,
                comment: comment.to_string(),
            });
        }
    }

    #[async_trait]
    impl OrderGateway for FakeGateway {
        async fn place_order(
            &self,
            symbol: &Symbol,
            side: Side,
            volume: f64,
            comment: &str,
        ) -> Result<ExecutionReport> {
            self.log.lock().unwrap().orders.push((
                symbol.to_string(),
                side,
                volume,
                comment.to_string(),
            ));
            let retcode = *self.retcode.lock().unwrap();
            Ok(ExecutionReport {
                symbol: symbol.clone(),
                side,
                volume,
                price: Some(2000.0),
                comment: comment.to_string(),
                retcode: Some(retcode),
                order_id: Some(11),
                deal_id: Some(12),
                position_id: None,
            })
        }

        async fn close_positions(&self, symbol: &Symbol) -> Result<Vec<ExecutionReport>> {
            self.log.lock().unwrap().closes.push(symbol.to_string());
            Ok(vec![ExecutionReport {
                symbol: symbol.clone(),
                side: Side::Sell,
                volume: 0.5,
                price: Some(2001.0),
                comment: String::new(),
                retcode: Some(crate::types::RETCODE_DONE),
                order_id: Some(21),
                deal_id: Some(22),
                position_id: Some(7),
            }])
        }

        async fn open_positions(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>> {
            let positions = self.positions.lock().unwrap();
            Ok(positions
                .iter()
                .filter(|p| symbol.is_none_or(|s| &p.symbol == s))
                .cloned()
                .collect())
        }

        async fn deal_history(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Deal>> {
            Ok(self.deals.lock().unwrap().clone())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn symbol_config() -> SymbolConfig {
        SymbolConfig {
            symbol: "XAUUSD".to_string(),
            threshold_pips: 20,
            pip_size: 0.1,
            lot_size: 0.5,
            max_trades_per_day: 6,
            is_tradeable: true,
        }
    }

    fn coordinator(
        gateway: Arc<FakeGateway>,
        store: Arc<SqliteStateStore>,
        dry_run: bool,
    ) -> ExecutionCoordinator {
        let watchdog = WatchdogController::new(
            gateway.clone(),
            store.clone(),
            &WatchdogConfig::default(),
            "Astra",
            chrono_tz::UTC,
        );
        ExecutionCoordinator::new(
            gateway,
            store,
            watchdog,
            Notifier::disabled(),
            "Astra",
            dry_run,
        )
    }

    /// Decision at `current` for anchor 2000.0, pip 0.1, threshold 20
    fn decision_at(current: f64) -> Decision {
        let engine = ThresholdEngine::from_parts(0.1, 20.0);
        engine.evaluate(
            &Symbol::new("XAUUSD"),
            2000.0,
            TickWindow {
                current,
                high: current.max(2000.0),
                low: current.min(2000.0),
            },
            &ThresholdState::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn wait_is_a_noop_and_leaves_the_dedup_cache_alone() {
        let gateway = FakeGateway::new();
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut coordinator = coordinator(gateway.clone(), store.clone(), false);

        for _ in 0..3 {
            let outcome = coordinator
                .execute(&symbol_config(), &decision_at(2000.5), day(), Utc::now())
                .await
                .unwrap();
            assert_eq!(outcome.note, "no-op");
        }
        assert!(gateway.orders().is_empty());

        // An entry after the waits still fires on its first appearance.
        let outcome = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.note, "placed_long");
        assert_eq!(gateway.orders().len(), 1);
    }

    #[tokio::test]
    async fn identical_actions_fire_once_until_the_action_changes() {
        let gateway = FakeGateway::new();
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut coordinator = coordinator(gateway.clone(), store, false);

        let first = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(first.note, "placed_long");

        let repeat = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(repeat.note, "duplicate_action_suppressed");
        assert_eq!(gateway.orders().len(), 1);

        // A changed action always fires.
        let close = coordinator
            .execute(&symbol_config(), &decision_at(2004.0), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(close.note, "closed_positions");
        assert_eq!(gateway.closes(), vec!["XAUUSD".to_string()]);
    }

    #[tokio::test]
    async fn suppresses_repeat_after_failed_execution() {
        let gateway = FakeGateway::new();
        gateway.set_retcode(10016);
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut coordinator = coordinator(gateway.clone(), store, false);

        let first = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(first.note, "execution_failed");

        // The action was recorded before the rejection, so the identical
        // decision does not retry until the action changes.
        let repeat = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(repeat.note, "duplicate_action_suppressed");
        assert_eq!(gateway.orders().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_never_reaches_the_gateway() {
        let gateway = FakeGateway::new();
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut coordinator = coordinator(gateway.clone(), store.clone(), true);

        let outcome = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.note, "dry_run");
        assert!(gateway.orders().is_empty());

        let events = store.events_for_day(day()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "dry_run_action");
    }

    #[tokio::test]
    async fn locked_day_blocks_entries_but_still_closes() {
        let gateway = FakeGateway::new();
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        store
            .update_day_state(
                day(),
                &crate::types::DayState {
                    locked: true,
                    lock_reason: Some("profit_limit_reached_310.00".to_string()),
                    max_total_pnl: 310.0,
                },
            )
            .unwrap();
        let mut coordinator = coordinator(gateway.clone(), store, false);

        let entry = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(entry.note, "blocked_by_daily_lock");
        assert!(gateway.orders().is_empty());

        let close = coordinator
            .execute(&symbol_config(), &decision_at(2004.0), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(close.note, "closed_positions");
        assert_eq!(gateway.closes().len(), 1);
    }

    #[tokio::test]
    async fn watchdog_lock_closes_bot_positions_once() {
        let gateway = FakeGateway::new();
        gateway.set_realized(310.0);
        gateway.add_position("XAUUSD", Side::Buy, "Astra-140325-BUY-XAUUSD");
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut coordinator = coordinator(gateway.clone(), store.clone(), false);

        let first = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(first.note, "watchdog_lock_close");
        assert_eq!(gateway.closes(), vec!["XAUUSD".to_string()]);

        // The next tick sees a locked day; entries are blocked, no new close.
        let second = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(second.note, "blocked_by_daily_lock");
        assert_eq!(gateway.closes().len(), 1);

        let events = store.events_for_day(day()).unwrap();
        assert_eq!(events[0].event, "watchdog_lock");
        assert_eq!(events[1].event, "blocked_by_daily_lock");
    }

    #[tokio::test]
    async fn opposite_position_blocks_a_new_entry() {
        let gateway = FakeGateway::new();
        gateway.add_position("XAUUSD", Side::Sell, "Astra-140325-SELL-XAUUSD");
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut coordinator = coordinator(gateway.clone(), store, false);

        let outcome = coordinator
            .execute(&symbol_config(), &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.note, "conflicting_position");
        assert!(gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn non_tradeable_symbol_skips_execution() {
        let gateway = FakeGateway::new();
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let mut coordinator = coordinator(gateway.clone(), store, false);

        let config = SymbolConfig {
            is_tradeable: false,
            ..symbol_config()
        };
        let outcome = coordinator
            .execute(&config, &decision_at(2002.5), day(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.note, "not_tradeable");
        assert!(gateway.orders().is_empty());
    }

    #[test]
    fn order_comments_are_ascii_and_bounded() {
        let comment = order_comment("Astra", Side::Buy, &Symbol::new("XAUUSD"), day());
        assert_eq!(comment, "Astra-140325-BUY-XAUUSD");
        assert!(comment.len() <= MAX_COMMENT_LEN);
        assert!(comment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));

        // Odd characters are dropped and long tags truncated.
        let odd = order_comment(
            "Astra Bot #1",
            Side::Sell,
            &Symbol::new("VERYLONGSYMBOL"),
            day(),
        );
        assert!(odd.len() <= MAX_COMMENT_LEN);
        assert!(odd.starts_with("AstraBot1-140325-SELL"));

        assert_eq!(daily_comment_prefix("Astra", day()), "Astra-140325-");
    }

    #[test]
    fn trade_messages_route_by_outcome() {
        let report = ExecutionReport {
            symbol: Symbol::new("XAUUSD"),
            side: Side::Buy,
            volume: 0.5,
            price: Some(2001.3),
            comment: "Astra-140325-BUY-XAUUSD".to_string(),
            retcode: Some(crate::types::RETCODE_DONE),
            order_id: Some(11),
            deal_id: Some(12),
            position_id: None,
        };
        let (channel, message) = trade_message(&report);
        assert_eq!(channel, Channel::Trade);
        assert!(message.contains("**Symbol:** XAUUSD"));
        assert!(message.contains("**Type:** BUY"));

        let failed = ExecutionReport {
            retcode: Some(10016),
            ..report
        };
        let (channel, message) = trade_message(&failed);
        assert_eq!(channel, Channel::Critical);
        assert!(message.starts_with("**Trade Failed**"));
    }
}
