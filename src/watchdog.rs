//! Daily PnL watchdog
//!
//! Sums the bot's realized profit for the trading day from the gateway's deal
//! history (deals are recognized by the bot comment prefix), optionally adds
//! the floating PnL of open bot positions, and locks the day when a limit is
//! hit. The lock is one-way: a day that locks stays locked even if PnL later
//! drops back under the limit.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bridge::OrderGateway;
use crate::config::WatchdogConfig;
use crate::state_store::SqliteStateStore;
use crate::types::DayState;

/// Outcome of one watchdog check
#[derive(Debug, Clone)]
pub struct WatchdogVerdict {
    pub total_pnl: f64,
    pub locked: bool,
    pub lock_reason: Option<String>,
    /// True exactly once per day, on the unlocked-to-locked transition
    pub just_locked: bool,
}

pub struct WatchdogController {
    gateway: Arc<dyn OrderGateway>,
    store: Arc<SqliteStateStore>,
    server_tz: Tz,
    /// Deal comments must start with this to count toward the day's PnL
    comment_prefix: String,
    profit_limit_usd: f64,
    loss_limit_usd: Option<f64>,
    include_open_pnl: bool,
}

impl WatchdogController {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        store: Arc<SqliteStateStore>,
        config: &WatchdogConfig,
        comment_prefix: &str,
        server_tz: Tz,
    ) -> Self {
        Self {
            gateway,
            store,
            server_tz,
            comment_prefix: format!("{comment_prefix}-"),
            profit_limit_usd: config.profit_limit_usd,
            loss_limit_usd: config.loss_limit_usd,
            include_open_pnl: config.include_open_pnl,
        }
    }

    /// Compute the day's total PnL and enforce the daily lock
    pub async fn check(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<WatchdogVerdict> {
        let total_pnl = self.total_pnl(day, now).await?;
        let state = self.store.day_state(day)?;

        // High-water mark updates regardless of lock state
        if total_pnl > state.max_total_pnl {
            self.store.update_day_state(
                day,
                &DayState {
                    locked: false,
                    lock_reason: None,
                    max_total_pnl: total_pnl,
                },
            )?;
        }

        if state.locked {
            return Ok(WatchdogVerdict {
                total_pnl,
                locked: true,
                lock_reason: state.lock_reason,
                just_locked: false,
            });
        }

        if total_pnl >= self.profit_limit_usd {
            return self.lock_day(day, total_pnl, format!("profit_limit_reached_{total_pnl:.2}"));
        }

        if let Some(loss_limit) = self.loss_limit_usd {
            if total_pnl <= loss_limit {
                return self.lock_day(
                    day,
                    total_pnl,
                    format!("loss_limit_reached_{total_pnl:.2}"),
                );
            }
        }

        Ok(WatchdogVerdict {
            total_pnl,
            locked: false,
            lock_reason: None,
            just_locked: false,
        })
    }

    fn lock_day(&self, day: NaiveDate, total_pnl: f64, reason: String) -> Result<WatchdogVerdict> {
        warn!("Watchdog locked {day}: {reason}");
        self.store.update_day_state(
            day,
            &DayState {
                locked: true,
                lock_reason: Some(reason.clone()),
                max_total_pnl: total_pnl,
            },
        )?;
        Ok(WatchdogVerdict {
            total_pnl,
            locked: true,
            lock_reason: Some(reason),
            just_locked: true,
        })
    }

    /// Realized PnL of bot deals since the day's start in server time, plus
    /// floating PnL of open bot positions when enabled
    pub async fn total_pnl(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<f64> {
        let window_start = self.day_start_utc(day)?;
        let deals = self
            .gateway
            .deal_history(window_start, now)
            .await
            .context("Failed to fetch deal history for watchdog")?;

        let mut total = 0.0;
        for deal in &deals {
            if !deal.comment.trim().starts_with(&self.comment_prefix) {
                continue;
            }
            total += deal.profit;
        }

        if self.include_open_pnl {
            let positions = self
                .gateway
                .open_positions(None)
                .await
                .context("Failed to fetch open positions for watchdog")?;
            for position in &positions {
                if position.comment.trim().starts_with(&self.comment_prefix) {
                    total += position.profit;
                }
            }
        }

        debug!("Watchdog total PnL for {day}: {total:.2}");
        Ok(total)
    }

    fn day_start_utc(&self, day: NaiveDate) -> Result<DateTime<Utc>> {
        self.server_tz
            .with_ymd_and_hms(day.year(), day.month(), day.day(), 0, 0, 0)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("Invalid day start for {day}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Deal, ExecutionReport, Position, Side, Symbol};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeGateway {
        deals: Mutex<Vec<Deal>>,
        positions: Mutex<Vec<Position>>,
    }

    impl FakeGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deals: Mutex::new(Vec::new()),
                positions: Mutex::new(Vec::new()),
            })
        }

        fn set_realized(&self, profit: f64, comment: &str) {
            *self.deals.lock().unwrap() = vec![Deal {
                ticket: 1,
                time: Utc::now(),
                symbol: Symbol::new("XAUUSD"),
                profit,
                comment: comment.to_string(),
            }];
        }

        fn set_open(&self, profit: f64, comment: &str) {
            *self.positions.lock().unwrap() = vec![Position {
                ticket: 2,
                symbol: Symbol::new("XAUUSD"),
                side: Side::Buy,
                volume: 0.5,
                price_open: 2000.0,
                profit,
                comment: comment.to_string(),
            }];
        }
    }

    #[async_trait]
    impl OrderGateway for FakeGateway {
        async fn place_order(
            &self,
            _symbol: &Symbol,
            _side: Side,
            _volume: f64,
            _comment: &str,
        ) -> Result<ExecutionReport> {
            anyhow::bail!("not used")
        }

        async fn close_positions(&self, _symbol: &Symbol) -> Result<Vec<ExecutionReport>> {
            Ok(Vec::new())
        }

        async fn open_positions(&self, _symbol: Option<&Symbol>) -> Result<Vec<Position>> {
            Ok(self.positions.lock().unwrap().clone())
        }

        async fn deal_history(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Deal>> {
            Ok(self.deals.lock().unwrap().clone())
        }
    }

    fn controller(
        gateway: Arc<FakeGateway>,
        store: Arc<SqliteStateStore>,
        config: WatchdogConfig,
    ) -> WatchdogController {
        WatchdogController::new(gateway, store, &config, "Astra", chrono_tz::UTC)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[tokio::test]
    async fn locks_exactly_once_over_a_pnl_sequence() {
        let gateway = FakeGateway::new();
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let watchdog = controller(gateway.clone(), store.clone(), WatchdogConfig::default());
        let now = Utc::now();

        let mut observations = Vec::new();
        for pnl in [100.0, 250.0, 310.0, 280.0] {
            gateway.set_realized(pnl, "Astra-140325-BUY");
            let verdict = watchdog.check(day(), now).await.unwrap();
            observations.push((verdict.locked, verdict.just_locked));
        }

        assert_eq!(
            observations,
            vec![(false, false), (false, false), (true, true), (true, false)]
        );

        let state = store.day_state(day()).unwrap();
        assert!(state.locked);
        assert_eq!(
            state.lock_reason.as_deref(),
            Some("profit_limit_reached_310.00")
        );
        assert_eq!(state.max_total_pnl, 310.0);
    }

    #[tokio::test]
    async fn ignores_deals_without_the_bot_prefix() {
        let gateway = FakeGateway::new();
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let watchdog = controller(gateway.clone(), store, WatchdogConfig::default());

        gateway.set_realized(500.0, "manual trade");
        let verdict = watchdog.check(day(), Utc::now()).await.unwrap();

        assert_eq!(verdict.total_pnl, 0.0);
        assert!(!verdict.locked);
    }

    #[tokio::test]
    async fn open_pnl_counts_only_when_enabled() {
        let gateway = FakeGateway::new();
        gateway.set_realized(100.0, "Astra-140325-BUY");
        gateway.set_open(50.0, "Astra-140325-SELL");

        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let with_open = controller(gateway.clone(), store.clone(), WatchdogConfig::default());
        assert_eq!(with_open.total_pnl(day(), Utc::now()).await.unwrap(), 150.0);

        let config = WatchdogConfig {
            include_open_pnl: false,
            ..Default::default()
        };
        let realized_only = controller(gateway, store, config);
        assert_eq!(
            realized_only.total_pnl(day(), Utc::now()).await.unwrap(),
            100.0
        );
    }

    #[tokio::test]
    async fn loss_limit_locks_when_configured() {
        let gateway = FakeGateway::new();
        gateway.set_realized(-250.0, "Astra-140325-BUY");

        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let config = WatchdogConfig {
            loss_limit_usd: Some(-200.0),
            ..Default::default()
        };
        let watchdog = controller(gateway, store, config);

        let verdict = watchdog.check(day(), Utc::now()).await.unwrap();
        assert!(verdict.locked);
        assert!(verdict.just_locked);
        assert_eq!(
            verdict.lock_reason.as_deref(),
            Some("loss_limit_reached_-250.00")
        );
    }
}
