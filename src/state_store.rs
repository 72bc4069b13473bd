// State store for the live engine
// SQLite-based persistence of daily lock state, threshold stamps, and the
// trade event audit trail. Survives restarts; the engine reloads its
// per-day documents on startup and after each daily rollover.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::StateConfig;
use crate::types::{DayState, Direction, Symbol, ThresholdState, TradeAction, TradeEvent};

// =============================================================================
// Store Implementation
// =============================================================================

pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStateStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };

        store.create_tables()?;
        info!("SQLite state store initialized: {}", store.db_path.display());

        Ok(store)
    }

    /// In-memory store, used by tests and dry runs that should leave no file
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        };
        store.create_tables()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS day_state (
                day TEXT PRIMARY KEY,
                locked INTEGER NOT NULL DEFAULT 0,
                lock_reason TEXT,
                max_total_pnl REAL NOT NULL DEFAULT 0,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS threshold_state (
                symbol TEXT NOT NULL,
                day TEXT NOT NULL,
                first_threshold_at TEXT,
                second_threshold_at TEXT,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (symbol, day)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trade_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                day TEXT NOT NULL,
                ts TEXT NOT NULL,
                symbol TEXT NOT NULL,
                event TEXT NOT NULL,
                action TEXT NOT NULL,
                direction TEXT NOT NULL,
                total_pnl REAL NOT NULL DEFAULT 0,
                trade_response TEXT
            )",
            [],
        )?;

        // Create indexes
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trade_events_day ON trade_events(day)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trade_events_symbol ON trade_events(symbol)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    // =========================================================================
    // Day State
    // =========================================================================

    /// Today's watchdog document; a default unlocked state when absent
    pub fn day_state(&self, day: NaiveDate) -> Result<DayState> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT locked, lock_reason, max_total_pnl FROM day_state WHERE day = ?1")?;

        let state = stmt.query_row(params![day.to_string()], |row| {
            Ok(DayState {
                locked: row.get::<_, i64>(0)? != 0,
                lock_reason: row.get(1)?,
                max_total_pnl: row.get(2)?,
            })
        });

        match state {
            Ok(s) => Ok(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(DayState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge `patch` into the stored day document and return the result.
    ///
    /// `locked` is a one-way ratchet: once a day is locked no later patch can
    /// unlock it, and the original lock reason is kept. `max_total_pnl` only
    /// moves up.
    pub fn update_day_state(&self, day: NaiveDate, patch: &DayState) -> Result<DayState> {
        let current = self.day_state(day)?;

        let locked = current.locked || patch.locked;
        let lock_reason = if current.locked {
            current.lock_reason.clone()
        } else {
            patch.lock_reason.clone().or(current.lock_reason)
        };
        let max_total_pnl = current.max_total_pnl.max(patch.max_total_pnl);

        let merged = DayState {
            locked,
            lock_reason,
            max_total_pnl,
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO day_state
             (day, locked, lock_reason, max_total_pnl, updated_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
            params![
                day.to_string(),
                if merged.locked { 1 } else { 0 },
                merged.lock_reason,
                merged.max_total_pnl,
            ],
        )?;

        debug!(
            "Day state saved: {} locked={} max_pnl={:.2}",
            day, merged.locked, merged.max_total_pnl
        );
        Ok(merged)
    }

    // =========================================================================
    // Threshold State
    // =========================================================================

    /// Sticky threshold stamps for one symbol-day; empty when absent
    pub fn threshold_state(&self, symbol: &Symbol, day: NaiveDate) -> Result<ThresholdState> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT first_threshold_at, second_threshold_at FROM threshold_state
             WHERE symbol = ?1 AND day = ?2",
        )?;

        let row = stmt.query_row(params![symbol.as_str(), day.to_string()], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
            ))
        });

        match row {
            Ok((first, second)) => Ok(ThresholdState {
                first_threshold_at: parse_opt_ts(first.as_deref())?,
                second_threshold_at: parse_opt_ts(second.as_deref())?,
            }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(ThresholdState::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_threshold_state(
        &self,
        symbol: &Symbol,
        day: NaiveDate,
        state: &ThresholdState,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO threshold_state
             (symbol, day, first_threshold_at, second_threshold_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
            params![
                symbol.as_str(),
                day.to_string(),
                state.first_threshold_at.map(|t| t.to_rfc3339()),
                state.second_threshold_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn threshold_states_for_day(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<(Symbol, ThresholdState)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol, first_threshold_at, second_threshold_at FROM threshold_state
             WHERE day = ?1 ORDER BY symbol",
        )?;

        let rows = stmt
            .query_map(params![day.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(symbol, first, second)| {
                Ok((
                    Symbol::new(&symbol),
                    ThresholdState {
                        first_threshold_at: parse_opt_ts(first.as_deref())?,
                        second_threshold_at: parse_opt_ts(second.as_deref())?,
                    },
                ))
            })
            .collect()
    }

    // =========================================================================
    // Trade Events
    // =========================================================================

    pub fn append_trade_event(&self, event: &TradeEvent) -> Result<()> {
        let response_json = event
            .trade_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trade_events
             (day, ts, symbol, event, action, direction, total_pnl, trade_response)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.date.to_string(),
                event.ts.to_rfc3339(),
                event.symbol.as_str(),
                event.event,
                event.action.as_str(),
                event.direction.as_str(),
                event.total_pnl,
                response_json,
            ],
        )?;

        debug!(
            "Trade event appended: {} {} ({})",
            event.symbol, event.event, event.action
        );
        Ok(())
    }

    /// All events for one trading day, in append order
    pub fn events_for_day(&self, day: NaiveDate) -> Result<Vec<TradeEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT day, ts, symbol, event, action, direction, total_pnl, trade_response
             FROM trade_events WHERE day = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![day.to_string()], |row| {
                Ok(RawEvent {
                    day: row.get(0)?,
                    ts: row.get(1)?,
                    symbol: row.get(2)?,
                    event: row.get(3)?,
                    action: row.get(4)?,
                    direction: row.get(5)?,
                    total_pnl: row.get(6)?,
                    trade_response: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawEvent::into_event).collect()
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Pretty-JSON dump of one trading day for inspection
    pub fn export_json<P: AsRef<Path>>(&self, day: NaiveDate, path: P) -> Result<()> {
        let day_state = self.day_state(day)?;
        let thresholds: BTreeMap<String, ThresholdState> = self
            .threshold_states_for_day(day)?
            .into_iter()
            .map(|(symbol, state)| (symbol.to_string(), state))
            .collect();
        let events = self.events_for_day(day)?;

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "day": day.to_string(),
            "day_state": day_state,
            "threshold_states": thresholds,
            "events": events,
        });

        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&state)?)?;
        debug!("Day state exported to: {}", path.as_ref().display());
        Ok(())
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

struct RawEvent {
    day: String,
    ts: String,
    symbol: String,
    event: String,
    action: String,
    direction: String,
    total_pnl: f64,
    trade_response: Option<String>,
}

impl RawEvent {
    fn into_event(self) -> Result<TradeEvent> {
        Ok(TradeEvent {
            date: self
                .day
                .parse()
                .with_context(|| format!("Bad day in trade_events: {}", self.day))?,
            ts: parse_ts(&self.ts)?,
            symbol: Symbol::new(&self.symbol),
            event: self.event,
            action: action_from_db(&self.action),
            direction: direction_from_db(&self.direction),
            total_pnl: self.total_pnl,
            trade_response: self
                .trade_response
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .unwrap_or_default(),
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Bad timestamp in state store: {s}"))
}

fn parse_opt_ts(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

fn action_from_db(s: &str) -> TradeAction {
    match s {
        "place_long" => TradeAction::PlaceLong,
        "place_short" => TradeAction::PlaceShort,
        "close" => TradeAction::Close,
        _ => TradeAction::Wait,
    }
}

fn direction_from_db(s: &str) -> Direction {
    match s {
        "buy" => Direction::Buy,
        "sell" => Direction::Sell,
        _ => Direction::Neutral,
    }
}

// =============================================================================
// Factory Function
// =============================================================================

pub fn create_state_store(config: &StateConfig) -> Result<SqliteStateStore> {
    SqliteStateStore::new(&config.db_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, m, 0).unwrap()
    }

    #[test]
    fn missing_day_defaults_to_unlocked() {
        let store = SqliteStateStore::in_memory().unwrap();
        let state = store.day_state(day()).unwrap();
        assert!(!state.locked);
        assert!(state.lock_reason.is_none());
        assert_eq!(state.max_total_pnl, 0.0);
    }

    #[test]
    fn lock_is_a_one_way_ratchet() {
        let store = SqliteStateStore::in_memory().unwrap();

        let locked = store
            .update_day_state(
                day(),
                &DayState {
                    locked: true,
                    lock_reason: Some("profit_limit_reached_310.00".to_string()),
                    max_total_pnl: 310.0,
                },
            )
            .unwrap();
        assert!(locked.locked);

        // A later unlocked patch must not clear the lock or its reason.
        let after = store
            .update_day_state(
                day(),
                &DayState {
                    locked: false,
                    lock_reason: None,
                    max_total_pnl: 0.0,
                },
            )
            .unwrap();
        assert!(after.locked);
        assert_eq!(
            after.lock_reason.as_deref(),
            Some("profit_limit_reached_310.00")
        );

        let reread = store.day_state(day()).unwrap();
        assert!(reread.locked);
    }

    #[test]
    fn max_total_pnl_only_moves_up() {
        let store = SqliteStateStore::in_memory().unwrap();

        for (pnl, expected) in [(100.0, 100.0), (250.0, 250.0), (180.0, 250.0)] {
            let state = store
                .update_day_state(
                    day(),
                    &DayState {
                        locked: false,
                        lock_reason: None,
                        max_total_pnl: pnl,
                    },
                )
                .unwrap();
            assert_eq!(state.max_total_pnl, expected);
        }
    }

    #[test]
    fn threshold_state_round_trips() {
        let store = SqliteStateStore::in_memory().unwrap();
        let symbol = Symbol::new("XAUUSD");

        let missing = store.threshold_state(&symbol, day()).unwrap();
        assert!(missing.first_threshold_at.is_none());

        let state = ThresholdState {
            first_threshold_at: Some(ts(5, 12)),
            second_threshold_at: None,
        };
        store.save_threshold_state(&symbol, day(), &state).unwrap();

        let loaded = store.threshold_state(&symbol, day()).unwrap();
        assert_eq!(loaded.first_threshold_at, Some(ts(5, 12)));
        assert!(loaded.second_threshold_at.is_none());

        let per_day = store.threshold_states_for_day(day()).unwrap();
        assert_eq!(per_day.len(), 1);
        assert_eq!(per_day[0].0.as_str(), "XAUUSD");
    }

    #[test]
    fn events_come_back_in_append_order() {
        let store = SqliteStateStore::in_memory().unwrap();
        let symbol = Symbol::new("XAUUSD");

        for (minute, event, action) in [
            (1, "wait", TradeAction::Wait),
            (2, "placed_long", TradeAction::PlaceLong),
            (3, "closed_positions", TradeAction::Close),
        ] {
            store
                .append_trade_event(&TradeEvent {
                    date: day(),
                    ts: ts(5, minute),
                    symbol: symbol.clone(),
                    event: event.to_string(),
                    action,
                    direction: Direction::Buy,
                    total_pnl: 12.5,
                    trade_response: Some(serde_json::json!({"retcode": 10009})),
                })
                .unwrap();
        }

        let events = store.events_for_day(day()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "wait");
        assert_eq!(events[1].action, TradeAction::PlaceLong);
        assert_eq!(events[2].event, "closed_positions");
        assert_eq!(
            events[1].trade_response.as_ref().unwrap()["retcode"],
            10009
        );

        // Other days see nothing.
        let other = store
            .events_for_day(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap())
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn export_writes_a_day_dump() {
        let store = SqliteStateStore::in_memory().unwrap();
        store
            .update_day_state(
                day(),
                &DayState {
                    locked: false,
                    lock_reason: None,
                    max_total_pnl: 42.0,
                },
            )
            .unwrap();

        let path = std::env::temp_dir().join(format!("anchor_trader_export_{}.json", std::process::id()));
        store.export_json(day(), &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["day"], "2025-03-14");
        assert_eq!(parsed["day_state"]["max_total_pnl"], 42.0);

        std::fs::remove_file(&path).ok();
    }
}
