//! Live trading command
//!
//! Polls the bridge on a fixed interval, re-anchors each symbol on day
//! rollover, evaluates every tick against the threshold bands, and drives
//! decisions through the execution coordinator. Ctrl+C shuts the loop
//! down cleanly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use anchor_trader::anchor::{AnchorResolver, AnchorSnapshot};
use anchor_trader::bridge::{BridgeClient, OrderGateway, PriceFeed};
use anchor_trader::config::{Config, SymbolConfig};
use anchor_trader::executor::ExecutionCoordinator;
use anchor_trader::notify::{Channel, Notifier};
use anchor_trader::state_store::{create_state_store, SqliteStateStore};
use anchor_trader::threshold::{ThresholdEngine, TickWindow};
use anchor_trader::types::Symbol;
use anchor_trader::watchdog::WatchdogController;

/// Per-symbol state carried across ticks
struct SymbolSession {
    symbol: Symbol,
    config: SymbolConfig,
    engine: ThresholdEngine,
    /// Today's anchor; None before the anchor time and after rollover
    snapshot: Option<AnchorSnapshot>,
}

/// Live trader state
struct LiveTrader {
    resolver: AnchorResolver,
    feed: Arc<dyn PriceFeed>,
    gateway: Arc<dyn OrderGateway>,
    store: Arc<SqliteStateStore>,
    notifier: Notifier,
    executor: ExecutionCoordinator,
    sessions: Vec<SymbolSession>,
    tick_count: u64,
}

impl LiveTrader {
    fn new(config: &Config) -> Result<Self> {
        let client = Arc::new(BridgeClient::from_config(&config.bridge)?);
        let feed: Arc<dyn PriceFeed> = client.clone();
        let gateway: Arc<dyn OrderGateway> = client;

        let store = Arc::new(create_state_store(&config.state)?);
        let notifier = Notifier::new(&config.notify);
        let resolver = AnchorResolver::new(feed.clone(), &config.schedule)?;
        let server_tz = config.schedule.server_tz()?;

        let watchdog = WatchdogController::new(
            gateway.clone(),
            store.clone(),
            &config.watchdog,
            &config.trading.comment_prefix,
            server_tz,
        );
        let executor = ExecutionCoordinator::new(
            gateway.clone(),
            store.clone(),
            watchdog,
            notifier.clone(),
            &config.trading.comment_prefix,
            config.trading.dry_run,
        );

        // A symbol without instrument parameters is disabled, not fatal
        let mut sessions = Vec::new();
        for symbol in config.trading.symbols() {
            match config.symbol_config(symbol.as_str()) {
                Ok(sc) => sessions.push(SymbolSession {
                    symbol,
                    config: sc.clone(),
                    engine: ThresholdEngine::new(sc),
                    snapshot: None,
                }),
                Err(e) => warn!("{symbol}: {e:#}; symbol disabled for this session"),
            }
        }
        if sessions.is_empty() {
            anyhow::bail!("No usable symbols under [trading]");
        }

        Ok(Self {
            resolver,
            feed,
            gateway,
            store,
            notifier,
            executor,
            sessions,
            tick_count: 0,
        })
    }

    /// One round trip to the bridge before entering the loop. A dead
    /// bridge should fail the process at startup, not on the first tick.
    async fn verify_connectivity(&self) -> Result<()> {
        let positions = self
            .gateway
            .open_positions(None)
            .await
            .context("Bridge unreachable at startup")?;
        info!("Bridge reachable, {} open position(s)", positions.len());
        Ok(())
    }

    /// One pass over all symbols. A failing symbol is logged and skipped
    /// until the next tick; it never takes the loop down.
    async fn run_tick(&mut self) {
        let now = Utc::now();
        self.tick_count += 1;

        for idx in 0..self.sessions.len() {
            let symbol = self.sessions[idx].symbol.clone();
            if let Err(e) = self.process_symbol(idx, now).await {
                error!("{symbol}: tick failed: {e:#}");
            }
        }

        if self.tick_count % 300 == 0 {
            let anchored = self
                .sessions
                .iter()
                .filter(|s| s.snapshot.is_some())
                .count();
            info!(
                "Heartbeat: tick {} ({}/{} symbols anchored)",
                self.tick_count,
                anchored,
                self.sessions.len()
            );
        }
    }

    async fn process_symbol(&mut self, idx: usize, now: DateTime<Utc>) -> Result<()> {
        let session = &mut self.sessions[idx];
        let symbol = session.symbol.clone();

        // Rollover: once the target moves to a new trading day the stored
        // snapshot is stale and the symbol re-anchors.
        let (target, _) = self.resolver.target_server_time(None, now)?;
        let stale = session
            .snapshot
            .as_ref()
            .is_none_or(|s| s.trading_day != target.date_naive());
        if stale {
            session.snapshot = None;
            if now < target.with_timezone(&Utc) {
                // Before today's anchor time there is nothing to evaluate
                return Ok(());
            }

            let snapshot = self.resolver.resolve(&symbol, None, now).await?;
            match snapshot.price_at_anchor {
                Some(anchor) => {
                    info!(
                        "{symbol} anchored at {:.5} ({} server)",
                        anchor,
                        snapshot.anchor_server.format("%Y-%m-%d %H:%M"),
                    );
                    let mut lines = vec![format!(
                        "{symbol} anchor {:.5} @ {} ({} server)",
                        anchor,
                        snapshot.anchor_display.format("%H:%M %Z"),
                        snapshot.anchor_server.format("%Y-%m-%d %H:%M"),
                    )];
                    if let Some(note) = &snapshot.weekend_note {
                        lines.push(note.clone());
                    }
                    self.notifier.send(Channel::Info, &lines.join("\n"));
                    self.executor.reset_symbol(&symbol);
                    session.snapshot = Some(snapshot);
                }
                None => {
                    // Bars have not reached the anchor yet; retry next tick
                    debug!("{symbol}: no bars at the anchor yet");
                    return Ok(());
                }
            }
        }

        let Some(snapshot) = session.snapshot.as_ref() else {
            return Ok(());
        };
        let Some(anchor) = snapshot.price_at_anchor else {
            return Ok(());
        };
        let day = snapshot.trading_day;

        let tick = self.feed.get_tick(&symbol).await?;
        let Some(current) = tick.price() else {
            warn!("{symbol}: tick carried no usable price, skipping");
            self.notifier.send(
                Channel::Critical,
                &format!("{symbol}: no usable price in tick (last/bid/ask all zero)"),
            );
            return Ok(());
        };

        let range = self
            .resolver
            .high_low_since(&symbol, snapshot.anchor_server, now)
            .await?;
        let window = TickWindow {
            current,
            high: range.high.unwrap_or(current).max(current),
            low: range.low.unwrap_or(current).min(current),
        };

        let previous = self.store.threshold_state(&symbol, day)?;
        let decision = session
            .engine
            .evaluate(&symbol, anchor, window, &previous, now);
        self.store.save_threshold_state(&symbol, day, &decision.state)?;

        // Stage crossings are reported once, when the stamp first lands
        let first_crossed =
            previous.first_threshold_at.is_none() && decision.state.first_threshold_at.is_some();
        let second_crossed =
            previous.second_threshold_at.is_none() && decision.state.second_threshold_at.is_some();
        if first_crossed || second_crossed {
            let stage = if second_crossed { "second" } else { "first" };
            info!(
                "{symbol}: {stage} threshold crossed at {:.5} (scale {:+.4})",
                current, decision.scale
            );
            let mut lines = vec![format!(
                "{symbol} {stage} threshold: price {:.5}, anchor {:.5}, scale {:+.4}",
                current, anchor, decision.scale
            )];
            match self
                .resolver
                .extremes_relative(&symbol, anchor, Some(snapshot.anchor_server), now)
                .await
            {
                Ok(extremes) => {
                    if let (Some(high), Some(at)) =
                        (extremes.highest_above, extremes.first_up_break_at)
                    {
                        lines.push(format!(
                            "high {:.5} (first above anchor {})",
                            high,
                            at.format("%H:%M:%S UTC")
                        ));
                    }
                    if let (Some(low), Some(at)) =
                        (extremes.lowest_below, extremes.first_down_break_at)
                    {
                        lines.push(format!(
                            "low {:.5} (first below anchor {})",
                            low,
                            at.format("%H:%M:%S UTC")
                        ));
                    }
                }
                Err(e) => debug!("{symbol}: extremes lookup failed: {e:#}"),
            }
            self.notifier.send(Channel::Info, &lines.join("\n"));
        }

        let outcome = self
            .executor
            .execute(&session.config, &decision, day, now)
            .await?;
        if !outcome.note.is_empty() {
            debug!("{symbol}: {}", outcome.note);
        }
        Ok(())
    }
}

pub fn run(config_path: String) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path))
}

async fn run_async(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;

    let mode = if config.trading.dry_run {
        "DRY RUN"
    } else {
        "LIVE"
    };

    info!("{}", "=".repeat(60));
    info!("Anchor threshold trader ({mode})");
    info!("{}", "=".repeat(60));
    info!("Symbols:  {}", config.trading.symbols.join(", "));
    info!(
        "Anchor:   {:02}:{:02} {}",
        config.schedule.hour, config.schedule.minute, config.schedule.display_timezone
    );
    info!("Server:   {}", config.schedule.server_timezone);
    info!("Poll:     {}s", config.trading.poll_interval_secs);
    info!("Bridge:   {}", config.bridge.base_url);
    info!("{}", "=".repeat(60));

    if !config.trading.dry_run {
        warn!("LIVE TRADING MODE: real orders will reach the gateway");
        warn!("Press Ctrl+C within 10 seconds to abort...");
        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    let mut trader = LiveTrader::new(&config)?;
    trader.verify_connectivity().await?;
    info!("State DB: {}", trader.store.path().display());

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                shutdown_flag_clone.store(true, Ordering::SeqCst);
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    let mut tick_interval = interval(Duration::from_secs(config.trading.poll_interval_secs.max(1)));

    info!("Starting polling loop...");

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
                trader.run_tick().await;
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Live session ended.");
    Ok(())
}
