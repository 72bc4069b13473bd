//! Fire-and-forget notifications
//!
//! Posts plain-text messages as JSON to per-channel webhook URLs. Each channel
//! has a sliding-window rate limiter with a cooldown between sends, and a
//! repeated-body deduper drops messages whose normalized text was already sent
//! within the TTL. Delivery runs on a detached task; failures are logged and
//! never surface to the decision path.

use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::NotifyConfig;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery channel, each with its own webhook and limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Info,
    Alert,
    Critical,
    Trade,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Info => "info",
            Channel::Alert => "alert",
            Channel::Critical => "critical",
            Channel::Trade => "trade",
        }
    }

    fn all() -> [Channel; 4] {
        [Channel::Info, Channel::Alert, Channel::Critical, Channel::Trade]
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sliding-window limiter with a cooldown between consecutive sends
struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    cooldown: Duration,
    events: VecDeque<Instant>,
    last_sent: Option<Instant>,
}

impl RateLimiter {
    fn new(max_per_window: usize, window: Duration, cooldown: Duration) -> Self {
        Self {
            max_per_window,
            window,
            cooldown,
            events: VecDeque::new(),
            last_sent: None,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        while self
            .events
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            self.events.pop_front();
        }
        if self
            .last_sent
            .is_some_and(|last| now.duration_since(last) < self.cooldown)
        {
            return false;
        }
        if self.events.len() >= self.max_per_window {
            return false;
        }
        self.events.push_back(now);
        self.last_sent = Some(now);
        true
    }
}

/// Drops messages whose body repeated within the TTL
struct DeDuper {
    ttl: Duration,
    seen: HashMap<String, Instant>,
}

impl DeDuper {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
        }
    }

    fn allow(&mut self, key: String, now: Instant) -> bool {
        self.seen.retain(|_, ts| now.duration_since(*ts) <= self.ttl);
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        true
    }
}

#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    client: Client,
    webhooks: HashMap<Channel, String>,
    limiters: Mutex<HashMap<Channel, RateLimiter>>,
    deduper: Mutex<DeDuper>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        let mut webhooks = HashMap::new();
        for (channel, url) in [
            (Channel::Info, &config.info_webhook),
            (Channel::Alert, &config.alert_webhook),
            (Channel::Critical, &config.critical_webhook),
            (Channel::Trade, &config.trade_webhook),
        ] {
            if let Some(url) = url {
                let url = url.trim();
                if !url.is_empty() {
                    webhooks.insert(channel, url.to_string());
                }
            }
        }

        let window = Duration::from_secs(config.window_secs);
        let cooldown = Duration::from_secs(config.cooldown_secs);
        let limiters = Channel::all()
            .into_iter()
            .map(|channel| {
                (
                    channel,
                    RateLimiter::new(config.max_per_window as usize, window, cooldown),
                )
            })
            .collect();

        Self {
            inner: Arc::new(NotifierInner {
                client: Client::new(),
                webhooks,
                limiters: Mutex::new(limiters),
                deduper: Mutex::new(DeDuper::new(Duration::from_secs(config.dedup_ttl_secs))),
            }),
        }
    }

    /// Notifier with no webhooks configured; every send is a silent drop
    pub fn disabled() -> Self {
        Self::new(&NotifyConfig::default())
    }

    /// Queue a message for delivery. Returns whether it was accepted; a
    /// `false` means dropped (no webhook, rate-limited, or duplicate), never
    /// a delivery failure.
    pub fn send(&self, channel: Channel, message: &str) -> bool {
        let message = clean_message(message);
        if message.is_empty() {
            return false;
        }

        // Channel webhook, falling back to the info channel
        let url = match self
            .inner
            .webhooks
            .get(&channel)
            .or_else(|| self.inner.webhooks.get(&Channel::Info))
        {
            Some(url) => url.clone(),
            None => {
                debug!("No webhook for channel '{channel}', dropping message");
                return false;
            }
        };

        let now = Instant::now();
        {
            let mut limiters = self.inner.limiters.lock().unwrap();
            if let Some(limiter) = limiters.get_mut(&channel) {
                if !limiter.allow(now) {
                    debug!("Rate-limited on channel '{channel}', dropped");
                    return false;
                }
            }
        }
        {
            let mut deduper = self.inner.deduper.lock().unwrap();
            if !deduper.allow(dedup_key(channel, &message), now) {
                debug!("Duplicate suppressed on channel '{channel}'");
                return false;
            }
        }

        let client = self.inner.client.clone();
        tokio::spawn(async move {
            let payload = serde_json::json!({ "content": message });
            let sent = client
                .post(&url)
                .timeout(DELIVERY_TIMEOUT)
                .json(&payload)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Notification delivered on '{channel}'");
                }
                Ok(resp) => {
                    warn!("Notification on '{channel}' returned {}", resp.status());
                }
                Err(e) => {
                    warn!("Notification on '{channel}' failed: {e}");
                }
            }
        });
        true
    }
}

fn dedup_key(channel: Channel, message: &str) -> String {
    let normalized = message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{}:{}", channel.as_str(), hex::encode(digest))
}

fn clean_message(message: &str) -> String {
    let mut v = message.trim();
    if let Some(stripped) = v.strip_suffix(['.', ';', ',']) {
        v = stripped.trim_end();
    }
    v.to_string()
}
