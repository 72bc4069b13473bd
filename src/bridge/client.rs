//! HTTP client for the terminal bridge
//!
//! Every call is a signed JSON POST:
//! - Automatic retry with exponential backoff
//! - Rate limiting
//! - Circuit breaker so a dead bridge fails fast
//!
//! Timestamps cross the wire as Unix epoch seconds in both directions; the
//! raw payloads are decoded here, once, into the engine's own types.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use super::auth::{sign_request, Credentials};
use super::{OrderGateway, PriceFeed};
use crate::common::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter, RateLimiterConfig};
use crate::config::BridgeConfig;
use crate::types::{Bar, Deal, ExecutionReport, Position, QuoteTick, Side, Symbol, Timeframe};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Request timeout duration
    pub timeout: Duration,
    /// Rate limiter configuration
    pub rate_limiter: RateLimiterConfig,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.rate_limiter = self.rate_limiter.with_rate(requests_per_second);
        self
    }

    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker = self.circuit_breaker.with_failure_threshold(threshold);
        self
    }
}

/// Terminal bridge API client
///
/// Implements [`PriceFeed`] and [`OrderGateway`] over the bridge's signed
/// REST endpoints.
#[derive(Clone)]
pub struct BridgeClient {
    base_url: String,
    credentials: Credentials,
    http_client: Client,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    rate_limiter: RateLimiter,
    max_retries: u32,
}

impl BridgeClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self::with_config(base_url, api_key, api_secret, ClientConfig::default())
    }

    pub fn with_config(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Credentials::new(api_key, api_secret),
            http_client,
            circuit_breaker: Arc::new(Mutex::new(CircuitBreaker::new(config.circuit_breaker))),
            rate_limiter: RateLimiter::new(config.rate_limiter),
            max_retries: config.max_retries,
        }
    }

    /// Build a client from the `[bridge]` configuration section.
    /// Credentials must be present (file or environment).
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("Bridge API key not configured (set BRIDGE_API_KEY)")?;
        let api_secret = config
            .api_secret
            .clone()
            .context("Bridge API secret not configured (set BRIDGE_API_SECRET)")?;

        let client_config = ClientConfig::default()
            .with_max_retries(config.max_retries)
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_rate_limit(config.rate_limit as usize);

        Ok(Self::with_config(
            config.base_url.clone(),
            api_key,
            api_secret,
            client_config,
        ))
    }

    /// Execute a request with retry logic, rate limiting, and circuit breaker
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(anyhow!("Circuit breaker is open, rejecting request"));
            }
        }

        self.rate_limiter.acquire().await;

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s...
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tracing::debug!("Retrying after {}ms", delay.as_millis());
                sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    let mut cb = self.circuit_breaker.lock().await;
                    cb.record_success();
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(
                        "Bridge request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        {
            let mut cb = self.circuit_breaker.lock().await;
            cb.record_failure();
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }

    /// Make a signed POST request
    async fn signed_post<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let json_body = serde_json::to_string(body)?;
        let signature = sign_request(&json_body, self.credentials.api_secret());

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-AUTH-APIKEY", self.credentials.api_key())
            .header("X-AUTH-SIGNATURE", signature)
            .body(json_body)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;

        if !status.is_success() {
            return Err(anyhow!("Bridge error ({}): {}", status, text));
        }

        serde_json::from_str(&text).context("Failed to parse response")
    }

    // ==================== UTILITY METHODS ====================

    /// Check if the bridge is reachable and connected to the terminal
    pub async fn health_check(&self) -> Result<bool> {
        match self
            .signed_post::<_, PingResponse>("/v1/ping", &serde_json::json!({}))
            .await
        {
            Ok(pong) => Ok(pong.connected),
            Err(_) => Ok(false),
        }
    }

    /// Get the current circuit breaker state
    pub async fn circuit_breaker_state(&self) -> CircuitState {
        let cb = self.circuit_breaker.lock().await;
        cb.state()
    }

    /// Get available rate limit permits
    pub fn available_rate_limit(&self) -> usize {
        self.rate_limiter.available_permits()
    }
}

#[async_trait]
impl PriceFeed for BridgeClient {
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let request = BarsRangeRequest {
            symbol: symbol.to_string(),
            timeframe: timeframe.as_str(),
            start: start.timestamp(),
            end: end.timestamp(),
        };
        self.execute_with_retry(|| {
            let req = request.clone();
            let this = self.clone();

            async move {
                let response: BarsResponse = this.signed_post("/v1/bars/range", &req).await?;
                bars_from_raw(response.bars)
            }
        })
        .await
    }

    async fn get_bars_from(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        count: u32,
    ) -> Result<Vec<Bar>> {
        let request = BarsFromRequest {
            symbol: symbol.to_string(),
            timeframe: timeframe.as_str(),
            from: from.timestamp(),
            count,
        };
        self.execute_with_retry(|| {
            let req = request.clone();
            let this = self.clone();

            async move {
                let response: BarsResponse = this.signed_post("/v1/bars/from", &req).await?;
                bars_from_raw(response.bars)
            }
        })
        .await
    }

    async fn get_tick(&self, symbol: &Symbol) -> Result<QuoteTick> {
        let request = SymbolRequest {
            symbol: symbol.to_string(),
        };
        self.execute_with_retry(|| {
            let req = request.clone();
            let this = self.clone();

            async move {
                let response: TickResponse = this.signed_post("/v1/tick", &req).await?;
                let raw = response
                    .tick
                    .ok_or_else(|| anyhow!("No tick available for {}", req.symbol))?;
                Ok(QuoteTick {
                    time: datetime_from_epoch(raw.time)?,
                    bid: raw.bid,
                    ask: raw.ask,
                    last: raw.last,
                })
            }
        })
        .await
    }
}

#[async_trait]
impl OrderGateway for BridgeClient {
    async fn place_order(
        &self,
        symbol: &Symbol,
        side: Side,
        volume: f64,
        comment: &str,
    ) -> Result<ExecutionReport> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            volume,
            comment: comment.to_string(),
        };
        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let req = request.clone();
            let symbol = symbol.clone();
            let this = self.clone();

            async move {
                let raw: RawOrderResult = this.signed_post("/v1/orders/market", &req).await?;
                Ok(raw.into_report(&symbol, req.side, req.volume, &req.comment))
            }
        })
        .await
    }

    async fn close_positions(&self, symbol: &Symbol) -> Result<Vec<ExecutionReport>> {
        let request = SymbolRequest {
            symbol: symbol.to_string(),
        };
        let symbol = symbol.clone();
        self.execute_with_retry(|| {
            let req = request.clone();
            let symbol = symbol.clone();
            let this = self.clone();

            async move {
                let response: CloseResponse =
                    this.signed_post("/v1/positions/close", &req).await?;
                Ok(response
                    .results
                    .into_iter()
                    .map(|raw| {
                        // Close direction and size come from the terminal; the
                        // request only names the symbol.
                        let side = raw.side.unwrap_or(Side::Sell);
                        let volume = raw.volume.unwrap_or(0.0);
                        raw.into_report(&symbol, side, volume, "")
                    })
                    .collect())
            }
        })
        .await
    }

    async fn open_positions(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>> {
        let request = PositionsRequest {
            symbol: symbol.map(|s| s.to_string()),
        };
        self.execute_with_retry(|| {
            let req = request.clone();
            let this = self.clone();

            async move {
                let response: PositionsResponse = this.signed_post("/v1/positions", &req).await?;
                response
                    .positions
                    .into_iter()
                    .map(|raw| {
                        Ok(Position {
                            ticket: raw.ticket,
                            symbol: Symbol::new(raw.symbol),
                            side: raw.side,
                            volume: raw.volume,
                            price_open: raw.price_open,
                            profit: raw.profit,
                            comment: raw.comment,
                        })
                    })
                    .collect()
            }
        })
        .await
    }

    async fn deal_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>> {
        let request = DealsRequest {
            from: from.timestamp(),
            to: to.timestamp(),
        };
        self.execute_with_retry(|| {
            let req = request.clone();
            let this = self.clone();

            async move {
                let response: DealsResponse =
                    this.signed_post("/v1/history/deals", &req).await?;
                response
                    .deals
                    .into_iter()
                    .map(|raw| {
                        Ok(Deal {
                            ticket: raw.ticket,
                            time: datetime_from_epoch(raw.time)?,
                            symbol: Symbol::new(raw.symbol),
                            profit: raw.profit,
                            comment: raw.comment,
                        })
                    })
                    .collect()
            }
        })
        .await
    }
}

// ==================== WIRE TYPES ====================

#[derive(Debug, Clone, Serialize)]
struct BarsRangeRequest {
    symbol: String,
    timeframe: &'static str,
    start: i64,
    end: i64,
}

#[derive(Debug, Clone, Serialize)]
struct BarsFromRequest {
    symbol: String,
    timeframe: &'static str,
    from: i64,
    count: u32,
}

#[derive(Debug, Clone, Serialize)]
struct SymbolRequest {
    symbol: String,
}

#[derive(Debug, Clone, Serialize)]
struct PositionsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct DealsRequest {
    from: i64,
    to: i64,
}

#[derive(Debug, Clone, Serialize)]
struct OrderRequest {
    symbol: String,
    side: Side,
    volume: f64,
    comment: String,
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(default)]
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Vec<RawBar>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    tick_volume: f64,
}

#[derive(Debug, Deserialize)]
struct TickResponse {
    tick: Option<RawTick>,
}

#[derive(Debug, Deserialize)]
struct RawTick {
    time: i64,
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
    #[serde(default)]
    last: f64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    ticket: i64,
    symbol: String,
    side: Side,
    volume: f64,
    price_open: f64,
    #[serde(default)]
    profit: f64,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
struct DealsResponse {
    #[serde(default)]
    deals: Vec<RawDeal>,
}

#[derive(Debug, Deserialize)]
struct RawDeal {
    ticket: i64,
    time: i64,
    symbol: String,
    #[serde(default)]
    profit: f64,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
struct CloseResponse {
    #[serde(default)]
    results: Vec<RawOrderResult>,
}

/// Order payload as the terminal shapes it; fields vary by request kind
#[derive(Debug, Clone, Deserialize)]
struct RawOrderResult {
    #[serde(default)]
    retcode: Option<i64>,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    deal: Option<i64>,
    #[serde(default)]
    position: Option<i64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    side: Option<Side>,
    #[serde(default)]
    volume: Option<f64>,
}

impl RawOrderResult {
    /// Flatten the terminal payload into a uniform report. Fields the payload
    /// does not carry fall back to what was requested; the request comment
    /// (the bot tag) wins over the terminal's response comment.
    fn into_report(
        self,
        symbol: &Symbol,
        side: Side,
        volume: f64,
        comment: &str,
    ) -> ExecutionReport {
        let comment = if comment.is_empty() {
            self.comment.unwrap_or_default()
        } else {
            comment.to_string()
        };
        ExecutionReport {
            symbol: self
                .symbol
                .map(Symbol::new)
                .unwrap_or_else(|| symbol.clone()),
            side: self.side.unwrap_or(side),
            volume: self.volume.unwrap_or(volume),
            price: self.price,
            comment,
            retcode: self.retcode,
            order_id: self.order,
            deal_id: self.deal,
            position_id: self.position,
        }
    }
}

fn datetime_from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).with_context(|| format!("Timestamp out of range: {secs}"))
}

fn bars_from_raw(raw: Vec<RawBar>) -> Result<Vec<Bar>> {
    raw.into_iter()
        .map(|bar| {
            Ok(Bar::new_unchecked(
                datetime_from_epoch(bar.time)?,
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.tick_volume,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RETCODE_DONE;

    #[test]
    fn client_config_builder_sets_fields() {
        let config = ClientConfig::default()
            .with_max_retries(5)
            .with_timeout(Duration::from_secs(60))
            .with_rate_limit(20)
            .with_circuit_breaker_threshold(10);

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.rate_limiter.max_requests_per_second, 20);
        assert_eq!(config.circuit_breaker.failure_threshold, 10);
    }

    #[test]
    fn from_config_requires_credentials() {
        let config = BridgeConfig::default();
        assert!(BridgeClient::from_config(&config).is_err());

        let config = BridgeConfig {
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            ..BridgeConfig::default()
        };
        let client = BridgeClient::from_config(&config).unwrap();
        assert_eq!(client.max_retries, 3);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BridgeClient::new("http://bridge:8787/", "k", "s");
        assert_eq!(client.base_url, "http://bridge:8787");
    }

    #[test]
    fn raw_order_result_falls_back_to_request_fields() {
        let raw: RawOrderResult =
            serde_json::from_str(r#"{"retcode": 10009, "order": 7, "deal": 8}"#).unwrap();
        let report = raw.into_report(&Symbol::new("XAUUSD"), Side::Buy, 0.5, "Astra-140325-BUY");

        assert!(report.ok());
        assert_eq!(report.symbol.as_str(), "XAUUSD");
        assert_eq!(report.side, Side::Buy);
        assert_eq!(report.volume, 0.5);
        assert_eq!(report.comment, "Astra-140325-BUY");
        assert_eq!(report.order_id, Some(7));
        assert_eq!(report.deal_id, Some(8));
    }

    #[test]
    fn raw_order_result_prefers_terminal_fill_details() {
        let raw: RawOrderResult = serde_json::from_str(
            r#"{"retcode": 10009, "symbol": "XAGUSD", "side": "sell",
                "volume": 1.0, "price": 31.05, "comment": "closed by bridge"}"#,
        )
        .unwrap();
        let report = raw.clone().into_report(&Symbol::new("XAUUSD"), Side::Buy, 0.5, "");

        assert_eq!(report.symbol.as_str(), "XAGUSD");
        assert_eq!(report.side, Side::Sell);
        assert_eq!(report.volume, 1.0);
        assert_eq!(report.price, Some(31.05));
        // No request comment, so the terminal comment survives.
        assert_eq!(report.comment, "closed by bridge");
        assert_eq!(report.retcode, Some(RETCODE_DONE));
    }

    #[test]
    fn raw_bars_decode_into_engine_bars() {
        let raw = vec![RawBar {
            time: 1_741_935_600,
            open: 2000.0,
            high: 2001.5,
            low: 1999.5,
            close: 2001.0,
            tick_volume: 321.0,
        }];
        let bars = bars_from_raw(raw).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time.timestamp(), 1_741_935_600);
        assert_eq!(bars[0].close, 2001.0);
    }

    #[test]
    fn out_of_range_epoch_is_an_error() {
        assert!(datetime_from_epoch(i64::MAX).is_err());
    }
}
