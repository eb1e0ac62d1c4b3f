//! Alpaca REST adapter for the broker client port.
//!
//! Single-attempt HTTP calls: retry policy belongs to the execution engine
//! and the work queue, not the transport. Every request first passes the
//! outbound rate limiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, OrderType, TimeInForce, parse_order_status};
use crate::resilience::RateLimiter;

use super::{
    Asset, BrokerClient, BrokerError, BrokerOrder, MarketSession, MarketStatus, OrderListStatus,
    OrderParams, Position, Snapshot,
};

/// Alpaca trading environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlpacaEnvironment {
    /// Paper trading.
    Paper,
    /// Live trading with real money.
    Live,
}

impl AlpacaEnvironment {
    /// Whether this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Configuration for the Alpaca adapter.
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    /// API key ID.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Trading environment.
    pub environment: AlpacaEnvironment,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Trading API base URL override (tests).
    pub trading_base_url: Option<String>,
    /// Data API base URL override (tests).
    pub data_base_url: Option<String>,
}

impl AlpacaConfig {
    /// Create a config for the given environment.
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        environment: AlpacaEnvironment,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            environment,
            timeout: Duration::from_secs(30),
            trading_base_url: None,
            data_base_url: None,
        }
    }

    /// Override both base URLs (for tests against a local mock server).
    #[must_use]
    pub fn with_base_urls(mut self, trading: impl Into<String>, data: impl Into<String>) -> Self {
        self.trading_base_url = Some(trading.into());
        self.data_base_url = Some(data.into());
        self
    }

    fn resolved_trading_url(&self) -> String {
        self.trading_base_url.clone().unwrap_or_else(|| {
            match self.environment {
                AlpacaEnvironment::Paper => "https://paper-api.alpaca.markets".to_string(),
                AlpacaEnvironment::Live => "https://api.alpaca.markets".to_string(),
            }
        })
    }

    fn resolved_data_url(&self) -> String {
        self.data_base_url
            .clone()
            .unwrap_or_else(|| "https://data.alpaca.markets".to_string())
    }
}

/// Alpaca Markets broker client.
#[derive(Debug, Clone)]
pub struct AlpacaClient {
    client: Client,
    api_key: String,
    api_secret: String,
    trading_base_url: String,
    data_base_url: String,
    environment: AlpacaEnvironment,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl AlpacaClient {
    /// Create a new Alpaca client.
    pub fn new(config: &AlpacaConfig) -> Result<Self, BrokerError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(BrokerError::AuthenticationFailed);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            trading_base_url: config.resolved_trading_url(),
            data_base_url: config.resolved_data_url(),
            environment: config.environment,
            rate_limiter: None,
        })
    }

    /// Attach an outbound rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Whether this client trades with real money.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.environment.is_live()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        base: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, BrokerError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let url = format!("{base}{path}");
        let mut request = self
            .client
            .request(method, &url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BrokerError::Timeout { elapsed_ms: 0 }
            } else {
                BrokerError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| BrokerError::Network(e.to_string()))?;
            if text.is_empty() {
                return serde_json::from_str("null")
                    .map_err(|e| BrokerError::Network(e.to_string()));
            }
            return serde_json::from_str(&text).map_err(|e| {
                BrokerError::Network(format!("response decode failed: {e}"))
            });
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => (
                err.code.unwrap_or_else(|| status.as_u16().to_string()),
                err.message,
            ),
            Err(_) => (status.as_u16().to_string(), body),
        };

        Err(map_api_error(status, retry_after, &code, message))
    }
}

/// Map an Alpaca error response to a `BrokerError` category.
fn map_api_error(
    status: StatusCode,
    retry_after: Option<u64>,
    code: &str,
    message: String,
) -> BrokerError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient") {
        return BrokerError::InsufficientFunds(message);
    }
    if lower.contains("market") && (lower.contains("closed") || lower.contains("not open")) {
        return BrokerError::MarketClosed(message);
    }
    match status.as_u16() {
        401 => BrokerError::AuthenticationFailed,
        404 => BrokerError::NotFound(message),
        403 | 422 => BrokerError::OrderRejected(message),
        429 => BrokerError::RateLimited {
            retry_after_secs: retry_after,
        },
        408 => BrokerError::Timeout { elapsed_ms: 0 },
        500..=599 => BrokerError::Network(format!("server error {status}: {message}")),
        s => BrokerError::Api {
            status: Some(s),
            code: code.to_string(),
            message,
        },
    }
}

#[async_trait]
impl BrokerClient for AlpacaClient {
    async fn create_order(&self, params: &OrderParams) -> Result<BrokerOrder, BrokerError> {
        if self.is_live() {
            tracing::warn!(
                client_order_id = %params.client_order_id,
                symbol = %params.symbol,
                "Submitting LIVE order - this will execute real trades"
            );
        }

        let request = ApiOrderRequest::from_params(params);
        let body = serde_json::to_value(&request)
            .map_err(|e| BrokerError::Network(format!("request encode failed: {e}")))?;
        let response: ApiOrder = self
            .send(reqwest::Method::POST, &self.trading_base_url, "/v2/orders", Some(body))
            .await?;
        Ok(response.into_broker_order())
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<BrokerOrder, BrokerError> {
        let response: ApiOrder = self
            .send(
                reqwest::Method::GET,
                &self.trading_base_url,
                &format!("/v2/orders/{broker_order_id}"),
                None,
            )
            .await?;
        Ok(response.into_broker_order())
    }

    async fn get_orders(
        &self,
        status: OrderListStatus,
        limit: usize,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let responses: Vec<ApiOrder> = self
            .send(
                reqwest::Method::GET,
                &self.trading_base_url,
                &format!("/v2/orders?status={}&limit={limit}", status.as_str()),
                None,
            )
            .await?;
        Ok(responses
            .into_iter()
            .map(ApiOrder::into_broker_order)
            .collect())
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let _: serde_json::Value = self
            .send(
                reqwest::Method::DELETE,
                &self.trading_base_url,
                &format!("/v2/orders/{broker_order_id}"),
                None,
            )
            .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
        let _: serde_json::Value = self
            .send(reqwest::Method::DELETE, &self.trading_base_url, "/v2/orders", None)
            .await?;
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let responses: Vec<ApiPosition> = self
            .send(reqwest::Method::GET, &self.trading_base_url, "/v2/positions", None)
            .await?;
        Ok(responses.into_iter().map(ApiPosition::into_position).collect())
    }

    async fn close_position(&self, symbol: &str) -> Result<(), BrokerError> {
        let _: serde_json::Value = self
            .send(
                reqwest::Method::DELETE,
                &self.trading_base_url,
                &format!("/v2/positions/{symbol}"),
                None,
            )
            .await?;
        Ok(())
    }

    async fn get_snapshots(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Snapshot>, BrokerError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = symbols.join(",");
        let response: HashMap<String, ApiSnapshot> = self
            .send(
                reqwest::Method::GET,
                &self.data_base_url,
                &format!("/v2/stocks/snapshots?symbols={joined}"),
                None,
            )
            .await?;
        Ok(response
            .into_iter()
            .map(|(symbol, snap)| (symbol, snap.into_snapshot()))
            .collect())
    }

    async fn get_market_status(&self) -> Result<MarketStatus, BrokerError> {
        let clock: ApiClock = self
            .send(reqwest::Method::GET, &self.trading_base_url, "/v2/clock", None)
            .await?;
        Ok(MarketStatus {
            is_open: clock.is_open,
            session: if clock.is_open {
                MarketSession::Regular
            } else {
                MarketSession::Closed
            },
            is_extended_hours: false,
        })
    }

    async fn get_assets(&self, asset_class: Option<&str>) -> Result<Vec<Asset>, BrokerError> {
        let path = asset_class.map_or_else(
            || "/v2/assets?status=active".to_string(),
            |class| format!("/v2/assets?status=active&asset_class={class}"),
        );
        let responses: Vec<ApiAsset> = self
            .send(reqwest::Method::GET, &self.trading_base_url, &path, None)
            .await?;
        Ok(responses.into_iter().map(ApiAsset::into_asset).collect())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct ApiOrderRequest {
    symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notional: Option<String>,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trail_percent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trail_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extended_hours: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    take_profit: Option<ApiTakeProfit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<ApiStopLoss>,
    client_order_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct ApiTakeProfit {
    limit_price: String,
}

#[derive(Debug, Clone, Serialize)]
struct ApiStopLoss {
    stop_price: String,
}

impl ApiOrderRequest {
    fn from_params(params: &OrderParams) -> Self {
        let order_class = match params.order_class {
            crate::models::OrderClass::Simple => None,
            crate::models::OrderClass::Bracket => Some("bracket".to_string()),
            crate::models::OrderClass::Oco => Some("oco".to_string()),
            crate::models::OrderClass::Oto => Some("oto".to_string()),
        };
        Self {
            symbol: params.symbol.clone(),
            qty: params.qty.map(|q| q.to_string()),
            notional: params.notional.map(|n| n.to_string()),
            side: params.side.as_str().to_string(),
            order_type: params.order_type.as_str().to_string(),
            time_in_force: params.time_in_force.as_str().to_string(),
            limit_price: params.limit_price.map(|p| p.to_string()),
            stop_price: params.stop_price.map(|p| p.to_string()),
            trail_percent: params.trail_percent.map(|p| p.to_string()),
            trail_price: params.trail_price.map(|p| p.to_string()),
            extended_hours: params.extended_hours.then_some(true),
            order_class,
            take_profit: params
                .take_profit_limit_price
                .map(|p| ApiTakeProfit { limit_price: p.to_string() }),
            stop_loss: params
                .stop_loss_stop_price
                .map(|p| ApiStopLoss { stop_price: p.to_string() }),
            client_order_id: params.client_order_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiOrder {
    id: String,
    client_order_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(default)]
    qty: Option<String>,
    #[serde(default)]
    notional: Option<String>,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    limit_price: Option<String>,
    #[serde(default)]
    stop_price: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    filled_at: Option<String>,
}

impl ApiOrder {
    fn into_broker_order(self) -> BrokerOrder {
        let raw = serde_json::to_value(RawOrder::from(&self)).unwrap_or_default();
        BrokerOrder {
            id: self.id,
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            side: if self.side == "sell" {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            order_type: match self.order_type.as_str() {
                "limit" => OrderType::Limit,
                "stop" => OrderType::Stop,
                "stop_limit" => OrderType::StopLimit,
                "trailing_stop" => OrderType::TrailingStop,
                _ => OrderType::Market,
            },
            time_in_force: match self.time_in_force.as_str() {
                "gtc" => TimeInForce::Gtc,
                "ioc" => TimeInForce::Ioc,
                "fok" => TimeInForce::Fok,
                "opg" => TimeInForce::Opg,
                "cls" => TimeInForce::Cls,
                _ => TimeInForce::Day,
            },
            qty: parse_decimal(self.qty.as_deref()),
            notional: parse_decimal(self.notional.as_deref()),
            filled_qty: parse_decimal(self.filled_qty.as_deref()).unwrap_or(Decimal::ZERO),
            filled_avg_price: parse_decimal(self.filled_avg_price.as_deref()),
            limit_price: parse_decimal(self.limit_price.as_deref()),
            stop_price: parse_decimal(self.stop_price.as_deref()),
            status: parse_order_status(&self.status),
            created_at: parse_wire_ts(&self.created_at),
            updated_at: parse_wire_ts(&self.updated_at),
            filled_at: self.filled_at.as_deref().map(parse_wire_ts),
            raw,
        }
    }
}

/// Raw order echo kept for the forensics column.
#[derive(Debug, Serialize)]
struct RawOrder {
    id: String,
    client_order_id: String,
    symbol: String,
    status: String,
    filled_qty: Option<String>,
    filled_avg_price: Option<String>,
}

impl From<&ApiOrder> for RawOrder {
    fn from(order: &ApiOrder) -> Self {
        Self {
            id: order.id.clone(),
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            status: order.status.clone(),
            filled_qty: order.filled_qty.clone(),
            filled_avg_price: order.filled_avg_price.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiPosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
}

impl ApiPosition {
    fn into_position(self) -> Position {
        Position {
            symbol: self.symbol,
            qty: self.qty.parse().unwrap_or(Decimal::ZERO),
            avg_entry_price: self.avg_entry_price.parse().unwrap_or(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiAsset {
    symbol: String,
    #[serde(default)]
    tradable: bool,
    #[serde(default)]
    fractionable: bool,
    #[serde(default)]
    marginable: bool,
}

impl ApiAsset {
    fn into_asset(self) -> Asset {
        Asset {
            symbol: self.symbol,
            tradable: self.tradable,
            fractionable: self.fractionable,
            marginable: self.marginable,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiClock {
    is_open: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiSnapshot {
    #[serde(rename = "latestTrade", default)]
    latest_trade: Option<ApiTrade>,
    #[serde(rename = "latestQuote", default)]
    latest_quote: Option<ApiQuote>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiTrade {
    p: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiQuote {
    bp: Decimal,
    ap: Decimal,
}

impl ApiSnapshot {
    fn into_snapshot(self) -> Snapshot {
        Snapshot {
            latest_trade_price: self.latest_trade.map(|t| t.p),
            bid: self.latest_quote.as_ref().map(|q| q.bp),
            ask: self.latest_quote.as_ref().map(|q| q.ap),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

fn parse_decimal(s: Option<&str>) -> Option<Decimal> {
    s.and_then(|v| v.parse().ok())
}

fn parse_wire_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map_or_else(|_| DateTime::<Utc>::UNIX_EPOCH, |dt| dt.with_timezone(&Utc))
}
