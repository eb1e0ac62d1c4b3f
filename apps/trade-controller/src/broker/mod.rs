//! Broker client port and shared broker-facing types.
//!
//! The core consumes a typed broker client; the wire protocol itself lives in
//! the adapters (`alpaca` for the real REST API, `scripted` for tests).

mod alpaca;
mod scripted;

pub use alpaca::{AlpacaClient, AlpacaConfig, AlpacaEnvironment};
pub use scripted::ScriptedBroker;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderClass, OrderSide, OrderStatus, OrderType, TimeInForce};

/// Errors from broker operations.
///
/// Variants carry enough structure for the classifier to choose a retry and
/// recovery policy without string matching where possible.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Transport-level failure (connection refused, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// The call exceeded its deadline; the request may or may not have
    /// reached the broker.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed time before giving up.
        elapsed_ms: u64,
    },

    /// Rate limited by the broker.
    #[error("rate limited by broker")]
    RateLimited {
        /// Suggested wait from the Retry-After header, when present.
        retry_after_secs: Option<u64>,
    },

    /// Not enough buying power for the request.
    #[error("insufficient buying power: {0}")]
    InsufficientFunds(String),

    /// Symbol is unknown or not tradable at the broker.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Market is closed for the requested session.
    #[error("market closed: {0}")]
    MarketClosed(String),

    /// Order rejected by the broker.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Order or position not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// API error that did not match a more specific category.
    #[error("API error ({code}): {message}")]
    Api {
        /// Transport status code, when available.
        status: Option<u16>,
        /// Error code from the broker.
        code: String,
        /// Error message from the broker.
        message: String,
    },
}

/// Parameters for creating a broker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderParams {
    /// Symbol to trade.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Quantity in shares (exclusive with `notional`).
    pub qty: Option<Decimal>,
    /// Notional in dollars (exclusive with `qty`).
    pub notional: Option<Decimal>,
    /// Limit price (limit / stop-limit orders).
    pub limit_price: Option<Decimal>,
    /// Stop price (stop / stop-limit orders).
    pub stop_price: Option<Decimal>,
    /// Trail percent (trailing-stop orders, exclusive with `trail_price`).
    pub trail_percent: Option<Decimal>,
    /// Trail price (trailing-stop orders, exclusive with `trail_percent`).
    pub trail_price: Option<Decimal>,
    /// Extended-hours eligibility.
    pub extended_hours: bool,
    /// Leg structure.
    pub order_class: OrderClass,
    /// Take-profit limit price for bracket orders.
    pub take_profit_limit_price: Option<Decimal>,
    /// Stop-loss stop price for bracket orders.
    pub stop_loss_stop_price: Option<Decimal>,
    /// Client order ID echoed back by the broker; doubles as the
    /// idempotency key.
    pub client_order_id: String,
}

impl OrderParams {
    /// Create market-order parameters with day time-in-force.
    #[must_use]
    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: Decimal,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            qty: Some(qty),
            notional: None,
            limit_price: None,
            stop_price: None,
            trail_percent: None,
            trail_price: None,
            extended_hours: false,
            order_class: OrderClass::Simple,
            take_profit_limit_price: None,
            stop_loss_stop_price: None,
            client_order_id: client_order_id.into(),
        }
    }
}

/// A broker-side order as returned by the broker API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    /// Broker-assigned order ID.
    pub id: String,
    /// Client order ID echoed back.
    pub client_order_id: String,
    /// Symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Requested quantity.
    pub qty: Option<Decimal>,
    /// Requested notional.
    pub notional: Option<Decimal>,
    /// Cumulative filled quantity.
    pub filled_qty: Decimal,
    /// Average fill price.
    pub filled_avg_price: Option<Decimal>,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop price.
    pub stop_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Fill timestamp.
    pub filled_at: Option<DateTime<Utc>>,
    /// Full broker payload for forensics.
    pub raw: serde_json::Value,
}

/// Which orders to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderListStatus {
    /// Active orders only.
    Open,
    /// Terminal orders only.
    Closed,
    /// Both.
    All,
}

impl OrderListStatus {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// An open position at the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Symbol.
    pub symbol: String,
    /// Signed position quantity.
    pub qty: Decimal,
    /// Average entry price.
    pub avg_entry_price: Decimal,
}

/// Latest trade/quote snapshot for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Last trade price.
    pub latest_trade_price: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
}

/// Trading session reported by the broker clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSession {
    /// Pre-market extended hours.
    PreMarket,
    /// Regular trading hours.
    Regular,
    /// After-hours extended session.
    AfterHours,
    /// Market closed.
    Closed,
}

/// Market open/session status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketStatus {
    /// Whether the regular session is open.
    pub is_open: bool,
    /// Current session.
    pub session: MarketSession,
    /// Whether an extended-hours session is active.
    pub is_extended_hours: bool,
}

impl MarketStatus {
    /// True when orders can trade now, in either the regular or an
    /// extended-hours session.
    #[must_use]
    pub const fn accepts_orders_now(&self) -> bool {
        self.is_open || self.is_extended_hours
    }
}

/// A tradable asset in the broker universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Symbol.
    pub symbol: String,
    /// Whether the asset is currently tradable.
    pub tradable: bool,
    /// Whether fractional/notional orders are supported.
    pub fractionable: bool,
    /// Whether the asset is marginable.
    pub marginable: bool,
}

/// Typed broker client consumed by the execution core.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Create an order.
    async fn create_order(&self, params: &OrderParams) -> Result<BrokerOrder, BrokerError>;

    /// Fetch a single order by broker ID.
    async fn get_order(&self, broker_order_id: &str) -> Result<BrokerOrder, BrokerError>;

    /// List orders, newest first, bounded by `limit`.
    async fn get_orders(
        &self,
        status: OrderListStatus,
        limit: usize,
    ) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// Cancel an order by broker ID.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Cancel every open order.
    async fn cancel_all_orders(&self) -> Result<(), BrokerError>;

    /// List open positions.
    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Close a position with a market order.
    async fn close_position(&self, symbol: &str) -> Result<(), BrokerError>;

    /// Latest trade/quote snapshots for a set of symbols.
    async fn get_snapshots(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Snapshot>, BrokerError>;

    /// Market clock and session status.
    async fn get_market_status(&self) -> Result<MarketStatus, BrokerError>;

    /// List assets, optionally filtered by asset class.
    async fn get_assets(&self, asset_class: Option<&str>) -> Result<Vec<Asset>, BrokerError>;
}
