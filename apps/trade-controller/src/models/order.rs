//! Order-related types for the local broker mirror.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type (market, limit, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Market order - execute at best available price.
    Market,
    /// Limit order - execute at specified price or better.
    Limit,
    /// Stop order - becomes market order when stop price is reached.
    Stop,
    /// Stop-limit order - becomes limit order when stop price is reached.
    StopLimit,
    /// Trailing stop - stop price trails the market by a percent or amount.
    TrailingStop,
}

impl OrderType {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::TrailingStop => "trailing_stop",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time in force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Valid for current trading day only.
    Day,
    /// Good-til-canceled.
    Gtc,
    /// Immediate-or-cancel (fill immediately, cancel remainder).
    Ioc,
    /// Fill-or-kill (all or nothing, immediate execution required).
    Fok,
    /// Execute at market open only.
    Opg,
    /// Execute at market close only.
    Cls,
}

impl TimeInForce {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Gtc => "gtc",
            Self::Ioc => "ioc",
            Self::Fok => "fok",
            Self::Opg => "opg",
            Self::Cls => "cls",
        }
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order class (leg structure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderClass {
    /// Single-leg order.
    #[default]
    Simple,
    /// Entry with paired take-profit and stop-loss legs.
    Bracket,
    /// One-cancels-other exit pair.
    Oco,
    /// One-triggers-other pair.
    Oto,
}

/// Order status in the broker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created but not yet acknowledged.
    New,
    /// Order routed, acknowledgment pending.
    PendingNew,
    /// Order accepted by broker.
    Accepted,
    /// Order partially filled.
    PartiallyFilled,
    /// Order completely filled.
    Filled,
    /// Cancel requested, not yet confirmed.
    PendingCancel,
    /// Order canceled.
    Canceled,
    /// Order expired.
    Expired,
    /// Order replaced by another order.
    Replaced,
    /// Order rejected by broker.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Expired | Self::Replaced | Self::Rejected
        )
    }

    /// Returns true if the order is still active (can fill or be canceled).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PendingNew => "pending_new",
            Self::Accepted => "accepted",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::PendingCancel => "pending_cancel",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Replaced => "replaced",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a broker order status string to `OrderStatus`.
///
/// Unknown or transitional statuses map to `New` so they stay active until
/// the next sync resolves them.
#[must_use]
pub fn parse_order_status(status: &str) -> OrderStatus {
    match status.to_lowercase().as_str() {
        "accepted" | "accepted_for_bidding" | "pending_replace" => OrderStatus::Accepted,
        "pending_new" => OrderStatus::PendingNew,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "pending_cancel" => OrderStatus::PendingCancel,
        "canceled" | "cancelled" => OrderStatus::Canceled,
        "done_for_day" | "expired" => OrderStatus::Expired,
        "replaced" => OrderStatus::Replaced,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::New,
    }
}

/// Local mirror of a broker order.
///
/// The broker is authoritative for order identity and fill state; this record
/// exists for operator tooling and is rewritten whenever divergence is found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Broker-assigned order ID (primary key).
    pub broker_order_id: String,
    /// Our idempotency key echoed to the broker.
    pub client_order_id: String,
    /// Symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Requested quantity in shares (exclusive with `notional`).
    pub qty: Option<Decimal>,
    /// Requested notional in dollars (exclusive with `qty`).
    pub notional: Option<Decimal>,
    /// Limit price (if applicable).
    pub limit_price: Option<Decimal>,
    /// Stop price (if applicable).
    pub stop_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Fill timestamp, if filled.
    pub filled_at: Option<DateTime<Utc>>,
    /// Cumulative filled quantity.
    pub filled_qty: Decimal,
    /// Average fill price.
    pub filled_avg_price: Option<Decimal>,
    /// Originating work item, when known.
    pub work_item_id: Option<String>,
    /// Trace ID propagated from the enqueuer.
    pub trace_id: Option<String>,
    /// Full broker payload for forensics.
    pub raw_json: String,
}

/// Per-execution fill record. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRecord {
    /// Fill identifier.
    pub id: String,
    /// Broker order this fill belongs to.
    pub broker_order_id: String,
    /// Local order ID, when linked.
    pub order_id: Option<String>,
    /// Symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Filled quantity.
    pub qty: Decimal,
    /// Fill price.
    pub price: Decimal,
    /// When the fill occurred.
    pub occurred_at: DateTime<Utc>,
    /// Raw broker payload.
    pub raw_json: String,
}

impl FillRecord {
    /// Create a fill record with a fresh identifier.
    #[must_use]
    pub fn new(
        broker_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            broker_order_id: broker_order_id.into(),
            order_id: None,
            symbol: symbol.into(),
            side,
            qty,
            price,
            occurred_at,
            raw_json: String::new(),
        }
    }
}
