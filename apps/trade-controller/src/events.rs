//! Trade event port.
//!
//! Order lifecycle events fan out through an injectable sink so webhook and
//! bus delivery stay outside the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, OrderStatus};

/// Kind of trade event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeEventKind {
    /// `trade.order.submitted`
    OrderSubmitted,
    /// `trade.order.filled`
    OrderFilled,
    /// `trade.order.rejected`
    OrderRejected,
}

impl TradeEventKind {
    /// Dotted event name on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderSubmitted => "trade.order.submitted",
            Self::OrderFilled => "trade.order.filled",
            Self::OrderRejected => "trade.order.rejected",
        }
    }
}

impl std::fmt::Display for TradeEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Event kind.
    pub kind: TradeEventKind,
    /// Broker order ID, when assigned.
    pub order_id: Option<String>,
    /// Client order ID.
    pub client_order_id: String,
    /// Symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity (requested or filled, depending on the event).
    pub qty: Option<Decimal>,
    /// Price, when known.
    pub price: Option<Decimal>,
    /// Order status, or the classified failure message on rejection.
    pub status: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    /// Build an event from order identity plus a status label.
    #[must_use]
    pub fn new(
        kind: TradeEventKind,
        order_id: Option<String>,
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        qty: Option<Decimal>,
        price: Option<Decimal>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            order_id,
            client_order_id: client_order_id.into(),
            symbol: symbol.into(),
            side,
            qty,
            price,
            status: status.into(),
            timestamp: Utc::now(),
        }
    }

    /// Convenience for a status-typed event.
    #[must_use]
    pub fn with_order_status(mut self, status: OrderStatus) -> Self {
        self.status = status.as_str().to_string();
        self
    }
}

/// Injectable sink for trade events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event. Delivery failures must not propagate into the
    /// execution path; sinks log and drop.
    async fn publish(&self, event: TradeEvent);
}

/// Sink that discards events.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn publish(&self, _event: TradeEvent) {}
}

/// Sink that logs events through tracing.
#[derive(Debug, Clone, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: TradeEvent) {
        tracing::info!(
            event = %event.kind,
            order_id = ?event.order_id,
            client_order_id = %event.client_order_id,
            symbol = %event.symbol,
            side = %event.side,
            qty = ?event.qty,
            price = ?event.price,
            status = %event.status,
            "Trade event"
        );
    }
}

/// Sink that records events for assertions (tests).
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<TradeEvent>>,
}

impl RecordingEventSink {
    /// Create an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn events(&self) -> Vec<TradeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Kinds published so far, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<TradeEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: TradeEvent) {
        #[allow(clippy::unwrap_used)]
        self.events.lock().unwrap().push(event);
    }
}
