//! Order execution: validation, prediction, the submission state machine,
//! work item processors, and broker reconciliation.

mod engine;
mod prediction;
mod processors;
mod reconciler;
mod state;
mod validator;

pub use engine::{EngineConfig, ExecutionEngine, ExecutionReport};
pub use prediction::{ActualOutcome, ExpectedOutcome, analyze_outcome, predict_outcome};
pub use processors::{
    AssetUniverseSyncProcessor, KillSwitchProcessor, OrderCancelProcessor, OrderSubmitProcessor,
    OrderSyncProcessor,
};
pub use reconciler::{
    Reconciler, ReconcilerConfig, UnrealOrder, UnrealReason, UnrealReport, is_unreal,
};
pub use state::{ActiveExecutions, ExecutionPhase, ExecutionState};
pub use validator::{ValidationContext, ValidationReport, normalize_draft, validate_draft};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::broker::{BrokerOrder, OrderParams};
use crate::models::{OrderClass, OrderRecord, OrderSide, OrderType, TimeInForce};

/// An order request as carried by an ORDER_SUBMIT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    /// Symbol to trade.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Time in force.
    #[serde(default = "default_tif")]
    pub time_in_force: TimeInForce,
    /// Quantity in shares.
    #[serde(default)]
    pub qty: Option<Decimal>,
    /// Notional in dollars.
    #[serde(default)]
    pub notional: Option<Decimal>,
    /// Limit price.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Stop price.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Trail percent for trailing stops.
    #[serde(default)]
    pub trail_percent: Option<Decimal>,
    /// Trail price for trailing stops.
    #[serde(default)]
    pub trail_price: Option<Decimal>,
    /// Extended-hours eligibility.
    #[serde(default)]
    pub extended_hours: bool,
    /// Leg structure.
    #[serde(default)]
    pub order_class: OrderClass,
    /// Take-profit limit price for brackets.
    #[serde(default)]
    pub take_profit_limit_price: Option<Decimal>,
    /// Stop-loss stop price for brackets.
    #[serde(default)]
    pub stop_loss_stop_price: Option<Decimal>,
    /// Trace ID propagated from the enqueuer.
    #[serde(default, alias = "traceId")]
    pub trace_id: Option<String>,
}

fn default_tif() -> TimeInForce {
    TimeInForce::Day
}

impl OrderDraft {
    /// A market-order draft (tests and simple callers).
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: OrderSide, qty: Decimal) -> Self {
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
            trace_id: None,
        }
    }

    /// Convert to broker parameters under a client order ID.
    #[must_use]
    pub fn to_params(&self, client_order_id: impl Into<String>) -> OrderParams {
        OrderParams {
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: self.order_type,
            time_in_force: self.time_in_force,
            qty: self.qty,
            notional: self.notional,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            trail_percent: self.trail_percent,
            trail_price: self.trail_price,
            extended_hours: self.extended_hours,
            order_class: self.order_class,
            take_profit_limit_price: self.take_profit_limit_price,
            stop_loss_stop_price: self.stop_loss_stop_price,
            client_order_id: client_order_id.into(),
        }
    }
}

/// Convert a broker order into the local mirror row.
#[must_use]
pub fn order_record_from_broker(
    order: &BrokerOrder,
    work_item_id: Option<String>,
    trace_id: Option<String>,
) -> OrderRecord {
    OrderRecord {
        broker_order_id: order.id.clone(),
        client_order_id: order.client_order_id.clone(),
        symbol: order.symbol.clone(),
        side: order.side,
        order_type: order.order_type,
        time_in_force: order.time_in_force,
        qty: order.qty,
        notional: order.notional,
        limit_price: order.limit_price,
        stop_price: order.stop_price,
        status: order.status,
        submitted_at: order.created_at,
        updated_at: Utc::now(),
        filled_at: order.filled_at,
        filled_qty: order.filled_qty,
        filled_avg_price: order.filled_avg_price,
        work_item_id,
        trace_id,
        raw_json: order.raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn draft_decodes_from_submit_payload() {
        let payload = serde_json::json!({
            "symbol": "AAPL",
            "side": "buy",
            "type": "limit",
            "time_in_force": "gtc",
            "qty": "10",
            "limit_price": "150.00",
            "traceId": "t-1"
        });
        let draft: OrderDraft = serde_json::from_value(payload).unwrap();
        assert_eq!(draft.order_type, OrderType::Limit);
        assert_eq!(draft.time_in_force, TimeInForce::Gtc);
        assert_eq!(draft.qty, Some(dec!(10)));
        assert_eq!(draft.limit_price, Some(dec!(150.00)));
        assert_eq!(draft.trace_id.as_deref(), Some("t-1"));
        assert_eq!(draft.order_class, OrderClass::Simple);
    }

    #[test]
    fn draft_defaults_tif_to_day() {
        let payload = serde_json::json!({
            "symbol": "AAPL",
            "side": "sell",
            "type": "market",
            "qty": "5"
        });
        let draft: OrderDraft = serde_json::from_value(payload).unwrap();
        assert_eq!(draft.time_in_force, TimeInForce::Day);
        assert!(!draft.extended_hours);
    }

    #[test]
    fn to_params_carries_client_order_id() {
        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let params = draft.to_params("abc123");
        assert_eq!(params.client_order_id, "abc123");
        assert_eq!(params.symbol, "AAPL");
    }
}
