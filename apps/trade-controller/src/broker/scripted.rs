//! Scripted broker for tests.
//!
//! Each operation pops from a queue of scripted responses, so a test can make
//! `create_order` fail twice with network errors and then succeed, or have
//! `get_order` report `accepted` once and `filled` afterwards. The last
//! scripted `get_order` response is sticky: monitoring loops keep seeing it
//! once the queue drains.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::models::{OrderSide, OrderStatus, OrderType, TimeInForce};

use super::{
    Asset, BrokerClient, BrokerError, BrokerOrder, MarketSession, MarketStatus, OrderListStatus,
    OrderParams, Position, Snapshot,
};

#[derive(Default)]
struct ScriptState {
    create_responses: VecDeque<Result<BrokerOrder, BrokerError>>,
    get_order_responses: VecDeque<Result<BrokerOrder, BrokerError>>,
    last_get_order: Option<Result<BrokerOrder, BrokerError>>,
    open_orders: Vec<BrokerOrder>,
    closed_orders: Vec<BrokerOrder>,
    positions: Vec<Position>,
    close_position_failures: HashMap<String, BrokerError>,
    snapshots: HashMap<String, Snapshot>,
    market_status: Option<MarketStatus>,
    assets: Vec<Asset>,
    created_params: Vec<OrderParams>,
    canceled_order_ids: Vec<String>,
    closed_position_symbols: Vec<String>,
    cancel_all_calls: u32,
}

/// Broker test double driven by scripted responses.
#[derive(Default)]
pub struct ScriptedBroker {
    state: Mutex<ScriptState>,
}

impl ScriptedBroker {
    /// Create an empty scripted broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a broker order for scripting.
    #[must_use]
    pub fn order(
        id: &str,
        client_order_id: &str,
        symbol: &str,
        side: OrderSide,
        status: OrderStatus,
        qty: Decimal,
        filled_qty: Decimal,
        filled_avg_price: Option<Decimal>,
    ) -> BrokerOrder {
        let now = Utc::now();
        BrokerOrder {
            id: id.to_string(),
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            qty: Some(qty),
            notional: None,
            filled_qty,
            filled_avg_price,
            limit_price: None,
            stop_price: None,
            status,
            created_at: now,
            updated_at: now,
            filled_at: if status == OrderStatus::Filled {
                Some(now)
            } else {
                None
            },
            raw: serde_json::json!({"id": id, "status": status.as_str()}),
        }
    }

    /// Queue a `create_order` response.
    pub fn push_create(&self, response: Result<BrokerOrder, BrokerError>) {
        self.lock().create_responses.push_back(response);
    }

    /// Queue a `get_order` response.
    pub fn push_get_order(&self, response: Result<BrokerOrder, BrokerError>) {
        self.lock().get_order_responses.push_back(response);
    }

    /// Set the open-order book returned by `get_orders(Open, ..)`.
    pub fn set_open_orders(&self, orders: Vec<BrokerOrder>) {
        self.lock().open_orders = orders;
    }

    /// Set the closed-order book returned by `get_orders(Closed, ..)`.
    pub fn set_closed_orders(&self, orders: Vec<BrokerOrder>) {
        self.lock().closed_orders = orders;
    }

    /// Set open positions.
    pub fn set_positions(&self, positions: Vec<Position>) {
        self.lock().positions = positions;
    }

    /// Make `close_position` fail for one symbol.
    pub fn fail_close_position(&self, symbol: &str, error: BrokerError) {
        self.lock()
            .close_position_failures
            .insert(symbol.to_string(), error);
    }

    /// Set the snapshot for a symbol.
    pub fn set_snapshot(&self, symbol: &str, snapshot: Snapshot) {
        self.lock().snapshots.insert(symbol.to_string(), snapshot);
    }

    /// Convenience: set only the last trade price for a symbol.
    pub fn set_last_trade(&self, symbol: &str, price: Decimal) {
        self.set_snapshot(
            symbol,
            Snapshot {
                latest_trade_price: Some(price),
                bid: None,
                ask: None,
            },
        );
    }

    /// Set the market status.
    pub fn set_market_status(&self, status: MarketStatus) {
        self.lock().market_status = Some(status);
    }

    /// Set the asset universe.
    pub fn set_assets(&self, assets: Vec<Asset>) {
        self.lock().assets = assets;
    }

    /// Parameters of every `create_order` call, in order.
    #[must_use]
    pub fn created_params(&self) -> Vec<OrderParams> {
        self.lock().created_params.clone()
    }

    /// Order IDs passed to `cancel_order`.
    #[must_use]
    pub fn canceled_order_ids(&self) -> Vec<String> {
        self.lock().canceled_order_ids.clone()
    }

    /// Symbols passed to `close_position`.
    #[must_use]
    pub fn closed_position_symbols(&self) -> Vec<String> {
        self.lock().closed_position_symbols.clone()
    }

    /// Number of `cancel_all_orders` calls.
    #[must_use]
    pub fn cancel_all_calls(&self) -> u32 {
        self.lock().cancel_all_calls
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    async fn create_order(&self, params: &OrderParams) -> Result<BrokerOrder, BrokerError> {
        let mut state = self.lock();
        state.created_params.push(params.clone());
        state.create_responses.pop_front().unwrap_or_else(|| {
            Err(BrokerError::Network(
                "no scripted create_order response".to_string(),
            ))
        })
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<BrokerOrder, BrokerError> {
        let mut state = self.lock();
        if let Some(response) = state.get_order_responses.pop_front() {
            state.last_get_order = Some(response.clone());
            return response;
        }
        state
            .last_get_order
            .clone()
            .unwrap_or_else(|| Err(BrokerError::NotFound(broker_order_id.to_string())))
    }

    async fn get_orders(
        &self,
        status: OrderListStatus,
        limit: usize,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let state = self.lock();
        let mut orders = match status {
            OrderListStatus::Open => state.open_orders.clone(),
            OrderListStatus::Closed => state.closed_orders.clone(),
            OrderListStatus::All => {
                let mut all = state.open_orders.clone();
                all.extend(state.closed_orders.clone());
                all
            }
        };
        orders.truncate(limit);
        Ok(orders)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.lock()
            .canceled_order_ids
            .push(broker_order_id.to_string());
        Ok(())
    }

    async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
        self.lock().cancel_all_calls += 1;
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        Ok(self.lock().positions.clone())
    }

    async fn close_position(&self, symbol: &str) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if let Some(err) = state.close_position_failures.get(symbol) {
            return Err(err.clone());
        }
        state.closed_position_symbols.push(symbol.to_string());
        Ok(())
    }

    async fn get_snapshots(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Snapshot>, BrokerError> {
        let state = self.lock();
        Ok(symbols
            .iter()
            .filter_map(|s| state.snapshots.get(s).map(|snap| (s.clone(), snap.clone())))
            .collect())
    }

    async fn get_market_status(&self) -> Result<MarketStatus, BrokerError> {
        Ok(self.lock().market_status.unwrap_or(MarketStatus {
            is_open: true,
            session: MarketSession::Regular,
            is_extended_hours: false,
        }))
    }

    async fn get_assets(&self, _asset_class: Option<&str>) -> Result<Vec<Asset>, BrokerError> {
        Ok(self.lock().assets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn scripted_create_responses_pop_in_order() {
        let broker = ScriptedBroker::new();
        broker.push_create(Err(BrokerError::Network("ECONNREFUSED".into())));
        broker.push_create(Ok(ScriptedBroker::order(
            "b-1",
            "c-1",
            "AAPL",
            OrderSide::Buy,
            OrderStatus::Accepted,
            dec!(10),
            dec!(0),
            None,
        )));

        let params = OrderParams::market("AAPL", OrderSide::Buy, dec!(10), "c-1");
        assert!(broker.create_order(&params).await.is_err());
        let order = broker.create_order(&params).await.unwrap();
        assert_eq!(order.id, "b-1");
        assert_eq!(broker.created_params().len(), 2);
    }

    #[tokio::test]
    async fn get_order_last_response_is_sticky() {
        let broker = ScriptedBroker::new();
        broker.push_get_order(Ok(ScriptedBroker::order(
            "b-1",
            "c-1",
            "AAPL",
            OrderSide::Buy,
            OrderStatus::Filled,
            dec!(10),
            dec!(10),
            Some(dec!(150.25)),
        )));

        let first = broker.get_order("b-1").await.unwrap();
        let second = broker.get_order("b-1").await.unwrap();
        assert_eq!(first.status, OrderStatus::Filled);
        assert_eq!(second.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn unscripted_get_order_is_not_found() {
        let broker = ScriptedBroker::new();
        assert!(matches!(
            broker.get_order("missing").await,
            Err(BrokerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_position_failure_is_per_symbol() {
        let broker = ScriptedBroker::new();
        broker.fail_close_position("TSLA", BrokerError::Network("reset".into()));

        assert!(broker.close_position("AAPL").await.is_ok());
        assert!(broker.close_position("TSLA").await.is_err());
        assert_eq!(broker.closed_position_symbols(), vec!["AAPL".to_string()]);
    }
}
