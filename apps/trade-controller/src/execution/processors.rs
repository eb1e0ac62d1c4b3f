//! Per-type work item processors.
//!
//! DECISION_EVALUATION and POSITION_CLOSE stay in the queue taxonomy (types
//! and backoff schedules exist) but have no processor here; they belong to
//! strategy collaborators outside the execution core.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::broker::{BrokerClient, OrderListStatus};
use crate::models::{FillRecord, WorkItem};
use crate::queue::{
    ProcessorError, ProcessorOutcome, TradeStore, WorkItemPatch, WorkProcessor, WorkQueue,
};
use rust_decimal::Decimal;
use crate::safety::{KillSwitch, engage_kill_switch};
use crate::universe::AssetUniverse;

use super::engine::ExecutionEngine;
use super::state::ExecutionPhase;
use super::{OrderDraft, order_record_from_broker};

/// Open orders fetched per sync pass.
const SYNC_OPEN_LIMIT: usize = 100;
/// Closed orders fetched per sync pass.
const SYNC_CLOSED_LIMIT: usize = 50;

// ============================================================================
// ORDER_SUBMIT
// ============================================================================

/// Runs the execution engine for ORDER_SUBMIT items.
pub struct OrderSubmitProcessor {
    engine: Arc<ExecutionEngine>,
    universe: Arc<AssetUniverse>,
    kill_switch: Arc<KillSwitch>,
}

impl OrderSubmitProcessor {
    /// Create the processor.
    #[must_use]
    pub fn new(
        engine: Arc<ExecutionEngine>,
        universe: Arc<AssetUniverse>,
        kill_switch: Arc<KillSwitch>,
    ) -> Self {
        Self {
            engine,
            universe,
            kill_switch,
        }
    }
}

#[async_trait]
impl WorkProcessor for OrderSubmitProcessor {
    async fn process(&self, item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError> {
        if self.kill_switch.is_active() {
            return Err(ProcessorError::Permanent(
                "kill switch active; submission refused".to_string(),
            ));
        }

        let draft: OrderDraft = serde_json::from_value(item.payload.clone())
            .map_err(|e| ProcessorError::Validation(format!("bad ORDER_SUBMIT payload: {e}")))?;

        // Buys outside the tradable universe fail permanently before the
        // engine spends submit attempts on them.
        if draft.side == crate::models::OrderSide::Buy
            && self.universe.is_loaded()
            && !self.universe.is_tradable(&draft.symbol)
        {
            return Err(ProcessorError::Permanent(format!(
                "{} is not in the tradable universe",
                draft.symbol
            )));
        }

        let client_order_id = item
            .idempotency_key
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let report = self
            .engine
            .execute(draft, client_order_id, Some(item.id.clone()))
            .await?;

        if report.failed() {
            let classified = report.error.clone().unwrap_or_else(|| {
                crate::error::ClassifiedError::validation("submission failed")
            });
            return Err(ProcessorError::Classified(classified));
        }

        let summary = match report.phase {
            ExecutionPhase::Filled => format!(
                "filled {} @ {}",
                report
                    .actual
                    .as_ref()
                    .map(|a| a.fill_qty)
                    .unwrap_or_default(),
                report
                    .actual
                    .as_ref()
                    .and_then(|a| a.fill_price)
                    .unwrap_or_default()
            ),
            ExecutionPhase::Canceled => "canceled at broker".to_string(),
            _ => "submitted; monitoring budget elapsed".to_string(),
        };

        Ok(ProcessorOutcome {
            result: Some(summary),
            broker_order_id: report.broker_order_id,
        })
    }
}

// ============================================================================
// ORDER_CANCEL
// ============================================================================

#[derive(Debug, Deserialize)]
struct CancelPayload {
    #[serde(alias = "orderId")]
    order_id: String,
}

/// Cancels a broker order.
pub struct OrderCancelProcessor {
    broker: Arc<dyn BrokerClient>,
}

impl OrderCancelProcessor {
    /// Create the processor.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl WorkProcessor for OrderCancelProcessor {
    async fn process(&self, item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError> {
        let payload: CancelPayload = serde_json::from_value(item.payload.clone())
            .map_err(|e| ProcessorError::Validation(format!("bad ORDER_CANCEL payload: {e}")))?;
        self.broker.cancel_order(&payload.order_id).await?;
        tracing::info!(broker_order_id = %payload.order_id, "Order canceled");
        Ok(ProcessorOutcome::message(format!(
            "canceled {}",
            payload.order_id
        )))
    }
}

// ============================================================================
// ORDER_SYNC
// ============================================================================

/// Syncs the broker order book into the local mirror.
///
/// The broker is authoritative: every fetched order rewrites its local row,
/// missing fills are backfilled, and orders are linked back to their
/// originating work items through `client_order_id = idempotency_key`.
pub struct OrderSyncProcessor {
    broker: Arc<dyn BrokerClient>,
    queue: WorkQueue,
}

impl OrderSyncProcessor {
    /// Create the processor.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>, queue: WorkQueue) -> Self {
        Self { broker, queue }
    }

    fn store(&self) -> &Arc<dyn TradeStore> {
        self.queue.store()
    }
}

#[async_trait]
impl WorkProcessor for OrderSyncProcessor {
    async fn process(&self, _item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError> {
        let mut orders = self
            .broker
            .get_orders(OrderListStatus::Open, SYNC_OPEN_LIMIT)
            .await?;
        orders.extend(
            self.broker
                .get_orders(OrderListStatus::Closed, SYNC_CLOSED_LIMIT)
                .await?,
        );

        let mut synced = 0usize;
        let mut fills_created = 0usize;

        for order in &orders {
            // Link back to the originating work item, when one exists.
            let work_item = self
                .store()
                .get_work_item_by_idempotency_key(&order.client_order_id)
                .await?;
            if let Some(work_item) = &work_item
                && work_item.broker_order_id.is_none()
            {
                self.store()
                    .update_work_item(
                        &work_item.id,
                        WorkItemPatch {
                            broker_order_id: Some(Some(order.id.clone())),
                            ..WorkItemPatch::default()
                        },
                    )
                    .await?;
            }

            self.store()
                .upsert_order(order_record_from_broker(
                    order,
                    work_item.map(|w| w.id),
                    None,
                ))
                .await?;
            synced += 1;

            if order.filled_at.is_some()
                && order.filled_qty > Decimal::ZERO
                && self
                    .store()
                    .get_fills_by_broker_order_id(&order.id)
                    .await?
                    .is_empty()
            {
                let mut fill = FillRecord::new(
                    order.id.clone(),
                    order.symbol.clone(),
                    order.side,
                    order.filled_qty,
                    order.filled_avg_price.unwrap_or(Decimal::ZERO),
                    order.filled_at.unwrap_or(order.updated_at),
                );
                fill.order_id = Some(order.client_order_id.clone());
                fill.raw_json = order.raw.to_string();
                self.store().create_fill(fill).await?;
                fills_created += 1;
            }
        }

        tracing::info!(synced, fills_created, "Order book sync complete");
        Ok(ProcessorOutcome::message(format!(
            "synced {synced} orders, created {fills_created} fills"
        )))
    }
}

// ============================================================================
// KILL_SWITCH
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct KillSwitchPayload {
    #[serde(default, alias = "closePositions")]
    close_positions: bool,
}

/// Cancels everything and optionally flattens positions.
pub struct KillSwitchProcessor {
    broker: Arc<dyn BrokerClient>,
    kill_switch: Arc<KillSwitch>,
}

impl KillSwitchProcessor {
    /// Create the processor.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>, kill_switch: Arc<KillSwitch>) -> Self {
        Self {
            broker,
            kill_switch,
        }
    }
}

#[async_trait]
impl WorkProcessor for KillSwitchProcessor {
    async fn process(&self, item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError> {
        let payload: KillSwitchPayload = if item.payload.is_null() {
            KillSwitchPayload::default()
        } else {
            serde_json::from_value(item.payload.clone()).unwrap_or_default()
        };

        let report =
            engage_kill_switch(self.broker.as_ref(), &self.kill_switch, payload.close_positions)
                .await?;

        Ok(ProcessorOutcome::message(format!(
            "canceled all orders; closed {} positions ({} failures)",
            report.positions_closed,
            report.position_errors.len()
        )))
    }
}

// ============================================================================
// ASSET_UNIVERSE_SYNC
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct UniverseSyncPayload {
    #[serde(default, alias = "assetClass")]
    asset_class: Option<String>,
}

/// Refreshes the tradable-universe cache.
pub struct AssetUniverseSyncProcessor {
    broker: Arc<dyn BrokerClient>,
    universe: Arc<AssetUniverse>,
}

impl AssetUniverseSyncProcessor {
    /// Create the processor.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>, universe: Arc<AssetUniverse>) -> Self {
        Self { broker, universe }
    }
}

#[async_trait]
impl WorkProcessor for AssetUniverseSyncProcessor {
    async fn process(&self, item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError> {
        let payload: UniverseSyncPayload = if item.payload.is_null() {
            UniverseSyncPayload::default()
        } else {
            serde_json::from_value(item.payload.clone()).unwrap_or_default()
        };

        let count = self
            .universe
            .refresh(self.broker.as_ref(), payload.asset_class.as_deref())
            .await?;
        Ok(ProcessorOutcome::message(format!("loaded {count} assets")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Asset, BrokerError, ScriptedBroker};
    use crate::events::NoOpEventSink;
    use crate::execution::EngineConfig;
    use crate::models::{OrderSide, OrderStatus, WorkItemType};
    use crate::queue::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn queue() -> WorkQueue {
        WorkQueue::new(Arc::new(InMemoryStore::new()))
    }

    fn item(item_type: WorkItemType, payload: serde_json::Value) -> WorkItem {
        WorkItem::new(item_type, payload)
    }

    fn engine_for(broker: &Arc<ScriptedBroker>, queue: &WorkQueue) -> Arc<ExecutionEngine> {
        Arc::new(ExecutionEngine::new(
            Arc::clone(broker) as Arc<dyn BrokerClient>,
            Arc::clone(queue.store()),
            Arc::new(NoOpEventSink),
            Arc::new(AssetUniverse::with_assets(vec![Asset {
                symbol: "AAPL".to_string(),
                tradable: true,
                fractionable: true,
                marginable: true,
            }])),
            EngineConfig {
                monitor_interval: std::time::Duration::from_millis(10),
                monitor_budget: std::time::Duration::from_millis(200),
                ..EngineConfig::default()
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn submit_processor_refuses_when_kill_switch_active() {
        let broker = Arc::new(ScriptedBroker::new());
        let queue = queue();
        let kill_switch = Arc::new(KillSwitch::new());
        kill_switch.engage();

        let processor = OrderSubmitProcessor::new(
            engine_for(&broker, &queue),
            Arc::new(AssetUniverse::new()),
            kill_switch,
        );
        let err = processor
            .process(&item(
                WorkItemType::OrderSubmit,
                serde_json::json!({"symbol": "AAPL", "side": "buy", "type": "market", "qty": "10"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Permanent(_)));
        assert!(broker.created_params().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_processor_rejects_buy_outside_universe() {
        let broker = Arc::new(ScriptedBroker::new());
        let queue = queue();
        let universe = Arc::new(AssetUniverse::with_assets(vec![Asset {
            symbol: "MSFT".to_string(),
            tradable: true,
            fractionable: true,
            marginable: true,
        }]));

        let processor = OrderSubmitProcessor::new(
            engine_for(&broker, &queue),
            universe,
            Arc::new(KillSwitch::new()),
        );
        let err = processor
            .process(&item(
                WorkItemType::OrderSubmit,
                serde_json::json!({"symbol": "AAPL", "side": "buy", "type": "market", "qty": "10"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Permanent(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_processor_bad_payload_is_validation_error() {
        let broker = Arc::new(ScriptedBroker::new());
        let queue = queue();
        let processor = OrderSubmitProcessor::new(
            engine_for(&broker, &queue),
            Arc::new(AssetUniverse::new()),
            Arc::new(KillSwitch::new()),
        );
        let err = processor
            .process(&item(
                WorkItemType::OrderSubmit,
                serde_json::json!({"nonsense": true}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Validation(_)));
    }

    #[tokio::test]
    async fn cancel_processor_cancels_by_id() {
        let broker = Arc::new(ScriptedBroker::new());
        let processor = OrderCancelProcessor::new(Arc::clone(&broker) as Arc<dyn BrokerClient>);
        let outcome = processor
            .process(&item(
                WorkItemType::OrderCancel,
                serde_json::json!({"orderId": "b-9"}),
            ))
            .await
            .unwrap();
        assert_eq!(broker.canceled_order_ids(), vec!["b-9".to_string()]);
        assert!(outcome.result.unwrap().contains("b-9"));
    }

    #[tokio::test]
    async fn sync_processor_upserts_backfills_and_links() {
        let broker = Arc::new(ScriptedBroker::new());
        let queue = queue();

        // The originating submit item, keyed by the client order ID.
        let origin = queue
            .enqueue(
                WorkItem::new(WorkItemType::OrderSubmit, serde_json::json!({}))
                    .with_idempotency_key("client-1"),
            )
            .await
            .unwrap();

        let mut filled = ScriptedBroker::order(
            "b-1",
            "client-1",
            "AAPL",
            OrderSide::Buy,
            OrderStatus::Filled,
            dec!(10),
            dec!(10),
            Some(dec!(150.25)),
        );
        filled.filled_at = Some(Utc::now());
        broker.set_closed_orders(vec![filled]);

        let processor = OrderSyncProcessor::new(
            Arc::clone(&broker) as Arc<dyn BrokerClient>,
            queue.clone(),
        );
        let outcome = processor
            .process(&item(WorkItemType::OrderSync, serde_json::json!({})))
            .await
            .unwrap();
        assert!(outcome.result.unwrap().contains("1 fills"));

        // Mirror rewritten, fill created once, work item linked.
        let record = queue
            .store()
            .get_order_by_broker_order_id("b-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.work_item_id.as_deref(), Some(origin.id.as_str()));

        let linked = queue.store().get_work_item(&origin.id).await.unwrap().unwrap();
        assert_eq!(linked.broker_order_id.as_deref(), Some("b-1"));

        // Second sync is idempotent for fills.
        processor
            .process(&item(WorkItemType::OrderSync, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(
            queue
                .store()
                .get_fills_by_broker_order_id("b-1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn kill_switch_processor_engages_flag() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_positions(vec![crate::broker::Position {
            symbol: "AAPL".to_string(),
            qty: dec!(10),
            avg_entry_price: dec!(100),
        }]);
        let kill_switch = Arc::new(KillSwitch::new());

        let processor = KillSwitchProcessor::new(
            Arc::clone(&broker) as Arc<dyn BrokerClient>,
            Arc::clone(&kill_switch),
        );
        let outcome = processor
            .process(&item(
                WorkItemType::KillSwitch,
                serde_json::json!({"closePositions": true}),
            ))
            .await
            .unwrap();

        assert!(kill_switch.is_active());
        assert_eq!(broker.cancel_all_calls(), 1);
        assert_eq!(broker.closed_position_symbols(), vec!["AAPL".to_string()]);
        assert!(outcome.result.unwrap().contains("closed 1 positions"));
    }

    #[tokio::test]
    async fn universe_sync_processor_fails_on_broker_error() {
        // ScriptedBroker's get_assets never fails, so exercise the error path
        // through a broker whose asset listing is scripted to fail.
        struct FailingAssets;
        #[async_trait]
        impl BrokerClient for FailingAssets {
            async fn create_order(
                &self,
                _params: &crate::broker::OrderParams,
            ) -> Result<crate::broker::BrokerOrder, BrokerError> {
                unreachable!()
            }
            async fn get_order(
                &self,
                _id: &str,
            ) -> Result<crate::broker::BrokerOrder, BrokerError> {
                unreachable!()
            }
            async fn get_orders(
                &self,
                _status: OrderListStatus,
                _limit: usize,
            ) -> Result<Vec<crate::broker::BrokerOrder>, BrokerError> {
                unreachable!()
            }
            async fn cancel_order(&self, _id: &str) -> Result<(), BrokerError> {
                unreachable!()
            }
            async fn cancel_all_orders(&self) -> Result<(), BrokerError> {
                unreachable!()
            }
            async fn get_positions(&self) -> Result<Vec<crate::broker::Position>, BrokerError> {
                unreachable!()
            }
            async fn close_position(&self, _symbol: &str) -> Result<(), BrokerError> {
                unreachable!()
            }
            async fn get_snapshots(
                &self,
                _symbols: &[String],
            ) -> Result<std::collections::HashMap<String, crate::broker::Snapshot>, BrokerError>
            {
                unreachable!()
            }
            async fn get_market_status(
                &self,
            ) -> Result<crate::broker::MarketStatus, BrokerError> {
                unreachable!()
            }
            async fn get_assets(
                &self,
                _asset_class: Option<&str>,
            ) -> Result<Vec<Asset>, BrokerError> {
                Err(BrokerError::Network("asset feed down".into()))
            }
        }

        let universe = Arc::new(AssetUniverse::new());
        let processor = AssetUniverseSyncProcessor::new(Arc::new(FailingAssets), universe);
        let err = processor
            .process(&item(WorkItemType::AssetUniverseSync, serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Broker(_)));
    }

    #[tokio::test]
    async fn universe_sync_processor_refreshes_cache() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_assets(vec![Asset {
            symbol: "AAPL".to_string(),
            tradable: true,
            fractionable: true,
            marginable: true,
        }]);
        let universe = Arc::new(AssetUniverse::new());

        let processor = AssetUniverseSyncProcessor::new(
            Arc::clone(&broker) as Arc<dyn BrokerClient>,
            Arc::clone(&universe),
        );
        let outcome = processor
            .process(&item(
                WorkItemType::AssetUniverseSync,
                serde_json::json!({"assetClass": "us_equity"}),
            ))
            .await
            .unwrap();
        assert!(outcome.result.unwrap().contains("1 assets"));
        assert!(universe.is_tradable("AAPL"));
    }
}
