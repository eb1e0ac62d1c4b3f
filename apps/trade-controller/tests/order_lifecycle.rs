//! End-to-end order lifecycle scenarios against the in-memory store and the
//! scripted broker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use trade_controller::broker::{Asset, BrokerClient, BrokerError, ScriptedBroker};
use trade_controller::events::{EventSink, RecordingEventSink, TradeEventKind};
use trade_controller::execution::{
    AssetUniverseSyncProcessor, EngineConfig, ExecutionEngine, ExecutionPhase,
    KillSwitchProcessor, OrderCancelProcessor, OrderDraft, OrderSubmitProcessor,
    OrderSyncProcessor,
};
use trade_controller::models::{
    OrderSide, OrderStatus, WorkItem, WorkItemStatus, WorkItemType,
};
use trade_controller::queue::{
    InMemoryStore, QueueWorker, TradeStore, WorkItemPatch, WorkQueue, WorkerConfig,
};
use trade_controller::safety::KillSwitch;
use trade_controller::universe::AssetUniverse;

struct Stack {
    broker: Arc<ScriptedBroker>,
    queue: WorkQueue,
    events: Arc<RecordingEventSink>,
    worker: QueueWorker,
    kill_switch: Arc<KillSwitch>,
}

fn stack_with(engine_config: EngineConfig) -> Stack {
    let broker = Arc::new(ScriptedBroker::new());
    let store: Arc<dyn TradeStore> = Arc::new(InMemoryStore::new());
    let queue = WorkQueue::new(Arc::clone(&store));
    let events = Arc::new(RecordingEventSink::new());
    let universe = Arc::new(AssetUniverse::with_assets(vec![Asset {
        symbol: "AAPL".to_string(),
        tradable: true,
        fractionable: true,
        marginable: true,
    }]));
    let kill_switch = Arc::new(KillSwitch::new());

    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&broker) as Arc<dyn BrokerClient>,
        Arc::clone(&store),
        Arc::clone(&events) as Arc<dyn EventSink>,
        Arc::clone(&universe),
        engine_config,
    ));

    let worker = QueueWorker::new(queue.clone(), WorkerConfig::default())
        .with_processor(
            WorkItemType::OrderSubmit,
            Arc::new(OrderSubmitProcessor::new(
                engine,
                Arc::clone(&universe),
                Arc::clone(&kill_switch),
            )),
        )
        .with_processor(
            WorkItemType::OrderCancel,
            Arc::new(OrderCancelProcessor::new(
                Arc::clone(&broker) as Arc<dyn BrokerClient>
            )),
        )
        .with_processor(
            WorkItemType::OrderSync,
            Arc::new(OrderSyncProcessor::new(
                Arc::clone(&broker) as Arc<dyn BrokerClient>,
                queue.clone(),
            )),
        )
        .with_processor(
            WorkItemType::KillSwitch,
            Arc::new(KillSwitchProcessor::new(
                Arc::clone(&broker) as Arc<dyn BrokerClient>,
                Arc::clone(&kill_switch),
            )),
        )
        .with_processor(
            WorkItemType::AssetUniverseSync,
            Arc::new(AssetUniverseSyncProcessor::new(
                Arc::clone(&broker) as Arc<dyn BrokerClient>,
                Arc::clone(&universe),
            )),
        );

    Stack {
        broker,
        queue,
        events,
        worker,
        kill_switch,
    }
}

fn stack() -> Stack {
    stack_with(EngineConfig {
        monitor_interval: Duration::from_millis(10),
        monitor_budget: Duration::from_millis(500),
        ..EngineConfig::default()
    })
}

fn submit_payload(qty: &str) -> serde_json::Value {
    serde_json::json!({
        "symbol": "AAPL",
        "side": "buy",
        "type": "market",
        "time_in_force": "day",
        "qty": qty
    })
}

async fn make_due(queue: &WorkQueue, id: &str) {
    queue
        .store()
        .update_work_item(
            id,
            WorkItemPatch {
                next_run_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                ..WorkItemPatch::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn happy_path_market_buy() {
    let stack = stack();
    stack.broker.set_last_trade("AAPL", dec!(150.00));
    stack.broker.push_create(Ok(ScriptedBroker::order(
        "b-1",
        "key-1",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Accepted,
        dec!(10),
        dec!(0),
        None,
    )));
    stack.broker.push_get_order(Ok(ScriptedBroker::order(
        "b-1",
        "key-1",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Filled,
        dec!(10),
        dec!(10),
        Some(dec!(150.25)),
    )));

    let item = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("key-1"),
        )
        .await
        .unwrap();

    assert!(stack.worker.run_once().await.unwrap());

    // Work item succeeded and links the broker order.
    let done = stack
        .queue
        .store()
        .get_work_item(&item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, WorkItemStatus::Succeeded);
    assert_eq!(done.broker_order_id.as_deref(), Some("b-1"));

    // One order record with the full fill.
    let order = stack
        .queue
        .store()
        .get_order_by_broker_order_id("b-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.filled_qty, dec!(10));
    assert_eq!(order.filled_avg_price, Some(dec!(150.25)));
    assert_eq!(order.client_order_id, "key-1");

    // Exactly one fill at the fill price.
    let fills = stack
        .queue
        .store()
        .get_fills_by_broker_order_id("b-1")
        .await
        .unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, dec!(150.25));
    assert_eq!(fills[0].qty, dec!(10));

    // submitted then filled events.
    assert_eq!(
        stack.events.kinds(),
        vec![TradeEventKind::OrderSubmitted, TradeEventKind::OrderFilled]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_network_failure_then_success() {
    let stack = stack();
    stack.broker.set_last_trade("AAPL", dec!(150.00));
    stack
        .broker
        .push_create(Err(BrokerError::Network("ECONNREFUSED".into())));
    stack.broker.push_create(Ok(ScriptedBroker::order(
        "b-2",
        "key-2",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Filled,
        dec!(10),
        dec!(10),
        Some(dec!(150.10)),
    )));

    let item = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("key-2"),
        )
        .await
        .unwrap();

    assert!(stack.worker.run_once().await.unwrap());

    let done = stack
        .queue
        .store()
        .get_work_item(&item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, WorkItemStatus::Succeeded);

    // Two submit attempts, one broker order, no duplicate fills.
    assert_eq!(stack.broker.created_params().len(), 2);
    let fills = stack
        .queue
        .store()
        .get_fills_by_broker_order_id("b-2")
        .await
        .unwrap();
    assert_eq!(fills.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn submit_timeout_recovers_by_adoption() {
    let stack = stack();
    stack.broker.set_last_trade("AAPL", dec!(150.00));
    for _ in 0..3 {
        stack
            .broker
            .push_create(Err(BrokerError::Timeout { elapsed_ms: 30_000 }));
    }
    // The order made it through; only the responses were lost.
    stack.broker.set_open_orders(vec![ScriptedBroker::order(
        "b-3",
        "key-3",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Accepted,
        dec!(10),
        dec!(0),
        None,
    )]);
    stack.broker.push_get_order(Ok(ScriptedBroker::order(
        "b-3",
        "key-3",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Filled,
        dec!(10),
        dec!(10),
        Some(dec!(150.30)),
    )));

    let item = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("key-3"),
        )
        .await
        .unwrap();

    assert!(stack.worker.run_once().await.unwrap());

    let done = stack
        .queue
        .store()
        .get_work_item(&item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, WorkItemStatus::Succeeded);
    assert_eq!(done.broker_order_id.as_deref(), Some("b-3"));

    // The adopted order matches the broker's record; no second submission
    // beyond the timed-out attempts.
    let order = stack
        .queue
        .store()
        .get_order_by_broker_order_id("b-3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.client_order_id, "key-3");
    assert_eq!(stack.broker.created_params().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn insufficient_funds_halves_and_retries() {
    let stack = stack();
    stack.broker.set_last_trade("AAPL", dec!(150.00));
    stack.broker.push_create(Err(BrokerError::InsufficientFunds(
        "insufficient buying power".into(),
    )));
    stack.broker.push_create(Ok(ScriptedBroker::order(
        "b-4",
        "key-4",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Filled,
        dec!(5),
        dec!(5),
        Some(dec!(150.00)),
    )));

    let item = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("key-4"),
        )
        .await
        .unwrap();

    assert!(stack.worker.run_once().await.unwrap());

    let done = stack
        .queue
        .store()
        .get_work_item(&item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, WorkItemStatus::Succeeded);

    // Broker saw 10 then 5; the mirror records the halved request.
    let params = stack.broker.created_params();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].qty, Some(dec!(10)));
    assert_eq!(params[1].qty, Some(dec!(5)));

    let order = stack
        .queue
        .store()
        .get_order_by_broker_order_id("b-4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.qty, Some(dec!(5)));
}

#[tokio::test(start_paused = true)]
async fn bracket_gtc_is_corrected_to_day() {
    let stack = stack();
    let broker = Arc::clone(&stack.broker);
    broker.set_last_trade("AAPL", dec!(150.00));
    broker.push_create(Ok(ScriptedBroker::order(
        "b-5",
        "key-5",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Filled,
        dec!(10),
        dec!(10),
        Some(dec!(150.00)),
    )));

    // Drive the engine directly so the correction warning is observable.
    let store: Arc<dyn TradeStore> = Arc::new(InMemoryStore::new());
    let engine = ExecutionEngine::new(
        Arc::clone(&broker) as Arc<dyn BrokerClient>,
        store,
        Arc::new(RecordingEventSink::new()) as Arc<dyn EventSink>,
        Arc::new(AssetUniverse::with_assets(vec![Asset {
            symbol: "AAPL".to_string(),
            tradable: true,
            fractionable: true,
            marginable: true,
        }])),
        EngineConfig {
            monitor_interval: Duration::from_millis(10),
            monitor_budget: Duration::from_millis(200),
            ..EngineConfig::default()
        },
    );

    let payload = serde_json::json!({
        "symbol": "AAPL",
        "side": "buy",
        "type": "limit",
        "time_in_force": "gtc",
        "qty": "10",
        "limit_price": "150.00",
        "order_class": "bracket",
        "take_profit_limit_price": "160.00",
        "stop_loss_stop_price": "140.00"
    });
    let draft: OrderDraft = serde_json::from_value(payload).unwrap();

    let report = engine
        .execute(draft, "key-5".to_string(), None)
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Filled);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("corrected from gtc to day"))
    );
    // The broker never saw gtc.
    let params = broker.created_params();
    assert_eq!(params.len(), 1);
    assert_eq!(
        params[0].time_in_force,
        trade_controller::models::TimeInForce::Day
    );
}

#[tokio::test(start_paused = true)]
async fn dead_letter_then_operator_retry() {
    // One engine attempt per queue attempt keeps the scripted sequence
    // aligned with work item attempts.
    let stack = stack_with(EngineConfig {
        max_retries: 1,
        monitor_interval: Duration::from_millis(10),
        monitor_budget: Duration::from_millis(200),
        ..EngineConfig::default()
    });
    stack.broker.set_last_trade("AAPL", dec!(150.00));
    for _ in 0..3 {
        stack.broker.push_create(Err(BrokerError::RateLimited {
            retry_after_secs: None,
        }));
    }

    let item = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("key-6"),
        )
        .await
        .unwrap();

    // Three rate-limited queue attempts exhaust the budget.
    for attempt in 1..=3 {
        assert!(stack.worker.run_once().await.unwrap(), "attempt {attempt}");
        if attempt < 3 {
            make_due(&stack.queue, &item.id).await;
        }
    }

    let dead = stack
        .queue
        .store()
        .get_work_item(&item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dead.status, WorkItemStatus::DeadLetter);
    assert_eq!(dead.attempts, 3);
    assert_eq!(
        stack
            .queue
            .store()
            .get_work_item_runs(&item.id)
            .await
            .unwrap()
            .len(),
        3
    );

    // Invisible to the worker until the operator retries it.
    assert!(!stack.worker.run_once().await.unwrap());

    // Operator replay: attempts reset, due immediately, then succeeds.
    stack.broker.push_create(Ok(ScriptedBroker::order(
        "b-6",
        "key-6",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Filled,
        dec!(10),
        dec!(10),
        Some(dec!(150.40)),
    )));
    let reset = stack.queue.retry_dead_letter(&item.id).await.unwrap();
    assert_eq!(reset.status, WorkItemStatus::Pending);
    assert_eq!(reset.attempts, 0);

    assert!(stack.worker.run_once().await.unwrap());
    let done = stack
        .queue
        .store()
        .get_work_item(&item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, WorkItemStatus::Succeeded);
    assert_eq!(
        stack
            .queue
            .store()
            .get_work_item_runs(&item.id)
            .await
            .unwrap()
            .len(),
        4
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_enqueue_collapses_to_one_item() {
    let stack = stack();
    let first = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("same-key"),
        )
        .await
        .unwrap();
    let second = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("same-key"),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(
        stack
            .queue
            .store()
            .get_work_item_count(WorkItemStatus::Pending, Some(WorkItemType::OrderSubmit))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn kill_switch_halts_subsequent_submissions() {
    let stack = stack();
    stack.broker.set_positions(vec![trade_controller::broker::Position {
        symbol: "AAPL".to_string(),
        qty: dec!(10),
        avg_entry_price: dec!(140),
    }]);

    stack
        .queue
        .enqueue(WorkItem::new(
            WorkItemType::KillSwitch,
            serde_json::json!({"closePositions": true}),
        ))
        .await
        .unwrap();
    assert!(stack.worker.run_once().await.unwrap());

    assert!(stack.kill_switch.is_active());
    assert_eq!(stack.broker.cancel_all_calls(), 1);
    assert_eq!(
        stack.broker.closed_position_symbols(),
        vec!["AAPL".to_string()]
    );

    // Submissions now dead-letter immediately.
    let submit = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("post-kill"),
        )
        .await
        .unwrap();
    assert!(stack.worker.run_once().await.unwrap());
    let dead = stack
        .queue
        .store()
        .get_work_item(&submit.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dead.status, WorkItemStatus::DeadLetter);
    assert!(stack.broker.created_params().is_empty());
}

#[tokio::test(start_paused = true)]
async fn order_sync_backfills_fills_once() {
    let stack = stack();
    let mut filled = ScriptedBroker::order(
        "b-7",
        "key-7",
        "AAPL",
        OrderSide::Buy,
        OrderStatus::Filled,
        dec!(10),
        dec!(10),
        Some(dec!(151.00)),
    );
    filled.filled_at = Some(Utc::now());
    stack.broker.set_closed_orders(vec![filled]);

    for _ in 0..2 {
        let item = stack
            .queue
            .enqueue(WorkItem::new(
                WorkItemType::OrderSync,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert!(stack.worker.run_once().await.unwrap());
        let done = stack
            .queue
            .store()
            .get_work_item(&item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, WorkItemStatus::Succeeded);
    }

    // Sync ran twice; still exactly one fill per broker fill event.
    assert_eq!(
        stack
            .queue
            .store()
            .get_fills_by_broker_order_id("b-7")
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn permanent_rejection_dead_letters_with_message() {
    let stack = stack();
    stack.broker.set_last_trade("AAPL", dec!(150.00));
    stack.broker.push_create(Err(BrokerError::OrderRejected(
        "asset is halted".into(),
    )));

    let item = stack
        .queue
        .enqueue(
            WorkItem::new(WorkItemType::OrderSubmit, submit_payload("10"))
                .with_idempotency_key("key-8"),
        )
        .await
        .unwrap();
    assert!(stack.worker.run_once().await.unwrap());

    let dead = stack
        .queue
        .store()
        .get_work_item(&item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dead.status, WorkItemStatus::DeadLetter);
    assert!(dead.last_error.as_deref().unwrap().contains("asset is halted"));

    // The rejection event carries the classified message verbatim.
    let events = stack.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, TradeEventKind::OrderRejected);
    assert!(events[0].status.contains("asset is halted"));
}
