//! Trade Controller Binary
//!
//! Starts the order execution core: durable work queue, execution engine,
//! and reconciler against the Alpaca broker API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trade-controller
//! ```
//!
//! # Environment Variables
//!
//! - `TRADE_CONTROLLER__ENVIRONMENT`: PAPER | LIVE (default: PAPER)
//! - `ALPACA_KEY`: Broker API key (required)
//! - `ALPACA_SECRET`: Broker API secret (required)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;

use trade_controller::broker::{AlpacaClient, AlpacaConfig, AlpacaEnvironment, BrokerClient};
use trade_controller::config::ControllerConfig;
use trade_controller::events::{EventSink, LogEventSink};
use trade_controller::execution::{
    AssetUniverseSyncProcessor, ExecutionEngine, KillSwitchProcessor, OrderCancelProcessor,
    OrderSubmitProcessor, OrderSyncProcessor, Reconciler,
};
use trade_controller::models::{WorkItem, WorkItemType};
use trade_controller::observability;
use trade_controller::queue::{QueueWorker, TradeStore, TursoStore, WorkQueue};
use trade_controller::resilience::RateLimiter;
use trade_controller::safety::KillSwitch;
use trade_controller::universe::AssetUniverse;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();

    let config = ControllerConfig::load()?;
    tracing::info!(
        environment = %config.environment,
        store_path = %config.store_path,
        "Starting trade controller"
    );

    let api_key = std::env::var("ALPACA_KEY").unwrap_or_default();
    let api_secret = std::env::var("ALPACA_SECRET").unwrap_or_default();
    if api_key.is_empty() || api_secret.is_empty() {
        anyhow::bail!("ALPACA_KEY and ALPACA_SECRET environment variables are required");
    }

    let environment = if config.is_live() {
        AlpacaEnvironment::Live
    } else {
        AlpacaEnvironment::Paper
    };

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.to_rate_limit_config()));
    let broker: Arc<dyn BrokerClient> = Arc::new(
        AlpacaClient::new(&AlpacaConfig::new(api_key, api_secret, environment))?
            .with_rate_limiter(rate_limiter),
    );

    let store: Arc<dyn TradeStore> = Arc::new(TursoStore::open(&config.store_path).await?);
    let queue = WorkQueue::new(Arc::clone(&store));
    let events: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let universe = Arc::new(AssetUniverse::new());
    let kill_switch = Arc::new(KillSwitch::new());

    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&broker),
        Arc::clone(&store),
        events,
        Arc::clone(&universe),
        config.engine.to_engine_config(),
    ));

    let worker = Arc::new(
        QueueWorker::new(queue.clone(), config.worker.to_worker_config())
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
                Arc::new(OrderCancelProcessor::new(Arc::clone(&broker))),
            )
            .with_processor(
                WorkItemType::OrderSync,
                Arc::new(OrderSyncProcessor::new(Arc::clone(&broker), queue.clone())),
            )
            .with_processor(
                WorkItemType::KillSwitch,
                Arc::new(KillSwitchProcessor::new(
                    Arc::clone(&broker),
                    Arc::clone(&kill_switch),
                )),
            )
            .with_processor(
                WorkItemType::AssetUniverseSync,
                Arc::new(AssetUniverseSyncProcessor::new(
                    Arc::clone(&broker),
                    Arc::clone(&universe),
                )),
            ),
    );

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&broker),
        queue.clone(),
        config.reconciler.to_reconciler_config(),
    ));

    // Warm the universe cache before the first submissions arrive.
    queue
        .enqueue(WorkItem::new(
            WorkItemType::AssetUniverseSync,
            serde_json::json!({}),
        ))
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_task = {
        let worker = Arc::clone(&worker);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };
    let reconciler_task = {
        let reconciler = Arc::clone(&reconciler);
        let shutdown = shutdown_rx;
        tokio::spawn(async move { reconciler.run(shutdown).await })
    };

    tracing::info!("Trade controller running; press Ctrl-C to stop");
    signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    shutdown_tx.send(true)?;
    let _ = worker_task.await;
    let _ = reconciler_task.await;

    tracing::info!("Trade controller stopped");
    Ok(())
}
