//! Order execution engine: one submission through validate, predict,
//! submit-with-retry, recover, monitor, and outcome analysis.
//!
//! Effective submission is at-most-once per client order ID: the key is
//! echoed to the broker, timeouts route through CHECK_AND_SYNC instead of a
//! blind resubmit, and sell orders check the open-order book for an earlier
//! submission before creating a new one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::broker::{BrokerClient, BrokerError, BrokerOrder, OrderListStatus, OrderParams};
use crate::error::{ClassifiedError, ErrorKind, RecoveryStrategy, classify_broker_error};
use crate::events::{EventSink, TradeEvent, TradeEventKind};
use crate::models::{FillRecord, OrderSide, OrderStatus};
use crate::observability::metric;
use crate::queue::{StoreError, TradeStore};
use crate::universe::AssetUniverse;

use super::prediction::{ActualOutcome, ExpectedOutcome, analyze_outcome, predict_outcome};
use super::state::{ActiveExecutions, ExecutionPhase, ExecutionState};
use super::validator::{ValidationContext, normalize_draft, validate_draft};
use super::{OrderDraft, order_record_from_broker};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-attempt broker submit deadline.
    pub submit_timeout: Duration,
    /// Submit attempts before falling through to recovery.
    pub max_retries: u32,
    /// Poll interval while monitoring.
    pub monitor_interval: Duration,
    /// Overall monitoring wall-clock budget. Exhaustion returns the last
    /// snapshot; it never cancels the broker order.
    pub monitor_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(30),
            max_retries: 3,
            monitor_interval: Duration::from_secs(1),
            monitor_budget: Duration::from_secs(30),
        }
    }
}

/// Final report for one submission.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Client order ID for this submission.
    pub client_order_id: String,
    /// Broker order ID, when one was assigned.
    pub broker_order_id: Option<String>,
    /// Final phase: `Filled`, `Canceled`, `Failed`, or `Submitted` when the
    /// monitor budget ran out with the order still live.
    pub phase: ExecutionPhase,
    /// Last broker snapshot, when one exists.
    pub order: Option<BrokerOrder>,
    /// Outcome analysis, when the order reached the broker.
    pub actual: Option<ActualOutcome>,
    /// Validation and normalization warnings.
    pub warnings: Vec<String>,
    /// The classified failure, when `phase` is `Failed`.
    pub error: Option<ClassifiedError>,
}

impl ExecutionReport {
    /// Whether the submission failed.
    #[must_use]
    pub const fn failed(&self) -> bool {
        matches!(self.phase, ExecutionPhase::Failed)
    }
}

/// Drives submissions through the execution state machine.
pub struct ExecutionEngine {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn TradeStore>,
    events: Arc<dyn EventSink>,
    universe: Arc<AssetUniverse>,
    config: EngineConfig,
    active: ActiveExecutions,
}

impl ExecutionEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn TradeStore>,
        events: Arc<dyn EventSink>,
        universe: Arc<AssetUniverse>,
        config: EngineConfig,
    ) -> Self {
        Self {
            broker,
            store,
            events,
            universe,
            config,
            active: ActiveExecutions::new(),
        }
    }

    /// Active submissions registry (introspection).
    #[must_use]
    pub fn active(&self) -> &ActiveExecutions {
        &self.active
    }

    /// Execute one submission.
    ///
    /// `client_order_id` uniquely identifies the submission; concurrent calls
    /// with the same ID collapse at the work queue before reaching here.
    pub async fn execute(
        &self,
        mut draft: OrderDraft,
        client_order_id: String,
        work_item_id: Option<String>,
    ) -> Result<ExecutionReport, StoreError> {
        let mut state = ExecutionState::new(
            client_order_id.clone(),
            draft.symbol.clone(),
            draft.side,
            draft.order_type,
            draft.qty,
            draft.notional,
            self.config.max_retries,
        );
        state.requested_price = draft.limit_price.or(draft.stop_price);
        self.active.upsert(state.clone());

        let report = self
            .run_submission(&mut draft, &mut state, &client_order_id, work_item_id)
            .await;
        self.active.remove(&client_order_id);
        report
    }

    async fn run_submission(
        &self,
        draft: &mut OrderDraft,
        state: &mut ExecutionState,
        client_order_id: &str,
        work_item_id: Option<String>,
    ) -> Result<ExecutionReport, StoreError> {
        // Phase 1: validation.
        state.advance(ExecutionPhase::Validating);
        self.active.upsert(state.clone());

        let mut warnings = normalize_draft(draft);
        let ctx = self.validation_context(draft).await;
        let validation = validate_draft(draft, &ctx);
        warnings.extend(validation.warnings.clone());

        if !validation.valid() {
            let classified = ClassifiedError::validation(validation.errors.join("; "));
            state.record_error(classified.clone());
            state.advance(ExecutionPhase::Failed);
            self.emit_rejected(draft, client_order_id, None, &classified.message)
                .await;
            metric::counter_order_failed(classified.kind.as_str());
            return Ok(self.failure_report(client_order_id, state, warnings, classified));
        }

        // Phase 2: expected outcome.
        let expected = predict_outcome(draft, ctx.last_trade_price);

        // Phase 3: submit with retry, falling through to recovery.
        let started = tokio::time::Instant::now();
        let submitted = match self
            .submit_with_retry(draft, state, client_order_id)
            .await
        {
            Ok(order) => order,
            Err(classified) => {
                state.advance(ExecutionPhase::Failed);
                self.emit_rejected(draft, client_order_id, None, &classified.message)
                    .await;
                metric::counter_order_failed(classified.kind.as_str());
                return Ok(self.failure_report(client_order_id, state, warnings, classified));
            }
        };

        state.broker_order_id = Some(submitted.id.clone());
        self.store
            .upsert_order(order_record_from_broker(
                &submitted,
                work_item_id.clone(),
                draft.trace_id.clone(),
            ))
            .await?;
        metric::counter_order_submitted(&draft.symbol);
        self.events
            .publish(TradeEvent::new(
                TradeEventKind::OrderSubmitted,
                Some(submitted.id.clone()),
                client_order_id,
                &draft.symbol,
                draft.side,
                submitted.qty.or(draft.qty),
                submitted.limit_price,
                submitted.status.as_str(),
            ))
            .await;

        // Phase 4: monitor until terminal or budget exhaustion.
        state.advance(ExecutionPhase::Monitoring);
        self.active.upsert(state.clone());
        let final_order = self.monitor_until_terminal(&submitted).await;

        // Phase 5: outcome recording and analysis.
        let fill_time_ms = started.elapsed().as_millis() as u64;
        let mut adjustment_notes: Vec<String> = Vec::new();
        if state.attempts > 1 {
            adjustment_notes.push(format!("submission took {} attempts", state.attempts));
        }
        if state.requested_qty != draft.qty || state.requested_notional != draft.notional {
            adjustment_notes.push(format!(
                "request size halved after insufficient funds (qty {:?}, notional {:?})",
                state.requested_qty, state.requested_notional
            ));
        }
        self.finish_submission(
            draft,
            state,
            client_order_id,
            work_item_id,
            expected.as_ref(),
            final_order,
            fill_time_ms,
            warnings,
            adjustment_notes,
        )
        .await
    }

    async fn validation_context(&self, draft: &OrderDraft) -> ValidationContext {
        let asset = self.universe.get(&draft.symbol);
        let last_trade_price = match self
            .broker
            .get_snapshots(std::slice::from_ref(&draft.symbol))
            .await
        {
            Ok(snapshots) => snapshots
                .get(&draft.symbol)
                .and_then(|s| s.latest_trade_price),
            Err(e) => {
                tracing::debug!(symbol = %draft.symbol, error = %e, "Snapshot unavailable");
                None
            }
        };
        let market = match self.broker.get_market_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!(error = %e, "Market status unavailable");
                None
            }
        };
        ValidationContext {
            asset,
            last_trade_price,
            market,
        }
    }

    /// Submit loop with classified retry, then the recovery branch.
    async fn submit_with_retry(
        &self,
        draft: &OrderDraft,
        state: &mut ExecutionState,
        client_order_id: &str,
    ) -> Result<BrokerOrder, ClassifiedError> {
        // Duplicate-submission guard: an earlier attempt of this submission
        // may already rest in the book. Sells check unconditionally so a
        // position is never double-exited.
        if draft.side == OrderSide::Sell
            && let Some(existing) = self.find_open_by_client_id(client_order_id).await
        {
            tracing::info!(
                client_order_id = %client_order_id,
                broker_order_id = %existing.id,
                "Adopting existing open order instead of resubmitting"
            );
            state.advance(ExecutionPhase::Submitting);
            state.advance(ExecutionPhase::Submitted);
            return Ok(existing);
        }

        let params = draft.to_params(client_order_id);
        let mut attempt = 0u32;
        let classified = loop {
            attempt += 1;
            state.attempts = attempt;
            if state.phase != ExecutionPhase::Submitting {
                state.advance(ExecutionPhase::Submitting);
            }
            self.active.upsert(state.clone());

            match self.create_order_bounded(&params).await {
                Ok(order) => {
                    state.advance(ExecutionPhase::Submitted);
                    return Ok(order);
                }
                Err(err) => {
                    let classified = classify_broker_error(&err);
                    tracing::warn!(
                        client_order_id = %client_order_id,
                        attempt,
                        kind = %classified.kind,
                        error = %classified.message,
                        "Submit attempt failed"
                    );
                    state.record_error(classified.clone());
                    self.active.upsert(state.clone());

                    if classified.retryable && attempt < self.config.max_retries {
                        let delay = classified.suggested_delay * 2u32.pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break classified;
                }
            }
        };

        // Phase 3b: recovery.
        state.advance(ExecutionPhase::Recovering);
        self.active.upsert(state.clone());
        let recovered = self
            .recover(state, client_order_id, &params, &classified)
            .await;
        match recovered {
            Ok(order) => {
                state.advance(ExecutionPhase::Submitted);
                Ok(order)
            }
            Err(classified) => Err(classified),
        }
    }

    async fn create_order_bounded(&self, params: &OrderParams) -> Result<BrokerOrder, BrokerError> {
        let deadline = self.config.submit_timeout;
        match tokio::time::timeout(deadline, self.broker.create_order(params)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout {
                elapsed_ms: deadline.as_millis() as u64,
            }),
        }
    }

    /// Recovery branch, selected by the classifier's strategy.
    async fn recover(
        &self,
        state: &mut ExecutionState,
        client_order_id: &str,
        params: &OrderParams,
        classified: &ClassifiedError,
    ) -> Result<BrokerOrder, ClassifiedError> {
        match classified.recovery {
            RecoveryStrategy::CheckAndSync => {
                // The submit may have succeeded with only the response lost.
                if let Some(order) = self.find_recent_by_client_id(client_order_id).await {
                    tracing::info!(
                        client_order_id = %client_order_id,
                        broker_order_id = %order.id,
                        "Recovered order via client ID lookup"
                    );
                    return Ok(order);
                }
                Err(classified.clone())
            }
            RecoveryStrategy::AdjustAndRetry => {
                if classified.kind != ErrorKind::InsufficientFunds {
                    return Err(classified.clone());
                }
                // Halve the request once and try again.
                let mut adjusted = params.clone();
                adjusted.qty = adjusted.qty.map(|q| q / dec!(2));
                adjusted.notional = adjusted.notional.map(|n| n / dec!(2));
                tracing::info!(
                    client_order_id = %client_order_id,
                    qty = ?adjusted.qty,
                    notional = ?adjusted.notional,
                    "Retrying with halved size after insufficient funds"
                );
                state.requested_qty = adjusted.qty;
                state.requested_notional = adjusted.notional;
                self.create_order_bounded(&adjusted)
                    .await
                    .map_err(|e| classify_broker_error(&e))
            }
            RecoveryStrategy::WaitForMarketOpen => {
                match self.broker.get_market_status().await {
                    Ok(status) if status.accepts_orders_now() => {
                        tracing::info!(
                            client_order_id = %client_order_id,
                            "Market reopened, retrying submission once"
                        );
                        self.create_order_bounded(params)
                            .await
                            .map_err(|e| classify_broker_error(&e))
                    }
                    _ => Err(classified.clone()),
                }
            }
            RecoveryStrategy::RetryWithBackoff
            | RecoveryStrategy::ManualIntervention
            | RecoveryStrategy::None => Err(classified.clone()),
        }
    }

    async fn find_open_by_client_id(&self, client_order_id: &str) -> Option<BrokerOrder> {
        let open = self
            .broker
            .get_orders(OrderListStatus::Open, 100)
            .await
            .ok()?;
        open.into_iter()
            .find(|o| o.client_order_id == client_order_id)
    }

    async fn find_recent_by_client_id(&self, client_order_id: &str) -> Option<BrokerOrder> {
        if let Some(order) = self.find_open_by_client_id(client_order_id).await {
            return Some(order);
        }
        let closed = self
            .broker
            .get_orders(OrderListStatus::Closed, 50)
            .await
            .ok()?;
        closed
            .into_iter()
            .find(|o| o.client_order_id == client_order_id)
    }

    /// Poll the order until a terminal broker status or budget exhaustion.
    async fn monitor_until_terminal(&self, submitted: &BrokerOrder) -> BrokerOrder {
        let mut latest = submitted.clone();
        if latest.status.is_terminal() {
            return latest;
        }

        let deadline = tokio::time::Instant::now() + self.config.monitor_budget;
        loop {
            tokio::time::sleep(self.config.monitor_interval).await;

            match self.broker.get_order(&latest.id).await {
                Ok(order) => {
                    // partially_filled stays non-terminal; keep polling.
                    latest = order;
                    if latest.status.is_terminal() {
                        return latest;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        broker_order_id = %latest.id,
                        error = %e,
                        "Monitor poll failed"
                    );
                }
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::info!(
                    broker_order_id = %latest.id,
                    status = %latest.status,
                    "Monitor budget exhausted, returning last snapshot"
                );
                return latest;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_submission(
        &self,
        draft: &OrderDraft,
        state: &mut ExecutionState,
        client_order_id: &str,
        work_item_id: Option<String>,
        expected: Option<&ExpectedOutcome>,
        order: BrokerOrder,
        fill_time_ms: u64,
        warnings: Vec<String>,
        notes: Vec<String>,
    ) -> Result<ExecutionReport, StoreError> {
        state.filled_qty = order.filled_qty;
        state.filled_price = order.filled_avg_price;

        let filled = order.status == OrderStatus::Filled;
        let actual = analyze_outcome(
            expected,
            filled,
            order.filled_avg_price,
            order.filled_qty,
            state.requested_qty,
            fill_time_ms,
            notes,
        );

        // The broker snapshot is authoritative; rewrite the mirror.
        self.store
            .upsert_order(order_record_from_broker(
                &order,
                work_item_id,
                draft.trace_id.clone(),
            ))
            .await?;

        if filled && order.filled_qty > Decimal::ZERO {
            self.backfill_fill(&order).await?;
        }

        let phase = match order.status {
            OrderStatus::Filled => {
                metric::counter_order_filled(&draft.symbol);
                self.events
                    .publish(TradeEvent::new(
                        TradeEventKind::OrderFilled,
                        Some(order.id.clone()),
                        client_order_id,
                        &draft.symbol,
                        draft.side,
                        Some(order.filled_qty),
                        order.filled_avg_price,
                        order.status.as_str(),
                    ))
                    .await;
                ExecutionPhase::Filled
            }
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Replaced => {
                ExecutionPhase::Canceled
            }
            OrderStatus::Rejected => {
                let message = format!("broker rejected order {}", order.id);
                self.emit_rejected(draft, client_order_id, Some(order.id.clone()), &message)
                    .await;
                metric::counter_order_failed(ErrorKind::BrokerRejection.as_str());
                state.record_error(ClassifiedError::of(ErrorKind::BrokerRejection, message));
                ExecutionPhase::Failed
            }
            // Monitor budget ran out with the order still live.
            _ => ExecutionPhase::Submitted,
        };
        if phase.is_terminal() {
            state.advance(phase);
        }

        Ok(ExecutionReport {
            client_order_id: client_order_id.to_string(),
            broker_order_id: Some(order.id.clone()),
            phase,
            error: state.last_error().filter(|_| phase == ExecutionPhase::Failed).cloned(),
            order: Some(order),
            actual: Some(actual),
            warnings,
        })
    }

    /// Record one fill per broker order unless sync already has.
    async fn backfill_fill(&self, order: &BrokerOrder) -> Result<(), StoreError> {
        let existing = self.store.get_fills_by_broker_order_id(&order.id).await?;
        if !existing.is_empty() {
            return Ok(());
        }
        let mut fill = FillRecord::new(
            order.id.clone(),
            order.symbol.clone(),
            order.side,
            order.filled_qty,
            order.filled_avg_price.unwrap_or(Decimal::ZERO),
            order.filled_at.unwrap_or_else(Utc::now),
        );
        fill.order_id = Some(order.client_order_id.clone());
        fill.raw_json = order.raw.to_string();
        self.store.create_fill(fill).await
    }

    async fn emit_rejected(
        &self,
        draft: &OrderDraft,
        client_order_id: &str,
        broker_order_id: Option<String>,
        message: &str,
    ) {
        self.events
            .publish(TradeEvent::new(
                TradeEventKind::OrderRejected,
                broker_order_id,
                client_order_id,
                &draft.symbol,
                draft.side,
                draft.qty.or(draft.notional),
                draft.limit_price,
                message,
            ))
            .await;
    }

    fn failure_report(
        &self,
        client_order_id: &str,
        state: &ExecutionState,
        warnings: Vec<String>,
        classified: ClassifiedError,
    ) -> ExecutionReport {
        ExecutionReport {
            client_order_id: client_order_id.to_string(),
            broker_order_id: state.broker_order_id.clone(),
            phase: ExecutionPhase::Failed,
            order: None,
            actual: None,
            warnings,
            error: Some(classified),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Asset, ScriptedBroker};
    use crate::events::RecordingEventSink;
    use crate::queue::InMemoryStore;

    fn tradable_universe() -> Arc<AssetUniverse> {
        Arc::new(AssetUniverse::with_assets(vec![Asset {
            symbol: "AAPL".to_string(),
            tradable: true,
            fractionable: true,
            marginable: true,
        }]))
    }

    struct Harness {
        broker: Arc<ScriptedBroker>,
        store: Arc<InMemoryStore>,
        events: Arc<RecordingEventSink>,
        engine: ExecutionEngine,
    }

    fn harness() -> Harness {
        let broker = Arc::new(ScriptedBroker::new());
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let engine = ExecutionEngine::new(
            Arc::clone(&broker) as Arc<dyn BrokerClient>,
            Arc::clone(&store) as Arc<dyn TradeStore>,
            Arc::clone(&events) as Arc<dyn EventSink>,
            tradable_universe(),
            EngineConfig {
                submit_timeout: Duration::from_millis(200),
                monitor_interval: Duration::from_millis(10),
                monitor_budget: Duration::from_millis(500),
                ..EngineConfig::default()
            },
        );
        Harness {
            broker,
            store,
            events,
            engine,
        }
    }

    fn filled_order(id: &str, client_id: &str) -> BrokerOrder {
        ScriptedBroker::order(
            id,
            client_id,
            "AAPL",
            OrderSide::Buy,
            OrderStatus::Filled,
            dec!(10),
            dec!(10),
            Some(dec!(150.25)),
        )
    }

    fn accepted_order(id: &str, client_id: &str) -> BrokerOrder {
        ScriptedBroker::order(
            id,
            client_id,
            "AAPL",
            OrderSide::Buy,
            OrderStatus::Accepted,
            dec!(10),
            dec!(0),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_market_buy_fills() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        h.broker.push_create(Ok(accepted_order("b-1", "c-1")));
        h.broker.push_get_order(Ok(filled_order("b-1", "c-1")));

        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let report = h
            .engine
            .execute(draft, "c-1".to_string(), Some("wi-1".to_string()))
            .await
            .unwrap();

        assert_eq!(report.phase, ExecutionPhase::Filled);
        assert_eq!(report.broker_order_id.as_deref(), Some("b-1"));
        let actual = report.actual.unwrap();
        assert!(actual.filled);
        assert_eq!(actual.fill_qty, dec!(10));
        assert_eq!(actual.fill_price, Some(dec!(150.25)));

        // Order mirror and fill persisted.
        let record = h
            .store
            .get_order_by_broker_order_id("b-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.work_item_id.as_deref(), Some("wi-1"));
        assert_eq!(
            h.store
                .get_fills_by_broker_order_id("b-1")
                .await
                .unwrap()
                .len(),
            1
        );

        // submitted then filled events.
        let kinds = h.events.kinds();
        assert_eq!(
            kinds,
            vec![TradeEventKind::OrderSubmitted, TradeEventKind::OrderFilled]
        );

        // Active map cleaned up.
        assert!(h.engine.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_network_error_retries_then_succeeds() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        h.broker
            .push_create(Err(BrokerError::Network("ECONNREFUSED".into())));
        h.broker.push_create(Ok(filled_order("b-2", "c-2")));

        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let report = h.engine.execute(draft, "c-2".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Filled);
        assert_eq!(h.broker.created_params().len(), 2);
        let actual = report.actual.unwrap();
        assert!(
            actual
                .unexpected_events
                .iter()
                .any(|e| e.contains("2 attempts"))
        );
        assert_eq!(
            h.store
                .get_fills_by_broker_order_id("b-2")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_recovers_via_client_id_lookup() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        // Timeout is retryable, so every attempt in the budget times out
        // before recovery kicks in with CHECK_AND_SYNC.
        for _ in 0..3 {
            h.broker
                .push_create(Err(BrokerError::Timeout { elapsed_ms: 200 }));
        }
        // Recovery finds the order that actually reached the broker.
        h.broker.set_open_orders(vec![accepted_order("b-3", "c-3")]);
        h.broker.push_get_order(Ok(filled_order("b-3", "c-3")));

        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let report = h.engine.execute(draft, "c-3".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Filled);
        assert_eq!(report.broker_order_id.as_deref(), Some("b-3"));
        // Only the timed-out submit plus retries hit create_order; recovery
        // adopted instead of resubmitting.
        assert_eq!(h.broker.created_params().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_funds_halves_and_retries_once() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        h.broker
            .push_create(Err(BrokerError::InsufficientFunds("need more".into())));
        let mut half = filled_order("b-4", "c-4");
        half.qty = Some(dec!(5));
        half.filled_qty = dec!(5);
        h.broker.push_create(Ok(half));

        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let report = h.engine.execute(draft, "c-4".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Filled);
        let params = h.broker.created_params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].qty, Some(dec!(10)));
        assert_eq!(params[1].qty, Some(dec!(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_rejects_without_broker_call() {
        let h = harness();
        let mut draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        draft.qty = None; // schema failure

        let report = h.engine.execute(draft, "c-5".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Failed);
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::ValidationError);
        assert!(h.broker.created_params().is_empty());
        assert_eq!(h.events.kinds(), vec![TradeEventKind::OrderRejected]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_symbol_fails_without_retry() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        h.broker
            .push_create(Err(BrokerError::InvalidSymbol("AAPL delisted".into())));

        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let report = h.engine.execute(draft, "c-6".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Failed);
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::InvalidSymbol);
        assert_eq!(h.broker.created_params().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sell_adopts_existing_open_order() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        let existing = ScriptedBroker::order(
            "b-7",
            "c-7",
            "AAPL",
            OrderSide::Sell,
            OrderStatus::Accepted,
            dec!(10),
            dec!(0),
            None,
        );
        h.broker.set_open_orders(vec![existing]);
        let mut done = ScriptedBroker::order(
            "b-7",
            "c-7",
            "AAPL",
            OrderSide::Sell,
            OrderStatus::Filled,
            dec!(10),
            dec!(10),
            Some(dec!(151.00)),
        );
        done.filled_at = Some(Utc::now());
        h.broker.push_get_order(Ok(done));

        let draft = OrderDraft::market("AAPL", OrderSide::Sell, dec!(10));
        let report = h.engine.execute(draft, "c-7".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Filled);
        // Never resubmitted.
        assert!(h.broker.created_params().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_budget_exhaustion_returns_live_order() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        h.broker.push_create(Ok(accepted_order("b-8", "c-8")));
        h.broker.push_get_order(Ok(accepted_order("b-8", "c-8")));

        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let report = h.engine.execute(draft, "c-8".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Submitted);
        // Order not canceled on budget exhaustion.
        assert!(h.broker.canceled_order_ids().is_empty());
        let record = h
            .store
            .get_order_by_broker_order_id("b-8")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OrderStatus::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn broker_rejection_during_monitoring_fails() {
        let h = harness();
        h.broker.set_last_trade("AAPL", dec!(150.00));
        h.broker.push_create(Ok(accepted_order("b-9", "c-9")));
        let rejected = ScriptedBroker::order(
            "b-9",
            "c-9",
            "AAPL",
            OrderSide::Buy,
            OrderStatus::Rejected,
            dec!(10),
            dec!(0),
            None,
        );
        h.broker.push_get_order(Ok(rejected));

        let draft = OrderDraft::market("AAPL", OrderSide::Buy, dec!(10));
        let report = h.engine.execute(draft, "c-9".to_string(), None).await.unwrap();

        assert_eq!(report.phase, ExecutionPhase::Failed);
        assert!(h.events.kinds().contains(&TradeEventKind::OrderRejected));
    }
}
