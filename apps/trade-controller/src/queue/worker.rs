//! Work queue engine: enqueue, claim, dispatch, and the retry lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::broker::BrokerError;
use crate::error::{ClassifiedError, ErrorKind, RecoveryStrategy, classify_broker_error, classify_message};
use crate::models::{RunStatus, WorkItem, WorkItemStatus, WorkItemType};
use crate::observability::metric;

use super::backoff;
use super::store::{StoreError, TradeStore, WorkItemPatch};

/// Failure from a work item processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Request failed validation; never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Broker call failed; classified structurally.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Store operation failed; usually transient.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Permanent failure with no recovery path.
    #[error("{0}")]
    Permanent(String),

    /// Pre-classified failure; the policy passes through untouched.
    #[error("{}", .0.message)]
    Classified(ClassifiedError),

    /// Anything else; classified from the message.
    #[error("{0}")]
    Other(String),
}

impl ProcessorError {
    /// Classify this failure for the retry policy.
    #[must_use]
    pub fn classify(&self) -> ClassifiedError {
        match self {
            Self::Validation(msg) => ClassifiedError::validation(msg.clone()),
            Self::Broker(err) => classify_broker_error(err),
            Self::Store(err) => classify_message(&err.to_string(), None),
            Self::Permanent(msg) => ClassifiedError {
                kind: ErrorKind::Unknown,
                retryable: false,
                suggested_delay: Duration::ZERO,
                recovery: RecoveryStrategy::ManualIntervention,
                message: msg.clone(),
            },
            Self::Classified(classified) => classified.clone(),
            Self::Other(msg) => classify_message(msg, None),
        }
    }
}

/// Successful processor output.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutcome {
    /// Small result blob persisted on the work item.
    pub result: Option<String>,
    /// Broker order ID to link back onto the work item.
    pub broker_order_id: Option<String>,
}

impl ProcessorOutcome {
    /// Outcome with just a result message.
    #[must_use]
    pub fn message(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            broker_order_id: None,
        }
    }
}

/// Handler for one work item type.
#[async_trait]
pub trait WorkProcessor: Send + Sync {
    /// Process a claimed item.
    async fn process(&self, item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError>;
}

/// Enqueue-side handle over the store, plus the mark/retry lifecycle.
#[derive(Clone)]
pub struct WorkQueue {
    store: Arc<dyn TradeStore>,
}

impl WorkQueue {
    /// Create a queue handle.
    #[must_use]
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TradeStore> {
        &self.store
    }

    /// Enqueue a work item. When its idempotency key collides with an
    /// existing item, that item is returned unchanged.
    pub async fn enqueue(&self, item: WorkItem) -> Result<WorkItem, StoreError> {
        let stored = self.store.create_work_item(item.clone()).await?;
        if stored.id == item.id {
            metric::counter_enqueued(stored.item_type);
            tracing::debug!(
                work_item_id = %stored.id,
                item_type = %stored.item_type,
                "Work item enqueued"
            );
        } else {
            tracing::debug!(
                work_item_id = %stored.id,
                item_type = %stored.item_type,
                "Enqueue deduplicated onto existing work item"
            );
        }
        Ok(stored)
    }

    /// Mark a claimed item as succeeded.
    pub async fn mark_succeeded(
        &self,
        item: &WorkItem,
        outcome: ProcessorOutcome,
    ) -> Result<WorkItem, StoreError> {
        let mut patch = WorkItemPatch::succeeded(outcome.result);
        if let Some(broker_order_id) = outcome.broker_order_id {
            patch.broker_order_id = Some(Some(broker_order_id));
        }
        metric::counter_succeeded(item.item_type);
        self.store.update_work_item(&item.id, patch).await
    }

    /// Mark a claimed item as failed.
    ///
    /// Retryable failures with budget remaining go back to `PENDING` with
    /// the per-type backoff delay; everything else dead-letters.
    pub async fn mark_failed(
        &self,
        item: &WorkItem,
        classified: &ClassifiedError,
    ) -> Result<WorkItem, StoreError> {
        let new_attempts = item.attempts + 1;

        if !classified.retryable || new_attempts >= item.max_attempts {
            tracing::warn!(
                work_item_id = %item.id,
                item_type = %item.item_type,
                attempts = new_attempts,
                kind = %classified.kind,
                error = %classified.message,
                "Work item dead-lettered"
            );
            metric::counter_dead_lettered(item.item_type);
            return self
                .store
                .update_work_item(
                    &item.id,
                    WorkItemPatch::dead_letter(new_attempts, classified.message.clone()),
                )
                .await;
        }

        let delay = backoff::delay(item.item_type, new_attempts.saturating_sub(1));
        let next_run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
        tracing::info!(
            work_item_id = %item.id,
            item_type = %item.item_type,
            attempt = new_attempts,
            kind = %classified.kind,
            delay_ms = delay.as_millis(),
            "Work item rescheduled after failure"
        );
        metric::counter_retried(item.item_type);
        self.store
            .update_work_item(
                &item.id,
                WorkItemPatch::rescheduled(new_attempts, next_run_at, classified.message.clone()),
            )
            .await
    }

    /// Operator-initiated replay of a dead-lettered item.
    ///
    /// Resets the attempt counter and makes the item immediately due.
    pub async fn retry_dead_letter(&self, id: &str) -> Result<WorkItem, StoreError> {
        let item = self
            .store
            .get_work_item(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if item.status != WorkItemStatus::DeadLetter {
            return Err(StoreError::InvalidState(format!(
                "work item {id} is {}, not DEAD_LETTER",
                item.status
            )));
        }
        tracing::info!(work_item_id = %id, "Dead-letter retry requested");
        self.store
            .update_work_item(
                id,
                WorkItemPatch {
                    status: Some(WorkItemStatus::Pending),
                    attempts: Some(0),
                    next_run_at: Some(Utc::now()),
                    last_error: Some(None),
                    ..WorkItemPatch::default()
                },
            )
            .await
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Restrict claims to these types; `None` claims anything.
    pub types_filter: Option<Vec<WorkItemType>>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            types_filter: None,
        }
    }
}

/// Polling worker that claims due items and dispatches them to processors.
pub struct QueueWorker {
    queue: WorkQueue,
    processors: HashMap<WorkItemType, Arc<dyn WorkProcessor>>,
    config: WorkerConfig,
    // Prevents overlapping cycles within one process; cross-process
    // exclusion is the store's claim CAS.
    cycle_guard: tokio::sync::Mutex<()>,
}

impl QueueWorker {
    /// Create a worker over a queue.
    #[must_use]
    pub fn new(queue: WorkQueue, config: WorkerConfig) -> Self {
        Self {
            queue,
            processors: HashMap::new(),
            config,
            cycle_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Register the processor for a work item type.
    #[must_use]
    pub fn with_processor(
        mut self,
        item_type: WorkItemType,
        processor: Arc<dyn WorkProcessor>,
    ) -> Self {
        self.processors.insert(item_type, processor);
        self
    }

    /// The queue handle this worker drives.
    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run until the shutdown signal flips to `true`.
    ///
    /// The current cycle finishes before the loop exits, so shutdown
    /// completes within one poll interval plus the in-flight item.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "Queue worker started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            let processed = match self.run_once().await {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::error!(error = %e, "Worker cycle failed");
                    false
                }
            };

            if processed {
                // Drain without sleeping while work is due.
                continue;
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!("Queue worker stopped");
    }

    /// Claim and process at most one item. Returns whether an item was
    /// processed.
    pub async fn run_once(&self) -> Result<bool, StoreError> {
        // Re-entrancy guard: a second concurrent cycle in this process skips.
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            return Ok(false);
        };

        let item = self
            .queue
            .store
            .claim_next_work_item(self.config.types_filter.as_deref())
            .await?;
        let Some(item) = item else {
            return Ok(false);
        };

        let attempt_number = item.attempts + 1;
        self.queue
            .store
            .create_work_item_run(&item.id, attempt_number, RunStatus::Running)
            .await?;

        tracing::info!(
            work_item_id = %item.id,
            item_type = %item.item_type,
            attempt = attempt_number,
            "Processing work item"
        );

        let result = match self.processors.get(&item.item_type) {
            Some(processor) => processor.process(&item).await,
            None => Err(ProcessorError::Permanent(format!(
                "no processor registered for {}",
                item.item_type
            ))),
        };

        match result {
            Ok(outcome) => {
                self.queue.mark_succeeded(&item, outcome).await?;
            }
            Err(e) => {
                let classified = e.classify();
                self.queue.mark_failed(&item, &classified).await?;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::InMemoryStore;

    struct AlwaysOk;

    #[async_trait]
    impl WorkProcessor for AlwaysOk {
        async fn process(&self, _item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError> {
            Ok(ProcessorOutcome::message("done"))
        }
    }

    struct AlwaysFail {
        error: fn() -> ProcessorError,
    }

    #[async_trait]
    impl WorkProcessor for AlwaysFail {
        async fn process(&self, _item: &WorkItem) -> Result<ProcessorOutcome, ProcessorError> {
            Err((self.error)())
        }
    }

    fn queue() -> WorkQueue {
        WorkQueue::new(Arc::new(InMemoryStore::new()))
    }

    fn sync_item() -> WorkItem {
        WorkItem::new(WorkItemType::OrderSync, serde_json::json!({}))
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

    #[tokio::test]
    async fn successful_item_is_marked_succeeded() {
        let queue = queue();
        let item = queue.enqueue(sync_item()).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::default())
            .with_processor(WorkItemType::OrderSync, Arc::new(AlwaysOk));

        assert!(worker.run_once().await.unwrap());

        let stored = queue.store().get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Succeeded);
        assert_eq!(stored.result.as_deref(), Some("done"));

        let runs = queue.store().get_work_item_runs(&item.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].attempt_number, 1);
    }

    #[tokio::test]
    async fn retryable_failure_reschedules_with_backoff() {
        let queue = queue();
        let item = queue.enqueue(sync_item()).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::default()).with_processor(
            WorkItemType::OrderSync,
            Arc::new(AlwaysFail {
                error: || ProcessorError::Broker(BrokerError::Network("ECONNRESET".into())),
            }),
        );

        assert!(worker.run_once().await.unwrap());

        let stored = queue.store().get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_run_at > Utc::now());
        assert!(stored.last_error.as_deref().unwrap().contains("ECONNRESET"));

        // Not due again yet.
        assert!(!worker.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn validation_failure_dead_letters_without_retry() {
        let queue = queue();
        let item = queue.enqueue(sync_item()).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::default()).with_processor(
            WorkItemType::OrderSync,
            Arc::new(AlwaysFail {
                error: || ProcessorError::Validation("qty must be positive".into()),
            }),
        );

        assert!(worker.run_once().await.unwrap());

        let stored = queue.store().get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::DeadLetter);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_dead_letters() {
        let queue = queue();
        let item = queue.enqueue(sync_item()).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::default()).with_processor(
            WorkItemType::OrderSync,
            Arc::new(AlwaysFail {
                error: || {
                    ProcessorError::Broker(BrokerError::RateLimited {
                        retry_after_secs: None,
                    })
                },
            }),
        );

        for attempt in 1..=3 {
            assert!(worker.run_once().await.unwrap(), "attempt {attempt}");
            if attempt < 3 {
                make_due(&queue, &item.id).await;
            }
        }

        let stored = queue.store().get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::DeadLetter);
        assert_eq!(stored.attempts, 3);

        let runs = queue.store().get_work_item_runs(&item.id).await.unwrap();
        assert_eq!(runs.len(), 3);
    }

    #[tokio::test]
    async fn unregistered_type_is_permanent() {
        let queue = queue();
        let item = queue
            .enqueue(WorkItem::new(
                WorkItemType::DecisionEvaluation,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::default());

        assert!(worker.run_once().await.unwrap());

        let stored = queue.store().get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkItemStatus::DeadLetter);
        assert!(
            stored
                .last_error
                .as_deref()
                .unwrap()
                .contains("no processor registered")
        );
    }

    #[tokio::test]
    async fn retry_dead_letter_resets_item() {
        let queue = queue();
        let item = queue.enqueue(sync_item()).await.unwrap();
        let worker = QueueWorker::new(queue.clone(), WorkerConfig::default()).with_processor(
            WorkItemType::OrderSync,
            Arc::new(AlwaysFail {
                error: || ProcessorError::Validation("bad".into()),
            }),
        );
        assert!(worker.run_once().await.unwrap());

        let reset = queue.retry_dead_letter(&item.id).await.unwrap();
        assert_eq!(reset.status, WorkItemStatus::Pending);
        assert_eq!(reset.attempts, 0);
        assert!(reset.last_error.is_none());
        assert!(reset.next_run_at <= Utc::now());
    }

    #[tokio::test]
    async fn retry_dead_letter_rejects_non_dead_items() {
        let queue = queue();
        let item = queue.enqueue(sync_item()).await.unwrap();
        let err = queue.retry_dead_letter(&item.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[tokio::test]
    async fn worker_respects_type_filter() {
        let queue = queue();
        queue.enqueue(sync_item()).await.unwrap();
        let worker = QueueWorker::new(
            queue.clone(),
            WorkerConfig {
                types_filter: Some(vec![WorkItemType::OrderSubmit]),
                ..WorkerConfig::default()
            },
        );
        assert!(!worker.run_once().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_signal() {
        let queue = queue();
        let worker = Arc::new(QueueWorker::new(queue, WorkerConfig::default()));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.run(rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
