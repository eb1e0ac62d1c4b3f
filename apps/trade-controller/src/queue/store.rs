//! Transactional store contract consumed by the queue and execution core.
//!
//! The only non-trivial obligation is `claim_next_work_item`: concurrent
//! callers must never observe the same item. Implementations satisfy this
//! with a compare-and-set on `status` (Turso) or a single lock (in-memory).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    FillRecord, OrderRecord, OrderStatus, RunStatus, WorkItem, WorkItemRun, WorkItemStatus,
    WorkItemType,
};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database connection error.
    #[error("store connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("store query error: {0}")]
    Query(String),

    /// Serialization error.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid for the row's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Missing required column.
    #[error("missing field: {0}")]
    MissingField(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Partial update for a work item. `None` leaves the column untouched;
/// the nested options distinguish "clear" from "keep".
#[derive(Debug, Clone, Default)]
pub struct WorkItemPatch {
    /// New status.
    pub status: Option<WorkItemStatus>,
    /// New attempt count.
    pub attempts: Option<u32>,
    /// New due time.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Set or clear the last error.
    pub last_error: Option<Option<String>>,
    /// Set or clear the result blob.
    pub result: Option<Option<String>>,
    /// Set or clear the broker order ID.
    pub broker_order_id: Option<Option<String>>,
}

impl WorkItemPatch {
    /// Patch that marks an item succeeded.
    #[must_use]
    pub fn succeeded(result: Option<String>) -> Self {
        Self {
            status: Some(WorkItemStatus::Succeeded),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Patch that reschedules an item after a retryable failure.
    #[must_use]
    pub fn rescheduled(attempts: u32, next_run_at: DateTime<Utc>, error: String) -> Self {
        Self {
            status: Some(WorkItemStatus::Pending),
            attempts: Some(attempts),
            next_run_at: Some(next_run_at),
            last_error: Some(Some(error)),
            ..Self::default()
        }
    }

    /// Patch that dead-letters an item.
    #[must_use]
    pub fn dead_letter(attempts: u32, error: String) -> Self {
        Self {
            status: Some(WorkItemStatus::DeadLetter),
            attempts: Some(attempts),
            last_error: Some(Some(error)),
            ..Self::default()
        }
    }
}

/// Store contract for work items, orders, and fills.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Insert a work item. If its idempotency key collides with an existing
    /// row, the existing row is returned unchanged.
    async fn create_work_item(&self, item: WorkItem) -> Result<WorkItem, StoreError>;

    /// Fetch a work item by ID.
    async fn get_work_item(&self, id: &str) -> Result<Option<WorkItem>, StoreError>;

    /// Fetch a work item by idempotency key.
    async fn get_work_item_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<WorkItem>, StoreError>;

    /// Atomically claim the next due `PENDING` item whose type is in `types`
    /// (or any type when `None`), ordered by `next_run_at` ascending.
    ///
    /// At most one caller receives any given item per `PENDING → CLAIMED`
    /// transition.
    async fn claim_next_work_item(
        &self,
        types: Option<&[WorkItemType]>,
    ) -> Result<Option<WorkItem>, StoreError>;

    /// Apply a partial update and return the updated row.
    async fn update_work_item(
        &self,
        id: &str,
        patch: WorkItemPatch,
    ) -> Result<WorkItem, StoreError>;

    /// Count work items by status, optionally filtered by type.
    async fn get_work_item_count(
        &self,
        status: WorkItemStatus,
        item_type: Option<WorkItemType>,
    ) -> Result<u64, StoreError>;

    /// List work items, newest first, optionally filtered by status.
    async fn get_work_items(
        &self,
        limit: usize,
        status: Option<WorkItemStatus>,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Append one attempt-log entry.
    async fn create_work_item_run(
        &self,
        work_item_id: &str,
        attempt_number: u32,
        status: RunStatus,
    ) -> Result<WorkItemRun, StoreError>;

    /// List attempt-log entries for a work item, oldest first.
    async fn get_work_item_runs(
        &self,
        work_item_id: &str,
    ) -> Result<Vec<WorkItemRun>, StoreError>;

    /// Insert or rewrite the local mirror row for a broker order.
    async fn upsert_order(&self, order: OrderRecord) -> Result<(), StoreError>;

    /// Fetch an order by broker order ID.
    async fn get_order_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError>;

    /// Fetch an order by client order ID.
    async fn get_order_by_client_order_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError>;

    /// List orders in a given status.
    async fn get_orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<OrderRecord>, StoreError>;

    /// List the most recently updated orders.
    async fn get_recent_orders(&self, limit: usize) -> Result<Vec<OrderRecord>, StoreError>;

    /// Append a fill.
    async fn create_fill(&self, fill: FillRecord) -> Result<(), StoreError>;

    /// Fills for one broker order.
    async fn get_fills_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Vec<FillRecord>, StoreError>;

    /// Fills for one local order ID.
    async fn get_fills_by_order_id(&self, order_id: &str)
    -> Result<Vec<FillRecord>, StoreError>;

    /// Batch fill lookup across several order IDs.
    async fn get_fills_by_order_ids(
        &self,
        order_ids: &[String],
    ) -> Result<Vec<FillRecord>, StoreError>;
}
