//! In-memory store for tests and ephemeral runs.
//!
//! A single mutex guards all tables, which makes `claim_next_work_item`
//! trivially atomic.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{
    FillRecord, OrderRecord, OrderStatus, RunStatus, WorkItem, WorkItemRun, WorkItemStatus,
    WorkItemType,
};

use super::store::{StoreError, TradeStore, WorkItemPatch};

#[derive(Default)]
struct Tables {
    work_items: HashMap<String, WorkItem>,
    runs: Vec<WorkItemRun>,
    next_run_id: i64,
    orders: HashMap<String, OrderRecord>,
    fills: Vec<FillRecord>,
}

/// In-memory implementation of the store contract.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }
}

#[async_trait]
impl TradeStore for InMemoryStore {
    async fn create_work_item(&self, item: WorkItem) -> Result<WorkItem, StoreError> {
        let mut tables = self.lock();
        if let Some(key) = &item.idempotency_key {
            let existing = tables
                .work_items
                .values()
                .find(|w| w.idempotency_key.as_deref() == Some(key.as_str()));
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }
        tables.work_items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn get_work_item(&self, id: &str) -> Result<Option<WorkItem>, StoreError> {
        Ok(self.lock().work_items.get(id).cloned())
    }

    async fn get_work_item_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<WorkItem>, StoreError> {
        Ok(self
            .lock()
            .work_items
            .values()
            .find(|w| w.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn claim_next_work_item(
        &self,
        types: Option<&[WorkItemType]>,
    ) -> Result<Option<WorkItem>, StoreError> {
        let mut tables = self.lock();
        let now = Utc::now();
        let candidate_id = tables
            .work_items
            .values()
            .filter(|w| w.status == WorkItemStatus::Pending && w.next_run_at <= now)
            .filter(|w| types.is_none_or(|ts| ts.contains(&w.item_type)))
            .min_by_key(|w| w.next_run_at)
            .map(|w| w.id.clone());

        let Some(id) = candidate_id else {
            return Ok(None);
        };
        let item = tables
            .work_items
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        item.status = WorkItemStatus::Claimed;
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn update_work_item(
        &self,
        id: &str,
        patch: WorkItemPatch,
    ) -> Result<WorkItem, StoreError> {
        let mut tables = self.lock();
        let item = tables
            .work_items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(status) = patch.status {
            item.status = status;
        }
        if let Some(attempts) = patch.attempts {
            item.attempts = attempts;
        }
        if let Some(next_run_at) = patch.next_run_at {
            item.next_run_at = next_run_at;
        }
        if let Some(last_error) = patch.last_error {
            item.last_error = last_error;
        }
        if let Some(result) = patch.result {
            item.result = result;
        }
        if let Some(broker_order_id) = patch.broker_order_id {
            item.broker_order_id = broker_order_id;
        }
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn get_work_item_count(
        &self,
        status: WorkItemStatus,
        item_type: Option<WorkItemType>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .work_items
            .values()
            .filter(|w| w.status == status)
            .filter(|w| item_type.is_none_or(|t| w.item_type == t))
            .count() as u64)
    }

    async fn get_work_items(
        &self,
        limit: usize,
        status: Option<WorkItemStatus>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let tables = self.lock();
        let mut items: Vec<WorkItem> = tables
            .work_items
            .values()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn create_work_item_run(
        &self,
        work_item_id: &str,
        attempt_number: u32,
        status: RunStatus,
    ) -> Result<WorkItemRun, StoreError> {
        let mut tables = self.lock();
        tables.next_run_id += 1;
        let run = WorkItemRun {
            id: tables.next_run_id,
            work_item_id: work_item_id.to_string(),
            attempt_number,
            status,
            started_at: Utc::now(),
        };
        tables.runs.push(run.clone());
        Ok(run)
    }

    async fn get_work_item_runs(
        &self,
        work_item_id: &str,
    ) -> Result<Vec<WorkItemRun>, StoreError> {
        Ok(self
            .lock()
            .runs
            .iter()
            .filter(|r| r.work_item_id == work_item_id)
            .cloned()
            .collect())
    }

    async fn upsert_order(&self, order: OrderRecord) -> Result<(), StoreError> {
        self.lock()
            .orders
            .insert(order.broker_order_id.clone(), order);
        Ok(())
    }

    async fn get_order_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self.lock().orders.get(broker_order_id).cloned())
    }

    async fn get_order_by_client_order_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self
            .lock()
            .orders
            .values()
            .find(|o| o.client_order_id == client_order_id)
            .cloned())
    }

    async fn get_orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect())
    }

    async fn get_recent_orders(&self, limit: usize) -> Result<Vec<OrderRecord>, StoreError> {
        let tables = self.lock();
        let mut orders: Vec<OrderRecord> = tables.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        orders.truncate(limit);
        Ok(orders)
    }

    async fn create_fill(&self, fill: FillRecord) -> Result<(), StoreError> {
        self.lock().fills.push(fill);
        Ok(())
    }

    async fn get_fills_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Vec<FillRecord>, StoreError> {
        Ok(self
            .lock()
            .fills
            .iter()
            .filter(|f| f.broker_order_id == broker_order_id)
            .cloned()
            .collect())
    }

    async fn get_fills_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Vec<FillRecord>, StoreError> {
        Ok(self
            .lock()
            .fills
            .iter()
            .filter(|f| f.order_id.as_deref() == Some(order_id))
            .cloned()
            .collect())
    }

    async fn get_fills_by_order_ids(
        &self,
        order_ids: &[String],
    ) -> Result<Vec<FillRecord>, StoreError> {
        Ok(self
            .lock()
            .fills
            .iter()
            .filter(|f| {
                f.order_id
                    .as_ref()
                    .is_some_and(|id| order_ids.contains(id))
            })
            .cloned()
            .collect())
    }
}
