//! Durable store backed by Turso (Rust rewrite of SQLite).
//!
//! Decimals are stored as TEXT, timestamps as fixed-width RFC 3339 UTC text.
//! `claim_next_work_item` uses a compare-and-set on `status` so concurrent
//! workers never observe the same item.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use turso::{Builder, Database, Row, Value};

use crate::models::{
    FillRecord, OrderRecord, OrderSide, OrderStatus, OrderType, RunStatus, TimeInForce, WorkItem,
    WorkItemRun, WorkItemStatus, WorkItemType, format_ts, parse_ts,
};

use super::store::{StoreError, TradeStore, WorkItemPatch};

/// How many due candidates a claim attempt races over before giving up.
const CLAIM_CANDIDATES: usize = 8;

/// Turso-backed implementation of the store contract.
pub struct TursoStore {
    db: Database,
}

impl TursoStore {
    /// Open (or create) a store at the given path.
    pub async fn open(db_path: &str) -> Result<Self, StoreError> {
        let db = Builder::new_local(db_path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::run_migrations(&db).await?;
        Ok(Self { db })
    }

    /// Open an in-memory store (tests).
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    async fn run_migrations(db: &Database) -> Result<(), StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                item_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                idempotency_key TEXT,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                next_run_at TEXT NOT NULL,
                last_error TEXT,
                result TEXT,
                broker_order_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_work_items_idempotency
             ON work_items(idempotency_key);

            CREATE INDEX IF NOT EXISTS idx_work_items_due
             ON work_items(status, next_run_at);

            CREATE TABLE IF NOT EXISTS work_item_runs (
                id INTEGER PRIMARY KEY,
                work_item_id TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_work_item_runs_item
             ON work_item_runs(work_item_id);

            CREATE TABLE IF NOT EXISTS orders (
                broker_order_id TEXT PRIMARY KEY,
                client_order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                time_in_force TEXT NOT NULL,
                qty TEXT,
                notional TEXT,
                limit_price TEXT,
                stop_price TEXT,
                status TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                filled_at TEXT,
                filled_qty TEXT NOT NULL,
                filled_avg_price TEXT,
                work_item_id TEXT,
                trace_id TEXT,
                raw_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            CREATE INDEX IF NOT EXISTS idx_orders_client ON orders(client_order_id);

            CREATE TABLE IF NOT EXISTS fills (
                id TEXT PRIMARY KEY,
                broker_order_id TEXT NOT NULL,
                order_id TEXT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                qty TEXT NOT NULL,
                price TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                raw_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fills_broker_order ON fills(broker_order_id);
            CREATE INDEX IF NOT EXISTS idx_fills_order ON fills(order_id);",
        )
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        tracing::info!("Store migrations complete");
        Ok(())
    }

    fn conn(&self) -> Result<turso::Connection, StoreError> {
        self.db
            .connect()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn work_item_params(item: &WorkItem) -> Vec<Value> {
        vec![
            Value::Text(item.id.clone()),
            Value::Text(item.item_type.as_str().to_string()),
            Value::Text(item.payload.to_string()),
            item.idempotency_key
                .clone()
                .map_or(Value::Null, Value::Text),
            Value::Text(item.status.as_str().to_string()),
            Value::Integer(i64::from(item.attempts)),
            Value::Integer(i64::from(item.max_attempts)),
            Value::Text(format_ts(item.next_run_at)),
            item.last_error.clone().map_or(Value::Null, Value::Text),
            item.result.clone().map_or(Value::Null, Value::Text),
            item.broker_order_id
                .clone()
                .map_or(Value::Null, Value::Text),
            Value::Text(format_ts(item.created_at)),
            Value::Text(format_ts(item.updated_at)),
        ]
    }

    fn row_to_work_item(row: &Row) -> Result<WorkItem, StoreError> {
        let item_type: String = get_text(row, 1, "item_type")?;
        let payload: String = get_text(row, 2, "payload")?;
        let status: String = get_text(row, 4, "status")?;
        Ok(WorkItem {
            id: get_text(row, 0, "id")?,
            item_type: item_type
                .parse()
                .map_err(|e: String| StoreError::MissingField(e))?,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            idempotency_key: row.get::<String>(3).ok(),
            status: status
                .parse()
                .map_err(|e: String| StoreError::MissingField(e))?,
            attempts: row.get::<i64>(5).unwrap_or(0) as u32,
            max_attempts: row.get::<i64>(6).unwrap_or(3) as u32,
            next_run_at: parse_ts(&get_text(row, 7, "next_run_at")?),
            last_error: row.get::<String>(8).ok(),
            result: row.get::<String>(9).ok(),
            broker_order_id: row.get::<String>(10).ok(),
            created_at: parse_ts(&get_text(row, 11, "created_at")?),
            updated_at: parse_ts(&get_text(row, 12, "updated_at")?),
        })
    }

    fn row_to_order(row: &Row) -> Result<OrderRecord, StoreError> {
        Ok(OrderRecord {
            broker_order_id: get_text(row, 0, "broker_order_id")?,
            client_order_id: get_text(row, 1, "client_order_id")?,
            symbol: get_text(row, 2, "symbol")?,
            side: parse_side(&get_text(row, 3, "side")?),
            order_type: parse_order_type(&get_text(row, 4, "order_type")?),
            time_in_force: parse_tif(&get_text(row, 5, "time_in_force")?),
            qty: get_decimal(row, 6),
            notional: get_decimal(row, 7),
            limit_price: get_decimal(row, 8),
            stop_price: get_decimal(row, 9),
            status: crate::models::parse_order_status(&get_text(row, 10, "status")?),
            submitted_at: parse_ts(&get_text(row, 11, "submitted_at")?),
            updated_at: parse_ts(&get_text(row, 12, "updated_at")?),
            filled_at: row.get::<String>(13).ok().map(|s| parse_ts(&s)),
            filled_qty: get_decimal(row, 14).unwrap_or(Decimal::ZERO),
            filled_avg_price: get_decimal(row, 15),
            work_item_id: row.get::<String>(16).ok(),
            trace_id: row.get::<String>(17).ok(),
            raw_json: get_text(row, 18, "raw_json")?,
        })
    }

    fn row_to_fill(row: &Row) -> Result<FillRecord, StoreError> {
        Ok(FillRecord {
            id: get_text(row, 0, "id")?,
            broker_order_id: get_text(row, 1, "broker_order_id")?,
            order_id: row.get::<String>(2).ok(),
            symbol: get_text(row, 3, "symbol")?,
            side: parse_side(&get_text(row, 4, "side")?),
            qty: get_decimal(row, 5).unwrap_or(Decimal::ZERO),
            price: get_decimal(row, 6).unwrap_or(Decimal::ZERO),
            occurred_at: parse_ts(&get_text(row, 7, "occurred_at")?),
            raw_json: get_text(row, 8, "raw_json")?,
        })
    }
}

const WORK_ITEM_COLUMNS: &str = "id, item_type, payload, idempotency_key, status, attempts, \
     max_attempts, next_run_at, last_error, result, broker_order_id, created_at, updated_at";

const ORDER_COLUMNS: &str = "broker_order_id, client_order_id, symbol, side, order_type, \
     time_in_force, qty, notional, limit_price, stop_price, status, submitted_at, updated_at, \
     filled_at, filled_qty, filled_avg_price, work_item_id, trace_id, raw_json";

const FILL_COLUMNS: &str =
    "id, broker_order_id, order_id, symbol, side, qty, price, occurred_at, raw_json";

#[async_trait]
impl TradeStore for TursoStore {
    async fn create_work_item(&self, item: WorkItem) -> Result<WorkItem, StoreError> {
        if let Some(key) = &item.idempotency_key
            && let Some(existing) = self.get_work_item_by_idempotency_key(key).await?
        {
            return Ok(existing);
        }

        let conn = self.conn()?;
        let insert = conn
            .execute(
                &format!(
                    "INSERT INTO work_items ({WORK_ITEM_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                Self::work_item_params(&item),
            )
            .await;

        match insert {
            Ok(_) => Ok(item),
            Err(e) if e.to_string().to_uppercase().contains("UNIQUE") => {
                // Lost the insert race on the idempotency index.
                let key = item
                    .idempotency_key
                    .as_deref()
                    .ok_or_else(|| StoreError::Query(e.to_string()))?;
                self.get_work_item_by_idempotency_key(key)
                    .await?
                    .ok_or_else(|| StoreError::Query(e.to_string()))
            }
            Err(e) => Err(StoreError::Query(e.to_string())),
        }
    }

    async fn get_work_item(&self, id: &str) -> Result<Option<WorkItem>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE id = ?"),
                vec![Value::Text(id.to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(Self::row_to_work_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_work_item_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<WorkItem>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE idempotency_key = ?"),
                vec![Value::Text(key.to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(Self::row_to_work_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn claim_next_work_item(
        &self,
        types: Option<&[WorkItemType]>,
    ) -> Result<Option<WorkItem>, StoreError> {
        let conn = self.conn()?;
        let now = format_ts(Utc::now());

        let mut sql = format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM work_items
             WHERE status = 'PENDING' AND next_run_at <= ?"
        );
        if let Some(types) = types {
            let list = types
                .iter()
                .map(|t| format!("'{}'", t.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND item_type IN ({list})"));
        }
        sql.push_str(&format!(" ORDER BY next_run_at ASC LIMIT {CLAIM_CANDIDATES}"));

        let mut rows = conn
            .query(&sql, vec![Value::Text(now.clone())])
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut candidates = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            candidates.push(Self::row_to_work_item(&row)?);
        }

        // Race each candidate with a conditional update; the first CAS win
        // is our claim. Losing every race means another worker drained the
        // batch, which is indistinguishable from an empty queue.
        for mut candidate in candidates {
            let changed = conn
                .execute(
                    "UPDATE work_items SET status = 'CLAIMED', updated_at = ?
                     WHERE id = ? AND status = 'PENDING'",
                    vec![Value::Text(now.clone()), Value::Text(candidate.id.clone())],
                )
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            if changed == 1 {
                candidate.status = WorkItemStatus::Claimed;
                candidate.updated_at = parse_ts(&now);
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }

    async fn update_work_item(
        &self,
        id: &str,
        patch: WorkItemPatch,
    ) -> Result<WorkItem, StoreError> {
        let conn = self.conn()?;
        let mut sets = vec!["updated_at = ?".to_string()];
        let mut params = vec![Value::Text(format_ts(Utc::now()))];

        if let Some(status) = patch.status {
            sets.push("status = ?".to_string());
            params.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(attempts) = patch.attempts {
            sets.push("attempts = ?".to_string());
            params.push(Value::Integer(i64::from(attempts)));
        }
        if let Some(next_run_at) = patch.next_run_at {
            sets.push("next_run_at = ?".to_string());
            params.push(Value::Text(format_ts(next_run_at)));
        }
        if let Some(last_error) = patch.last_error {
            sets.push("last_error = ?".to_string());
            params.push(last_error.map_or(Value::Null, Value::Text));
        }
        if let Some(result) = patch.result {
            sets.push("result = ?".to_string());
            params.push(result.map_or(Value::Null, Value::Text));
        }
        if let Some(broker_order_id) = patch.broker_order_id {
            sets.push("broker_order_id = ?".to_string());
            params.push(broker_order_id.map_or(Value::Null, Value::Text));
        }
        params.push(Value::Text(id.to_string()));

        let changed = conn
            .execute(
                &format!("UPDATE work_items SET {} WHERE id = ?", sets.join(", ")),
                params,
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        self.get_work_item(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_work_item_count(
        &self,
        status: WorkItemStatus,
        item_type: Option<WorkItemType>,
    ) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let (sql, params) = item_type.map_or_else(
            || {
                (
                    "SELECT COUNT(*) FROM work_items WHERE status = ?".to_string(),
                    vec![Value::Text(status.as_str().to_string())],
                )
            },
            |t| {
                (
                    "SELECT COUNT(*) FROM work_items WHERE status = ? AND item_type = ?"
                        .to_string(),
                    vec![
                        Value::Text(status.as_str().to_string()),
                        Value::Text(t.as_str().to_string()),
                    ],
                )
            },
        );
        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let row = next_row(&mut rows)
            .await?
            .ok_or_else(|| StoreError::Query("count returned no rows".to_string()))?;
        Ok(row.get::<i64>(0).unwrap_or(0) as u64)
    }

    async fn get_work_items(
        &self,
        limit: usize,
        status: Option<WorkItemStatus>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let conn = self.conn()?;
        let (sql, params) = status.map_or_else(
            || {
                (
                    format!(
                        "SELECT {WORK_ITEM_COLUMNS} FROM work_items
                         ORDER BY created_at DESC LIMIT {limit}"
                    ),
                    Vec::<Value>::new(),
                )
            },
            |s| {
                (
                    format!(
                        "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE status = ?
                         ORDER BY created_at DESC LIMIT {limit}"
                    ),
                    vec![Value::Text(s.as_str().to_string())],
                )
            },
        );
        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut items = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            items.push(Self::row_to_work_item(&row)?);
        }
        Ok(items)
    }

    async fn create_work_item_run(
        &self,
        work_item_id: &str,
        attempt_number: u32,
        status: RunStatus,
    ) -> Result<WorkItemRun, StoreError> {
        let conn = self.conn()?;
        let started_at = Utc::now();
        conn.execute(
            "INSERT INTO work_item_runs (work_item_id, attempt_number, status, started_at)
             VALUES (?, ?, ?, ?)",
            vec![
                Value::Text(work_item_id.to_string()),
                Value::Integer(i64::from(attempt_number)),
                Value::Text(status.as_str().to_string()),
                Value::Text(format_ts(started_at)),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut rows = conn
            .query("SELECT last_insert_rowid()", Vec::<Value>::new())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let id = next_row(&mut rows)
            .await?
            .and_then(|row| row.get::<i64>(0).ok())
            .unwrap_or(0);

        Ok(WorkItemRun {
            id,
            work_item_id: work_item_id.to_string(),
            attempt_number,
            status,
            started_at,
        })
    }

    async fn get_work_item_runs(
        &self,
        work_item_id: &str,
    ) -> Result<Vec<WorkItemRun>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, work_item_id, attempt_number, status, started_at
                 FROM work_item_runs WHERE work_item_id = ? ORDER BY id ASC",
                vec![Value::Text(work_item_id.to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut runs = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            let status: String = get_text(&row, 3, "status")?;
            runs.push(WorkItemRun {
                id: row.get::<i64>(0).unwrap_or(0),
                work_item_id: get_text(&row, 1, "work_item_id")?,
                attempt_number: row.get::<i64>(2).unwrap_or(0) as u32,
                status: status
                    .parse()
                    .map_err(|e: String| StoreError::MissingField(e))?,
                started_at: parse_ts(&get_text(&row, 4, "started_at")?),
            });
        }
        Ok(runs)
    }

    async fn upsert_order(&self, order: OrderRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let params: Vec<Value> = vec![
            Value::Text(order.broker_order_id.clone()),
            Value::Text(order.client_order_id.clone()),
            Value::Text(order.symbol.clone()),
            Value::Text(order.side.as_str().to_string()),
            Value::Text(order.order_type.as_str().to_string()),
            Value::Text(order.time_in_force.as_str().to_string()),
            order
                .qty
                .map_or(Value::Null, |v| Value::Text(v.to_string())),
            order
                .notional
                .map_or(Value::Null, |v| Value::Text(v.to_string())),
            order
                .limit_price
                .map_or(Value::Null, |v| Value::Text(v.to_string())),
            order
                .stop_price
                .map_or(Value::Null, |v| Value::Text(v.to_string())),
            Value::Text(order.status.as_str().to_string()),
            Value::Text(format_ts(order.submitted_at)),
            Value::Text(format_ts(order.updated_at)),
            order.filled_at.map_or(Value::Null, |v| Value::Text(format_ts(v))),
            Value::Text(order.filled_qty.to_string()),
            order
                .filled_avg_price
                .map_or(Value::Null, |v| Value::Text(v.to_string())),
            order.work_item_id.clone().map_or(Value::Null, Value::Text),
            order.trace_id.clone().map_or(Value::Null, Value::Text),
            Value::Text(order.raw_json.clone()),
        ];
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO orders ({ORDER_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params,
        )
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_order_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE broker_order_id = ?"),
                vec![Value::Text(broker_order_id.to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(Self::row_to_order(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_order_by_client_order_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE client_order_id = ?"),
                vec![Value::Text(client_order_id.to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(Self::row_to_order(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE status = ?"),
                vec![Value::Text(status.as_str().to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut orders = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            orders.push(Self::row_to_order(&row)?);
        }
        Ok(orders)
    }

    async fn get_recent_orders(&self, limit: usize) -> Result<Vec<OrderRecord>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ORDER_COLUMNS} FROM orders ORDER BY updated_at DESC LIMIT {limit}"
                ),
                Vec::<Value>::new(),
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut orders = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            orders.push(Self::row_to_order(&row)?);
        }
        Ok(orders)
    }

    async fn create_fill(&self, fill: FillRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO fills ({FILL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            vec![
                Value::Text(fill.id.clone()),
                Value::Text(fill.broker_order_id.clone()),
                fill.order_id.clone().map_or(Value::Null, Value::Text),
                Value::Text(fill.symbol.clone()),
                Value::Text(fill.side.as_str().to_string()),
                Value::Text(fill.qty.to_string()),
                Value::Text(fill.price.to_string()),
                Value::Text(format_ts(fill.occurred_at)),
                Value::Text(fill.raw_json.clone()),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_fills_by_broker_order_id(
        &self,
        broker_order_id: &str,
    ) -> Result<Vec<FillRecord>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {FILL_COLUMNS} FROM fills WHERE broker_order_id = ?"),
                vec![Value::Text(broker_order_id.to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut fills = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            fills.push(Self::row_to_fill(&row)?);
        }
        Ok(fills)
    }

    async fn get_fills_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Vec<FillRecord>, StoreError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {FILL_COLUMNS} FROM fills WHERE order_id = ?"),
                vec![Value::Text(order_id.to_string())],
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let mut fills = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            fills.push(Self::row_to_fill(&row)?);
        }
        Ok(fills)
    }

    async fn get_fills_by_order_ids(
        &self,
        order_ids: &[String],
    ) -> Result<Vec<FillRecord>, StoreError> {
        let mut fills = Vec::new();
        for order_id in order_ids {
            fills.extend(self.get_fills_by_order_id(order_id).await?);
        }
        Ok(fills)
    }
}

async fn next_row(rows: &mut turso::Rows) -> Result<Option<Row>, StoreError> {
    rows.next()
        .await
        .map_err(|e| StoreError::Query(e.to_string()))
}

fn get_text(row: &Row, index: usize, field: &str) -> Result<String, StoreError> {
    row.get::<String>(index)
        .map_err(|e| StoreError::MissingField(format!("{field}: {e}")))
}

fn get_decimal(row: &Row, index: usize) -> Option<Decimal> {
    row.get::<String>(index).ok().and_then(|s| s.parse().ok())
}

fn parse_side(s: &str) -> OrderSide {
    if s == "sell" { OrderSide::Sell } else { OrderSide::Buy }
}

fn parse_order_type(s: &str) -> OrderType {
    match s {
        "limit" => OrderType::Limit,
        "stop" => OrderType::Stop,
        "stop_limit" => OrderType::StopLimit,
        "trailing_stop" => OrderType::TrailingStop,
        _ => OrderType::Market,
    }
}

fn parse_tif(s: &str) -> TimeInForce {
    match s {
        "gtc" => TimeInForce::Gtc,
        "ioc" => TimeInForce::Ioc,
        "fok" => TimeInForce::Fok,
        "opg" => TimeInForce::Opg,
        "cls" => TimeInForce::Cls,
        _ => TimeInForce::Day,
    }
}
