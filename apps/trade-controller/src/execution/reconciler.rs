//! Periodic broker reconciliation.
//!
//! Two jobs on independent schedules: enqueue ORDER_SYNC so the mirror
//! converges on broker state, and sweep the recent broker book for unreal
//! orders (no economic effect) to cancel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::broker::{BrokerClient, BrokerError, BrokerOrder, OrderListStatus};
use crate::models::{WorkItem, WorkItemType};
use crate::observability::metric;
use crate::queue::{StoreError, WorkQueue, idempotency};

/// Reconciler schedule and thresholds.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to enqueue an ORDER_SYNC item.
    pub sync_interval: Duration,
    /// How often to sweep for unreal orders.
    pub unreal_scan_interval: Duration,
    /// How many recent broker orders a sweep inspects.
    pub unreal_scan_depth: usize,
    /// Age past which an active, unfilled order counts as stale.
    pub stale_age: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            unreal_scan_interval: Duration::from_secs(300),
            unreal_scan_depth: 500,
            stale_age: Duration::from_secs(24 * 3600),
        }
    }
}

/// Why an order was flagged unreal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrealReason {
    /// Rejected outright.
    Rejected,
    /// Canceled without any fill.
    CanceledUnfilled,
    /// Expired without any fill.
    ExpiredUnfilled,
    /// No quantity and no notional requested.
    EmptyRequest,
    /// Active, unfilled, and older than the stale threshold.
    Stale,
}

/// One flagged order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnrealOrder {
    /// Broker order ID.
    pub broker_order_id: String,
    /// Symbol.
    pub symbol: String,
    /// Broker status at detection time.
    pub status: String,
    /// Why it was flagged.
    pub reason: UnrealReason,
    /// Whether the order was still active (cancel attempted).
    pub active: bool,
}

/// Result of one unreal-order sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnrealReport {
    /// Orders flagged.
    pub detected: Vec<UnrealOrder>,
    /// Cancels that succeeded.
    pub canceled: u32,
    /// Cancels that failed (non-fatal).
    pub cancel_failures: u32,
    /// Orders inspected.
    pub scanned: usize,
}

/// Classify one broker order against the unreal rules.
#[must_use]
pub fn is_unreal(
    order: &BrokerOrder,
    now: DateTime<Utc>,
    stale_age: Duration,
) -> Option<UnrealReason> {
    use crate::models::OrderStatus;

    let unfilled = order.filled_qty.is_zero();
    match order.status {
        OrderStatus::Rejected => return Some(UnrealReason::Rejected),
        OrderStatus::Canceled if unfilled => return Some(UnrealReason::CanceledUnfilled),
        OrderStatus::Expired if unfilled => return Some(UnrealReason::ExpiredUnfilled),
        _ => {}
    }

    let no_qty = order.qty.is_none_or(|q| q.is_zero());
    let no_notional = order.notional.is_none_or(|n| n.is_zero());
    if no_qty && no_notional && unfilled {
        return Some(UnrealReason::EmptyRequest);
    }

    if order.status.is_active() && unfilled {
        let age = now.signed_duration_since(order.created_at);
        let stale = chrono::Duration::from_std(stale_age).unwrap_or_else(|_| chrono::Duration::hours(24));
        if age > stale {
            return Some(UnrealReason::Stale);
        }
    }

    None
}

/// Periodic reconciliation driver.
pub struct Reconciler {
    broker: Arc<dyn BrokerClient>,
    queue: WorkQueue,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>, queue: WorkQueue, config: ReconcilerConfig) -> Self {
        Self {
            broker,
            queue,
            config,
        }
    }

    /// Run both schedules until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            sync_interval_s = self.config.sync_interval.as_secs(),
            unreal_scan_interval_s = self.config.unreal_scan_interval.as_secs(),
            "Reconciler started"
        );
        let mut sync_timer = tokio::time::interval(self.config.sync_interval);
        let mut unreal_timer = tokio::time::interval(self.config.unreal_scan_interval);
        sync_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        unreal_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = sync_timer.tick() => {
                    if let Err(e) = self.enqueue_order_sync().await {
                        tracing::error!(error = %e, "Failed to enqueue order sync");
                    }
                }
                _ = unreal_timer.tick() => {
                    match self.scan_unreal().await {
                        Ok(report) if !report.detected.is_empty() => {
                            tracing::warn!(
                                detected = report.detected.len(),
                                canceled = report.canceled,
                                failures = report.cancel_failures,
                                "Unreal orders detected"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Unreal order sweep failed"),
                    }
                }
            }
        }
        tracing::info!("Reconciler stopped");
    }

    /// Enqueue an ORDER_SYNC item, keyed to the current sync window so
    /// repeat enqueues collapse.
    pub async fn enqueue_order_sync(&self) -> Result<WorkItem, StoreError> {
        let bucket = Utc::now().timestamp() / self.config.sync_interval.as_secs().max(1) as i64;
        let key = idempotency::fingerprint(&["reconciler", "order-sync", &bucket.to_string()]);
        self.queue
            .enqueue(
                WorkItem::new(WorkItemType::OrderSync, serde_json::json!({}))
                    .with_idempotency_key(key),
            )
            .await
    }

    /// Sweep recent broker orders for unreal ones; cancel those still
    /// active. Cancel failures are recorded, never fatal.
    pub async fn scan_unreal(&self) -> Result<UnrealReport, BrokerError> {
        let orders = self
            .broker
            .get_orders(OrderListStatus::All, self.config.unreal_scan_depth)
            .await?;
        let now = Utc::now();

        let mut report = UnrealReport {
            scanned: orders.len(),
            ..UnrealReport::default()
        };

        for order in &orders {
            let Some(reason) = is_unreal(order, now, self.config.stale_age) else {
                continue;
            };
            let active = order.status.is_active();
            report.detected.push(UnrealOrder {
                broker_order_id: order.id.clone(),
                symbol: order.symbol.clone(),
                status: order.status.as_str().to_string(),
                reason,
                active,
            });

            if active {
                match self.broker.cancel_order(&order.id).await {
                    Ok(()) => {
                        report.canceled += 1;
                        tracing::info!(
                            broker_order_id = %order.id,
                            reason = ?reason,
                            "Canceled unreal order"
                        );
                    }
                    Err(e) => {
                        report.cancel_failures += 1;
                        tracing::warn!(
                            broker_order_id = %order.id,
                            error = %e,
                            "Failed to cancel unreal order"
                        );
                    }
                }
            }
        }

        metric::counter_unreal_detected(report.detected.len() as u64);
        Ok(report)
    }
}
