//! Logging and metrics plumbing.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber from `RUST_LOG`, defaulting the crate
/// to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trade_controller=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Metric helpers keyed by work item type and engine phase.
pub mod metric {
    use crate::models::WorkItemType;

    /// Work items enqueued.
    pub const WORK_ITEMS_ENQUEUED: &str = "work_items_enqueued_total";
    /// Work items completed successfully.
    pub const WORK_ITEMS_SUCCEEDED: &str = "work_items_succeeded_total";
    /// Work items rescheduled after a retryable failure.
    pub const WORK_ITEMS_RETRIED: &str = "work_items_retried_total";
    /// Work items dead-lettered.
    pub const WORK_ITEMS_DEAD_LETTERED: &str = "work_items_dead_lettered_total";
    /// Orders submitted to the broker.
    pub const ORDERS_SUBMITTED: &str = "orders_submitted_total";
    /// Orders that reached a filled terminal state.
    pub const ORDERS_FILLED: &str = "orders_filled_total";
    /// Submissions that ended in failure.
    pub const ORDERS_FAILED: &str = "orders_failed_total";
    /// Unreal orders detected by the reconciler.
    pub const UNREAL_ORDERS_DETECTED: &str = "unreal_orders_detected_total";

    pub(crate) fn counter_enqueued(item_type: WorkItemType) {
        metrics::counter!(WORK_ITEMS_ENQUEUED, "type" => item_type.as_str()).increment(1);
    }

    pub(crate) fn counter_succeeded(item_type: WorkItemType) {
        metrics::counter!(WORK_ITEMS_SUCCEEDED, "type" => item_type.as_str()).increment(1);
    }

    pub(crate) fn counter_retried(item_type: WorkItemType) {
        metrics::counter!(WORK_ITEMS_RETRIED, "type" => item_type.as_str()).increment(1);
    }

    pub(crate) fn counter_dead_lettered(item_type: WorkItemType) {
        metrics::counter!(WORK_ITEMS_DEAD_LETTERED, "type" => item_type.as_str()).increment(1);
    }

    pub(crate) fn counter_order_submitted(symbol: &str) {
        metrics::counter!(ORDERS_SUBMITTED, "symbol" => symbol.to_string()).increment(1);
    }

    pub(crate) fn counter_order_filled(symbol: &str) {
        metrics::counter!(ORDERS_FILLED, "symbol" => symbol.to_string()).increment(1);
    }

    pub(crate) fn counter_order_failed(kind: &str) {
        metrics::counter!(ORDERS_FAILED, "kind" => kind.to_string()).increment(1);
    }

    pub(crate) fn counter_unreal_detected(count: u64) {
        metrics::counter!(UNREAL_ORDERS_DETECTED).increment(count);
    }
}
