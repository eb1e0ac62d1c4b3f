//! Core data types shared across the execution core.

mod order;
mod work_item;

pub use order::{
    FillRecord, OrderClass, OrderRecord, OrderSide, OrderStatus, OrderType, TimeInForce,
    parse_order_status,
};
pub use work_item::{
    DEFAULT_MAX_ATTEMPTS, RunStatus, WorkItem, WorkItemRun, WorkItemStatus, WorkItemType,
};

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
///
/// Fixed-width RFC 3339 UTC with microsecond precision so stored values
/// compare correctly as text.
#[must_use]
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, falling back to the epoch on malformed input.
#[must_use]
pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map_or_else(|_| DateTime::<Utc>::UNIX_EPOCH, |dt| dt.with_timezone(&Utc))
}
