//! Durable work item types for the deferred-work queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default retry budget for a work item.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Kind of deferred work a queue item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemType {
    /// Submit an order through the execution engine.
    OrderSubmit,
    /// Cancel a broker order.
    OrderCancel,
    /// Sync the broker order book into local state.
    OrderSync,
    /// Close a position (delegated to strategy collaborators).
    PositionClose,
    /// Cancel everything and optionally flatten positions.
    KillSwitch,
    /// Evaluate a strategy decision (delegated to strategy collaborators).
    DecisionEvaluation,
    /// Refresh the tradable-asset universe cache.
    AssetUniverseSync,
}

impl WorkItemType {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderSubmit => "ORDER_SUBMIT",
            Self::OrderCancel => "ORDER_CANCEL",
            Self::OrderSync => "ORDER_SYNC",
            Self::PositionClose => "POSITION_CLOSE",
            Self::KillSwitch => "KILL_SWITCH",
            Self::DecisionEvaluation => "DECISION_EVALUATION",
            Self::AssetUniverseSync => "ASSET_UNIVERSE_SYNC",
        }
    }

    /// All known work item types.
    #[must_use]
    pub const fn all() -> [Self; 7] {
        [
            Self::OrderSubmit,
            Self::OrderCancel,
            Self::OrderSync,
            Self::PositionClose,
            Self::KillSwitch,
            Self::DecisionEvaluation,
            Self::AssetUniverseSync,
        ]
    }
}

impl std::fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER_SUBMIT" => Ok(Self::OrderSubmit),
            "ORDER_CANCEL" => Ok(Self::OrderCancel),
            "ORDER_SYNC" => Ok(Self::OrderSync),
            "POSITION_CLOSE" => Ok(Self::PositionClose),
            "KILL_SWITCH" => Ok(Self::KillSwitch),
            "DECISION_EVALUATION" => Ok(Self::DecisionEvaluation),
            "ASSET_UNIVERSE_SYNC" => Ok(Self::AssetUniverseSync),
            _ => Err(format!("unknown work item type: {s}")),
        }
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemStatus {
    /// Waiting to be claimed once `next_run_at` is due.
    Pending,
    /// Held by exactly one worker.
    Claimed,
    /// Processed successfully. Terminal.
    Succeeded,
    /// Retry budget exhausted or failure was permanent. Terminal until an
    /// operator retries it.
    DeadLetter,
}

impl WorkItemStatus {
    /// Returns true for terminal statuses.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLetter)
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Succeeded => "SUCCEEDED",
            Self::DeadLetter => "DEAD_LETTER",
        }
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CLAIMED" => Ok(Self::Claimed),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "DEAD_LETTER" => Ok(Self::DeadLetter),
            _ => Err(format!("unknown work item status: {s}")),
        }
    }
}

/// A durable unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier.
    pub id: String,
    /// What kind of work this item carries.
    pub item_type: WorkItemType,
    /// Serialized request for the processor.
    pub payload: serde_json::Value,
    /// 32-char fingerprint; when present, enqueue deduplicates on it.
    pub idempotency_key: Option<String>,
    /// Lifecycle status.
    pub status: WorkItemStatus,
    /// Attempts consumed so far.
    pub attempts: u32,
    /// Retry budget.
    pub max_attempts: u32,
    /// Earliest wall-clock time this item may be claimed.
    pub next_run_at: DateTime<Utc>,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// Small result blob from a successful run.
    pub result: Option<String>,
    /// Broker order ID populated by ORDER_SUBMIT on success.
    pub broker_order_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a pending work item due immediately.
    #[must_use]
    pub fn new(item_type: WorkItemType, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_type,
            payload,
            idempotency_key: None,
            status: WorkItemStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_run_at: now,
            last_error: None,
            result: None,
            broker_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay the first run.
    #[must_use]
    pub const fn with_next_run_at(mut self, next_run_at: DateTime<Utc>) -> Self {
        self.next_run_at = next_run_at;
        self
    }
}

/// Outcome status of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Attempt is in flight.
    Running,
    /// Attempt completed successfully.
    Succeeded,
    /// Attempt failed.
    Failed,
}

impl RunStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("unknown run status: {s}")),
        }
    }
}

/// Append-only log entry for one processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemRun {
    /// Row identifier (store-assigned).
    pub id: i64,
    /// Work item this attempt belongs to.
    pub work_item_id: String,
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Attempt status.
    pub status: RunStatus,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
}
