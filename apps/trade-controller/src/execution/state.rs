//! Per-submission execution state.
//!
//! `ExecutionState` is transient: it lives in the engine's active map for the
//! duration of one submission and is removed at the terminal outcome. The
//! durable record is the order mirror in the store.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::ClassifiedError;
use crate::models::{OrderSide, OrderType};

/// Bound on the per-submission error history.
const MAX_RECORDED_ERRORS: usize = 10;

/// Phase of one order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Created, nothing run yet.
    Pending,
    /// Validation in progress.
    Validating,
    /// Submit attempt in flight.
    Submitting,
    /// Broker acknowledged the order.
    Submitted,
    /// Recovery branch after a failed submit.
    Recovering,
    /// Polling the broker for a terminal status.
    Monitoring,
    /// Order filled. Terminal.
    Filled,
    /// Order canceled. Terminal.
    Canceled,
    /// Submission failed. Terminal.
    Failed,
}

impl ExecutionPhase {
    /// Whether this phase ends the submission.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Validating)
                | (Self::Validating, Self::Failed | Self::Submitting)
                | (Self::Submitting, Self::Submitted | Self::Recovering | Self::Failed)
                | (Self::Recovering, Self::Submitted | Self::Failed)
                | (Self::Submitted, Self::Monitoring)
                | (Self::Monitoring, Self::Filled | Self::Canceled | Self::Failed)
        )
    }

    /// Label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Recovering => "recovering",
            Self::Monitoring => "monitoring",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory state for one active submission.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    /// Client order ID (idempotency key).
    pub client_order_id: String,
    /// Broker order ID, once assigned.
    pub broker_order_id: Option<String>,
    /// Symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Requested quantity in shares.
    pub requested_qty: Option<Decimal>,
    /// Requested notional in dollars.
    pub requested_notional: Option<Decimal>,
    /// Cumulative filled quantity.
    pub filled_qty: Decimal,
    /// Requested price (limit or stop), when priced.
    pub requested_price: Option<Decimal>,
    /// Average fill price, once known.
    pub filled_price: Option<Decimal>,
    /// Submit attempts consumed.
    pub attempts: u32,
    /// Submit attempt budget.
    pub max_attempts: u32,
    /// Current phase.
    pub phase: ExecutionPhase,
    /// Classified errors observed during this submission, bounded.
    pub errors: Vec<ClassifiedError>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last phase change or error.
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Create a pending submission state.
    #[must_use]
    pub fn new(
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        requested_qty: Option<Decimal>,
        requested_notional: Option<Decimal>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_order_id: client_order_id.into(),
            broker_order_id: None,
            symbol: symbol.into(),
            side,
            order_type,
            requested_qty,
            requested_notional,
            filled_qty: Decimal::ZERO,
            requested_price: None,
            filled_price: None,
            attempts: 0,
            max_attempts,
            phase: ExecutionPhase::Pending,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance to `next`, ignoring illegal transitions with a warning.
    ///
    /// Illegal transitions indicate an engine bug; the state machine refuses
    /// them rather than corrupting the phase.
    pub fn advance(&mut self, next: ExecutionPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(
                client_order_id = %self.client_order_id,
                from = %self.phase,
                to = %next,
                "Refused illegal execution phase transition"
            );
            return false;
        }
        tracing::debug!(
            client_order_id = %self.client_order_id,
            from = %self.phase,
            to = %next,
            "Execution phase transition"
        );
        self.phase = next;
        self.updated_at = Utc::now();
        true
    }

    /// Record a classified error, keeping at most the most recent
    /// `MAX_RECORDED_ERRORS`.
    pub fn record_error(&mut self, error: ClassifiedError) {
        if self.errors.len() == MAX_RECORDED_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(error);
        self.updated_at = Utc::now();
    }

    /// Most recent classified error.
    #[must_use]
    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.errors.last()
    }
}

/// Per-process registry of active submissions.
#[derive(Debug, Default)]
pub struct ActiveExecutions {
    states: RwLock<HashMap<String, ExecutionState>>,
}

impl ActiveExecutions {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the state for a submission.
    pub fn upsert(&self, state: ExecutionState) {
        if let Ok(mut states) = self.states.write() {
            states.insert(state.client_order_id.clone(), state);
        }
    }

    /// Remove a submission (terminal outcome).
    pub fn remove(&self, client_order_id: &str) {
        if let Ok(mut states) = self.states.write() {
            states.remove(client_order_id);
        }
    }

    /// Snapshot one submission.
    #[must_use]
    pub fn get(&self, client_order_id: &str) -> Option<ExecutionState> {
        self.states
            .read()
            .ok()
            .and_then(|s| s.get(client_order_id).cloned())
    }

    /// Whether a submission with this client order ID is live.
    #[must_use]
    pub fn contains(&self, client_order_id: &str) -> bool {
        self.states
            .read()
            .is_ok_and(|s| s.contains_key(client_order_id))
    }

    /// Number of live submissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no submissions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
