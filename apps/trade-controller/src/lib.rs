// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Trade Controller - Order Execution Core
//!
//! A durable, idempotent work queue combined with an order-execution state
//! machine that submits, monitors, retries, reconciles, and repairs orders
//! against a remote broker.
//!
//! # Architecture
//!
//! - `models`: work items, orders, fills
//! - `queue`: store contract, Turso and in-memory stores, idempotency keys,
//!   per-type backoff, the polling worker
//! - `broker`: broker client port, Alpaca REST adapter, scripted test double
//! - `execution`: validator, expected-outcome prediction, the execution
//!   engine, work item processors, and the reconciler
//! - `error`: broker/transport error classification into retry and recovery
//!   policies
//! - `safety`: kill switch
//! - `resilience`: outbound rate limiting
//! - `events`: injectable trade-event sink
//!
//! Collaborators (store, broker, clock-free timers, event sink) are injected
//! at construction, so property and scenario tests run against an in-memory
//! store and a scripted broker.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Broker client port and adapters.
pub mod broker;

/// Layered configuration.
pub mod config;

/// Error classification.
pub mod error;

/// Trade event port.
pub mod events;

/// Execution engine, validator, processors, reconciler.
pub mod execution;

/// Core data types.
pub mod models;

/// Logging and metrics plumbing.
pub mod observability;

/// Durable work queue.
pub mod queue;

/// Outbound resilience primitives.
pub mod resilience;

/// Kill switch and lifecycle safety.
pub mod safety;

/// Tradable-asset universe cache.
pub mod universe;

pub use broker::{AlpacaClient, AlpacaConfig, AlpacaEnvironment, BrokerClient, BrokerError};
pub use config::ControllerConfig;
pub use error::{ClassifiedError, ErrorKind, RecoveryStrategy};
pub use events::{EventSink, LogEventSink, NoOpEventSink, TradeEvent, TradeEventKind};
pub use execution::{
    EngineConfig, ExecutionEngine, ExecutionReport, OrderDraft, Reconciler, ReconcilerConfig,
};
pub use models::{WorkItem, WorkItemStatus, WorkItemType};
pub use queue::{
    InMemoryStore, QueueWorker, TradeStore, TursoStore, WorkProcessor, WorkQueue, WorkerConfig,
};
pub use safety::KillSwitch;
pub use universe::AssetUniverse;
