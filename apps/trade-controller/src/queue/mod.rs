//! Durable, idempotent work queue.

pub mod backoff;
pub mod idempotency;
mod memory;
mod store;
mod turso;
mod worker;

pub use memory::InMemoryStore;
pub use store::{StoreError, TradeStore, WorkItemPatch};
pub use turso::TursoStore;
pub use worker::{
    ProcessorError, ProcessorOutcome, QueueWorker, WorkProcessor, WorkQueue, WorkerConfig,
};
