//! Asynchronous audit pipeline.
//!
//! The engine hands finished transitions to [`AuditQueue::enqueue`] and
//! moves on — nothing on the hot path waits for Postgres. A worker pool
//! drains the queue, upserting the per-session summary and appending to
//! the event log, retrying transient failures with exponential backoff
//! and dead-lettering poison jobs. The audit store is recovery-only and
//! never read on the hot path.

pub mod queue;
pub mod repository;

pub use queue::{AuditQueue, AuditStats, AuditWorkerPool, AuditWriteError, AuditWriter};
pub use repository::AuditRepository;
