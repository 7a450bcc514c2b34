//! Storage and audit port traits — implemented by synckairos-redis and
//! synckairos-audit. Core logic depends only on these traits, never on
//! redis or sqlx directly.

use async_trait::async_trait;
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditJob};
use crate::session::SyncSession;
use crate::wire::FanoutMessage;
use crate::Result;

/// Sole gatekeeper of the authoritative session record.
///
/// `update` MUST be serialisable: a scripted read-check-write against the
/// store or a native conditional write. A client-side read-then-write is
/// not an implementation of this trait.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `None` on miss or TTL expiry; `StoreUnavailable` on transport error.
    async fn get(&self, session_id: Uuid) -> Result<Option<SyncSession>>;

    /// Fails with `AlreadyExists` if the key is present. Publishes the
    /// initial snapshot and enqueues the `created` audit job.
    async fn create(&self, session: &SyncSession) -> Result<()>;

    /// Atomic compare-and-swap on `version`: succeeds only if the stored
    /// version equals `expected_version`. On success stores the record
    /// with `version = expected_version + 1`, refreshes the TTL, publishes
    /// the state-change envelope, enqueues the audit job, and returns the
    /// new version. Publish failures are logged, never surfaced — the
    /// store is the source of truth.
    async fn update(
        &self,
        session: &SyncSession,
        expected_version: u64,
        event: AuditEventType,
        detail: Option<serde_json::Value>,
    ) -> Result<u64>;

    /// Removes the record, publishes the tombstone, enqueues the terminal
    /// audit job.
    async fn delete(&self, session_id: Uuid) -> Result<()>;

    /// One-shot, non-durable publish on the per-session fan-out channel.
    async fn publish_fanout(&self, session_id: Uuid, message: &FanoutMessage) -> Result<()>;
}

/// Asynchronous audit pipeline. `enqueue` never blocks the hot path.
pub trait AuditSink: Send + Sync {
    /// Accept a job for background persistence. Saturation drops the job
    /// with an error log rather than blocking the caller.
    fn enqueue(&self, job: AuditJob);

    /// Above the high-water mark: low-priority mutations may be rejected
    /// with `AuditBacklog`. Reads and switches never consult this.
    fn is_backlogged(&self) -> bool;
}

/// Audit sink that discards everything. Dev-mode and test wiring.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn enqueue(&self, _job: AuditJob) {}

    fn is_backlogged(&self) -> bool {
        false
    }
}
