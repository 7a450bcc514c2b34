//! Error taxonomy for the session core.
//! Every boundary (REST, WebSocket) maps these kinds to its own codes;
//! the engine itself never swallows an error or guesses intent.

use thiserror::Error;
use uuid::Uuid;

use crate::session::SyncStatus;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or inconsistent input. Never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Session absent from the primary store (miss or TTL expiry).
    #[error("session not found: {0}")]
    NotFound(Uuid),

    /// Create collided with an existing session record.
    #[error("session already exists: {0}")]
    AlreadyExists(Uuid),

    /// A participant id or rotation index is already taken.
    #[error("duplicate participant: {0}")]
    DuplicateParticipant(String),

    /// Referenced participant is not a member of the session.
    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    /// Operation not permitted in the session's current status.
    #[error("invalid transition: cannot {op} while {from}")]
    InvalidTransition { from: SyncStatus, op: &'static str },

    /// CAS version mismatch on write. Retried a bounded number of times
    /// by the service when the caller did not pin a version.
    #[error("concurrency conflict: expected version {expected}, actual {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    /// Caller-supplied current participant disagrees with the
    /// authoritative `active_participant_id`.
    #[error("stale actor: expected {expected:?}, actual {actual:?}")]
    StaleActor {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Primary-store transport failure. Surfaced to the caller untouched;
    /// the engine never retries these.
    #[error("primary store unavailable: {0}")]
    StoreUnavailable(String),

    /// Audit queue above its high-water mark. Never fails reads or
    /// switches; may reject low-priority mutations.
    #[error("audit queue backlogged")]
    AuditBacklog,

    /// Unexpected failure. Logged with context at the boundary.
    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// HTTP status the REST boundary maps each kind to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) | Self::ParticipantNotFound(_) => 404,
            Self::AlreadyExists(_)
            | Self::DuplicateParticipant(_)
            | Self::InvalidTransition { .. }
            | Self::ConcurrencyConflict { .. }
            | Self::StaleActor { .. } => 409,
            Self::StoreUnavailable(_) | Self::AuditBacklog => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Short machine-readable code carried in error bodies and frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound(_) => "SESSION_NOT_FOUND",
            Self::ParticipantNotFound(_) => "PARTICIPANT_NOT_FOUND",
            Self::AlreadyExists(_) => "SESSION_EXISTS",
            Self::DuplicateParticipant(_) => "DUPLICATE_PARTICIPANT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::StaleActor { .. } => "STALE_ACTOR",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::AuditBacklog => "AUDIT_BACKLOG",
            Self::Internal(_) => "INTERNAL",
        }
    }
}
