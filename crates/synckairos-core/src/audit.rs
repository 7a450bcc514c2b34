//! Audit job shapes shared between the engine and the write queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SyncSession;

/// Kind of state transition being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Created,
    Started,
    Switched,
    Paused,
    Resumed,
    Completed,
    Expired,
    ParticipantAdded,
    TimeAdjusted,
    Deleted,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Switched => "switched",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::ParticipantAdded => "participant_added",
            Self::TimeAdjusted => "time_adjusted",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// One unit of work for the audit pipeline: the post-mutation snapshot
/// (None for tombstones) plus optional structured detail, e.g. the
/// operator-supplied reason on a time adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditJob {
    pub session_id: Uuid,
    pub event_type: AuditEventType,
    pub state: Option<SyncSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}
