//! Wire frames — the single source of truth for every boundary.
//!
//! Three families share this module: the cluster-wide state-change
//! envelope published on `session-updates`, the per-session fan-out
//! messages published on `ws:{session_id}`, and the WebSocket client
//! protocol. All are tagged unions; unknown tags on the wire are logged
//! and ignored, never fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{SessionView, SyncSession};

// ============================================================================
// Coordination-plane envelopes
// ============================================================================

/// Envelope published on the `session-updates` channel after every
/// successful mutation. `state: None` is the tombstone emitted by delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub session_id: Uuid,
    pub state: Option<SyncSession>,
}

/// Out-of-band per-session messages published on `ws:{session_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FanoutMessage {
    TimeWarning {
        participant_id: String,
        time_remaining_ms: i64,
    },
}

/// Event handed from the store subscriber loop to the delivery layer.
/// The subscriber only decodes and forwards; it never performs I/O.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    StateChanged(StateChangeEvent),
    Fanout {
        session_id: Uuid,
        message: FanoutMessage,
    },
}

// ============================================================================
// WebSocket protocol
// ============================================================================

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    Connected {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    StateUpdate {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        state: SessionView,
    },
    StateSync {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        state: SessionView,
    },
    SessionDeleted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    TimeWarning {
        participant_id: String,
        time_remaining_ms: i64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Client → server frames. `RECONNECT` is an alias for `REQUEST_SYNC`
/// kept for older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Ping,
    RequestSync,
    Reconnect,
}
