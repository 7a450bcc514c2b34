//! Session record, participant model, and derived read views.
//!
//! `SyncSession` is the unit of state: one record per live session, owned
//! by the primary store and only ever mutated through a CAS on `version`.
//! Derived quantities (`time_remaining_ms`, `server_time_ms`) are never
//! persisted — they are computed on the read path by [`SyncSession::view`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::SyncError;

/// Threshold under which a switch/resume emits a TIME_WARNING fan-out
/// for the incoming active participant (count-down modes).
pub const TIME_WARNING_THRESHOLD_MS: i64 = 30_000;

// ============================================================================
// Enumerations
// ============================================================================

/// Timing mode — governs how elapsed cycle time debits budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Independent budget per participant, ticking only while active.
    PerParticipant,
    /// Fixed budget per turn; nothing carries across a switch.
    PerCycle,
    /// Budgets pooled across participants sharing a `group_id`.
    PerGroup,
    /// One shared clock ticking whenever the session runs.
    Global,
    /// Stopwatch: `time_used_ms` grows; `max_time_ms` caps it if set.
    CountUp,
}

impl SyncMode {
    /// Count-down modes debit a stored budget; `count_up` does not.
    pub fn is_count_down(self) -> bool {
        !matches!(self, SyncMode::CountUp)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PerParticipant => "per_participant",
            Self::PerCycle => "per_cycle",
            Self::PerGroup => "per_group",
            Self::Global => "global",
            Self::CountUp => "count_up",
        };
        write!(f, "{s}")
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Expired,
    Completed,
    Cancelled,
}

impl SyncStatus {
    /// Terminal states reject every mutating operation other than delete.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Expired => "expired",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Participant
// ============================================================================

/// One of the ordered actors in a session. `participant_index` defines the
/// rotation position; budgets are stored, never ticking (clients derive
/// live values from `cycle_started_at`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub participant_index: u32,
    /// Remaining budget in count-down modes (stored, not ticking).
    pub total_time_ms: i64,
    /// Cumulative elapsed time on this participant's clock.
    pub time_used_ms: i64,
    /// Turns taken.
    pub cycle_count: u32,
    /// True iff this participant is on the clock and the session runs.
    pub is_active: bool,
    /// Sticky: once true, stays true.
    pub has_expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Participant as supplied at create / add time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSeed {
    pub participant_id: String,
    pub participant_index: u32,
    #[serde(default)]
    pub total_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl ParticipantSeed {
    pub fn into_participant(self) -> Participant {
        Participant {
            participant_id: self.participant_id,
            participant_index: self.participant_index,
            total_time_ms: self.total_time_ms,
            time_used_ms: 0,
            cycle_count: 0,
            is_active: false,
            has_expired: false,
            group_id: self.group_id,
        }
    }
}

// ============================================================================
// Session record
// ============================================================================

/// The authoritative session record. Every instance holds at most a
/// transient snapshot of this during a request; the primary store owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    pub session_id: Uuid,
    pub sync_mode: SyncMode,
    pub status: SyncStatus,
    /// Monotonically increasing, starts at 1; CAS guard for every write.
    pub version: u64,
    /// Rotation order is the order of this sequence by `participant_index`.
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_participant_id: Option<String>,
    /// Configured total budget across all participants (mode-dependent).
    pub total_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_per_cycle_ms: Option<i64>,
    /// Fischer-style bonus credited to the outgoing participant on switch.
    #[serde(default)]
    pub increment_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<i64>,
    /// Non-null iff `status == running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncSession {
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.participant_id == id)
    }

    pub fn participant_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.participant_id == id)
    }

    /// The participant currently holding the clock, if any.
    pub fn active_participant(&self) -> Option<&Participant> {
        self.active_participant_id
            .as_deref()
            .and_then(|id| self.participant(id))
    }

    /// Re-establish the active-flag rule: `is_active` set iff the participant matches
    /// `active_participant_id` and the session is running.
    pub fn sync_active_flags(&mut self) {
        let running = self.status == SyncStatus::Running;
        let active_id = self.active_participant_id.clone();
        for p in &mut self.participants {
            p.is_active = running && active_id.as_deref() == Some(p.participant_id.as_str());
        }
    }

    /// Recompute the configured session budget from participant budgets.
    /// Only meaningful while the session is still being assembled; the
    /// debit path never touches this field.
    pub fn recompute_total(&mut self) {
        self.total_time_ms = self
            .participants
            .iter()
            .map(|p| p.total_time_ms)
            .fold(0i64, i64::saturating_add);
    }

    /// Elapsed milliseconds of the current cycle, clamped non-negative.
    pub fn cycle_elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        self.cycle_started_at
            .map(|t| (now - t).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    /// Derived read view: attaches `time_remaining_ms` per
    /// participant and the server timestamp, mutating nothing.
    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        let elapsed = if self.status == SyncStatus::Running {
            self.cycle_elapsed_ms(now)
        } else {
            0
        };
        let active_group = self
            .active_participant()
            .and_then(|p| p.group_id.clone());

        let participants = self
            .participants
            .iter()
            .map(|p| {
                let ticking = self.status == SyncStatus::Running
                    && match self.sync_mode {
                        SyncMode::PerParticipant | SyncMode::PerCycle | SyncMode::CountUp => {
                            p.is_active
                        }
                        SyncMode::PerGroup => {
                            active_group.is_some() && p.group_id == active_group
                        }
                        SyncMode::Global => true,
                    };
                let debit = if ticking { elapsed } else { 0 };
                let time_remaining_ms = match self.sync_mode {
                    SyncMode::CountUp => self
                        .max_time_ms
                        .map(|max| (max - p.time_used_ms - debit).max(0))
                        .unwrap_or(0),
                    _ => (p.total_time_ms - debit).max(0),
                };
                ParticipantView {
                    participant: p.clone(),
                    time_remaining_ms,
                }
            })
            .collect();

        SessionView {
            session_id: self.session_id,
            sync_mode: self.sync_mode,
            status: self.status,
            version: self.version,
            participants,
            active_participant_id: self.active_participant_id.clone(),
            total_time_ms: self.total_time_ms,
            time_per_cycle_ms: self.time_per_cycle_ms,
            increment_ms: self.increment_ms,
            max_time_ms: self.max_time_ms,
            cycle_started_at: self.cycle_started_at,
            session_started_at: self.session_started_at,
            session_completed_at: self.session_completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            server_time: now,
            server_time_ms: now.timestamp_millis(),
        }
    }
}

// ============================================================================
// Read views
// ============================================================================

/// Participant with the derived `time_remaining_ms` attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    #[serde(flatten)]
    pub participant: Participant,
    pub time_remaining_ms: i64,
}

/// Session snapshot as it crosses every outbound boundary: the stored
/// record plus derived fields and the server timestamp, so clients can
/// calculate display time rather than count it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub sync_mode: SyncMode,
    pub status: SyncStatus,
    pub version: u64,
    pub participants: Vec<ParticipantView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_participant_id: Option<String>,
    pub total_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_per_cycle_ms: Option<i64>,
    #[serde(default)]
    pub increment_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
    pub server_time_ms: i64,
}

// ============================================================================
// Session configuration (create input)
// ============================================================================

/// Configuration accepted at create time. Mirrors the `POST /sessions`
/// body; the same shape validates inbound requests and seeds the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: Uuid,
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub participants: Vec<ParticipantSeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_per_cycle_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<i64>,
    /// Accepted for wire compatibility; rejected as unsupported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_advance: Option<bool>,
}

impl SessionConfig {
    /// Validate the configuration against the selected mode.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.auto_advance.is_some() {
            return Err(SyncError::Validation(
                "auto_advance is not supported".into(),
            ));
        }
        if self.increment_ms.unwrap_or(0) < 0 {
            return Err(SyncError::Validation("increment_ms must be >= 0".into()));
        }
        if let Some(max) = self.max_time_ms {
            if max <= 0 {
                return Err(SyncError::Validation("max_time_ms must be > 0".into()));
            }
        }
        match self.sync_mode {
            SyncMode::PerCycle => {
                if self.time_per_cycle_ms.unwrap_or(0) <= 0 {
                    return Err(SyncError::Validation(
                        "per_cycle mode requires time_per_cycle_ms > 0".into(),
                    ));
                }
            }
            SyncMode::PerGroup => {
                if self.participants.iter().any(|p| p.group_id.is_none()) {
                    return Err(SyncError::Validation(
                        "per_group mode requires a group_id on every participant".into(),
                    ));
                }
            }
            _ => {}
        }

        let mut ids = HashSet::new();
        let mut indices = HashSet::new();
        for p in &self.participants {
            if p.participant_id.trim().is_empty() {
                return Err(SyncError::Validation(
                    "participant_id must be non-empty".into(),
                ));
            }
            if p.total_time_ms < 0 {
                return Err(SyncError::Validation(format!(
                    "participant {} has negative total_time_ms",
                    p.participant_id
                )));
            }
            if !ids.insert(p.participant_id.clone()) {
                return Err(SyncError::DuplicateParticipant(p.participant_id.clone()));
            }
            if !indices.insert(p.participant_index) {
                return Err(SyncError::Validation(format!(
                    "duplicate participant_index {}",
                    p.participant_index
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(id: &str, idx: u32, ms: i64) -> ParticipantSeed {
        ParticipantSeed {
            participant_id: id.into(),
            participant_index: idx,
            total_time_ms: ms,
            group_id: None,
        }
    }

    fn config(mode: SyncMode) -> SessionConfig {
        SessionConfig {
            session_id: Uuid::new_v4(),
            sync_mode: mode,
            participants: vec![seed("p1", 0, 600_000), seed("p2", 1, 600_000)],
            time_per_cycle_ms: None,
            increment_ms: None,
            max_time_ms: None,
            auto_advance: None,
        }
    }

    #[test]
    fn test_duplicate_participant_id_rejected() {
        let mut cfg = config(SyncMode::PerParticipant);
        cfg.participants.push(seed("p1", 2, 1000));
        assert!(matches!(
            cfg.validate(),
            Err(SyncError::DuplicateParticipant(id)) if id == "p1"
        ));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut cfg = config(SyncMode::PerParticipant);
        cfg.participants.push(seed("p3", 1, 1000));
        assert!(matches!(cfg.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_per_cycle_requires_cycle_budget() {
        let cfg = config(SyncMode::PerCycle);
        assert!(cfg.validate().is_err());

        let mut ok = config(SyncMode::PerCycle);
        ok.time_per_cycle_ms = Some(120_000);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_per_group_requires_group_ids() {
        let cfg = config(SyncMode::PerGroup);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_auto_advance_rejected() {
        let mut cfg = config(SyncMode::PerParticipant);
        cfg.auto_advance = Some(true);
        assert!(matches!(cfg.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_record_serde_round_trip() {
        let cfg = config(SyncMode::PerParticipant);
        let now = Utc::now();
        let session = crate::engine::create(cfg, now).unwrap();
        let json = serde_json::to_string(&session).unwrap();
        let back: SyncSession = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn test_view_attaches_server_time_and_remaining() {
        let cfg = config(SyncMode::PerParticipant);
        let now = Utc::now();
        let session = crate::engine::create(cfg, now).unwrap();
        let view = session.view(now);
        assert_eq!(view.server_time_ms, now.timestamp_millis());
        assert!(view
            .participants
            .iter()
            .all(|p| p.time_remaining_ms == 600_000));
    }
}
