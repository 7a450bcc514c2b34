//! The pure session state machine.
//!
//! Every operation is `(current record, inputs, now) -> Transition` with
//! no hidden state and no I/O; wall-clock reads happen in the caller
//! through the injected [`crate::clock::Clock`]. The service layer wraps
//! each transition in a CAS write, so whatever a function here computes
//! is applied atomically or not at all.

mod rotation;
mod timing;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::AuditEventType;
use crate::error::SyncError;
use crate::session::{
    ParticipantSeed, SessionConfig, SyncMode, SyncSession, SyncStatus, TIME_WARNING_THRESHOLD_MS,
};
use crate::wire::FanoutMessage;
use crate::Result;

/// Outcome of a pure operation: the replacement record, the audit event
/// it maps to, optional structured audit detail, and an optional
/// out-of-band fan-out side effect.
#[derive(Debug, Clone)]
pub struct Transition {
    pub session: SyncSession,
    pub event: AuditEventType,
    pub detail: Option<serde_json::Value>,
    pub warning: Option<FanoutMessage>,
}

impl Transition {
    fn new(session: SyncSession, event: AuditEventType) -> Self {
        Self {
            session,
            event,
            detail: None,
            warning: None,
        }
    }
}

/// What a switch did, for the hot-path response.
#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub previous_participant_id: String,
    pub new_active_participant_id: Option<String>,
    pub expired_participant_id: Option<String>,
}

fn reject_terminal(session: &SyncSession, op: &'static str) -> Result<()> {
    if session.status.is_terminal() {
        return Err(SyncError::InvalidTransition {
            from: session.status,
            op,
        });
    }
    Ok(())
}

fn require_status(session: &SyncSession, wanted: SyncStatus, op: &'static str) -> Result<()> {
    if session.status != wanted {
        return Err(SyncError::InvalidTransition {
            from: session.status,
            op,
        });
    }
    Ok(())
}

/// Time warning for the incoming active participant when a count-down
/// clock is nearly exhausted.
fn warning_for(session: &SyncSession, participant_id: &str) -> Option<FanoutMessage> {
    if !session.sync_mode.is_count_down() {
        return None;
    }
    let p = session.participant(participant_id)?;
    if p.total_time_ms < TIME_WARNING_THRESHOLD_MS {
        Some(FanoutMessage::TimeWarning {
            participant_id: p.participant_id.clone(),
            time_remaining_ms: p.total_time_ms,
        })
    } else {
        None
    }
}

/// Shared expiration path: clamp already happened in the debit; here the
/// session leaves `running` for good. No rotation, no increment.
fn expire(session: &mut SyncSession, now: DateTime<Utc>) {
    session.status = SyncStatus::Expired;
    session.cycle_started_at = None;
    session.updated_at = now;
    session.sync_active_flags();
}

// ============================================================================
// Operations
// ============================================================================

/// Build a fresh record from validated configuration. Status `pending`,
/// version 1; budgets are mode-initialised at `start`, not here, so
/// participants can still be added while pending.
pub fn create(config: SessionConfig, now: DateTime<Utc>) -> Result<SyncSession> {
    config.validate()?;
    let mut participants: Vec<_> = config
        .participants
        .into_iter()
        .map(ParticipantSeed::into_participant)
        .collect();
    participants.sort_by_key(|p| p.participant_index);

    let mut session = SyncSession {
        session_id: config.session_id,
        sync_mode: config.sync_mode,
        status: SyncStatus::Pending,
        version: 1,
        participants,
        active_participant_id: None,
        total_time_ms: 0,
        time_per_cycle_ms: config.time_per_cycle_ms,
        increment_ms: config.increment_ms.unwrap_or(0),
        max_time_ms: config.max_time_ms,
        cycle_started_at: None,
        session_started_at: None,
        session_completed_at: None,
        created_at: now,
        updated_at: now,
    };
    session.recompute_total();
    Ok(session)
}

/// `pending -> running`. Picks the first participant by rotation index
/// when no active participant was preselected, establishes mode budgets,
/// and opens the first cycle.
pub fn start(session: &SyncSession, now: DateTime<Utc>) -> Result<Transition> {
    require_status(session, SyncStatus::Pending, "start")?;
    if session.participants.is_empty() {
        return Err(SyncError::Validation(
            "cannot start a session with no participants".into(),
        ));
    }

    let mut next = session.clone();
    timing::initialize_budgets(&mut next);

    let active_id = match &next.active_participant_id {
        Some(id) => {
            next.participant(id)
                .ok_or_else(|| SyncError::Validation(format!("unknown active participant {id}")))?;
            id.clone()
        }
        None => {
            let mut ordered: Vec<_> = next.participants.iter().collect();
            ordered.sort_by_key(|p| p.participant_index);
            ordered[0].participant_id.clone()
        }
    };

    next.status = SyncStatus::Running;
    next.active_participant_id = Some(active_id.clone());
    next.session_started_at = Some(now);
    next.cycle_started_at = Some(now);
    next.updated_at = now;
    next.sync_active_flags();

    let warning = warning_for(&next, &active_id);
    Ok(Transition {
        session: next,
        event: AuditEventType::Started,
        detail: None,
        warning,
    })
}

/// The hot path. One debit, one rotation, one CAS
/// in the caller. On a zero crossing the session expires in place: no
/// rotation and no Fischer credit.
pub fn switch(
    session: &SyncSession,
    expected_current: Option<&str>,
    expected_next: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(Transition, SwitchOutcome)> {
    require_status(session, SyncStatus::Running, "switch")?;

    let active_id = session
        .active_participant_id
        .clone()
        .ok_or_else(|| SyncError::Internal(anyhow::anyhow!("running session has no active participant")))?;

    if let Some(expected) = expected_current {
        if expected != active_id {
            return Err(SyncError::StaleActor {
                expected: Some(expected.to_string()),
                actual: Some(active_id),
            });
        }
    }

    let elapsed = session.cycle_elapsed_ms(now);
    let mut next = session.clone();
    let debit = timing::debit_active(&mut next, &active_id, elapsed);

    if debit.expired {
        expire(&mut next, now);
        let outcome = SwitchOutcome {
            previous_participant_id: active_id.clone(),
            new_active_participant_id: None,
            expired_participant_id: Some(active_id.clone()),
        };
        let mut t = Transition::new(next, AuditEventType::Expired);
        t.detail = Some(json!({ "expired_participant_id": active_id, "elapsed_ms": elapsed }));
        return Ok((t, outcome));
    }

    let incoming = match expected_next {
        Some(id) => {
            let p = next
                .participant(id)
                .ok_or_else(|| SyncError::Validation(format!("unknown next participant {id}")))?;
            if p.has_expired {
                return Err(SyncError::Validation(format!(
                    "next participant {id} has expired"
                )));
            }
            Some(id.to_string())
        }
        None => rotation::next_participant(&next, &active_id),
    };

    if let Some(p) = next.participant_mut(&active_id) {
        p.cycle_count += 1;
    }

    let Some(incoming) = incoming else {
        // Everyone else has expired: the current participant wins.
        next.status = SyncStatus::Completed;
        next.session_completed_at = Some(now);
        next.cycle_started_at = None;
        next.updated_at = now;
        next.sync_active_flags();
        let outcome = SwitchOutcome {
            previous_participant_id: active_id.clone(),
            new_active_participant_id: None,
            expired_participant_id: None,
        };
        let mut t = Transition::new(next, AuditEventType::Completed);
        t.detail = Some(json!({ "winner_participant_id": active_id }));
        return Ok((t, outcome));
    };

    timing::credit_increment(&mut next, &active_id);
    timing::reset_cycle_budgets(&mut next, &active_id, &incoming);

    next.active_participant_id = Some(incoming.clone());
    next.cycle_started_at = Some(now);
    next.updated_at = now;
    next.sync_active_flags();

    let warning = warning_for(&next, &incoming);
    let outcome = SwitchOutcome {
        previous_participant_id: active_id.clone(),
        new_active_participant_id: Some(incoming.clone()),
        expired_participant_id: None,
    };
    let t = Transition {
        session: next,
        event: AuditEventType::Switched,
        detail: Some(json!({ "from": active_id, "to": incoming, "elapsed_ms": elapsed })),
        warning,
    };
    Ok((t, outcome))
}

/// `running -> paused`. The cycle's elapsed time is debited now so the
/// stored budgets stay truthful while the clock is stopped. A debit that
/// crosses zero takes the expiration path instead of pausing.
pub fn pause(session: &SyncSession, now: DateTime<Utc>) -> Result<Transition> {
    require_status(session, SyncStatus::Running, "pause")?;

    let active_id = session
        .active_participant_id
        .clone()
        .ok_or_else(|| SyncError::Internal(anyhow::anyhow!("running session has no active participant")))?;
    let elapsed = session.cycle_elapsed_ms(now);

    let mut next = session.clone();
    let debit = timing::debit_active(&mut next, &active_id, elapsed);
    if debit.expired {
        expire(&mut next, now);
        let mut t = Transition::new(next, AuditEventType::Expired);
        t.detail = Some(json!({ "expired_participant_id": active_id, "elapsed_ms": elapsed }));
        return Ok(t);
    }

    next.status = SyncStatus::Paused;
    next.cycle_started_at = None;
    next.updated_at = now;
    next.sync_active_flags();
    let mut t = Transition::new(next, AuditEventType::Paused);
    t.detail = Some(json!({ "elapsed_ms": elapsed }));
    Ok(t)
}

/// `paused -> running`: a fresh cycle opens for the retained active
/// participant.
pub fn resume(session: &SyncSession, now: DateTime<Utc>) -> Result<Transition> {
    require_status(session, SyncStatus::Paused, "resume")?;

    let active_id = session
        .active_participant_id
        .clone()
        .ok_or_else(|| SyncError::Internal(anyhow::anyhow!("paused session has no active participant")))?;

    let mut next = session.clone();
    next.status = SyncStatus::Running;
    next.cycle_started_at = Some(now);
    next.updated_at = now;
    next.sync_active_flags();

    let warning = warning_for(&next, &active_id);
    Ok(Transition {
        session: next,
        event: AuditEventType::Resumed,
        detail: None,
        warning,
    })
}

/// `running | paused -> completed`.
pub fn complete(session: &SyncSession, now: DateTime<Utc>) -> Result<Transition> {
    if !matches!(session.status, SyncStatus::Running | SyncStatus::Paused) {
        return Err(SyncError::InvalidTransition {
            from: session.status,
            op: "complete",
        });
    }
    let mut next = session.clone();
    next.status = SyncStatus::Completed;
    next.session_completed_at = Some(now);
    next.cycle_started_at = None;
    next.updated_at = now;
    next.sync_active_flags();
    Ok(Transition::new(next, AuditEventType::Completed))
}

/// Append a participant while the session is still `pending`.
pub fn add_participant(
    session: &SyncSession,
    seed: ParticipantSeed,
    now: DateTime<Utc>,
) -> Result<Transition> {
    require_status(session, SyncStatus::Pending, "add_participant")?;

    if seed.participant_id.trim().is_empty() {
        return Err(SyncError::Validation("participant_id must be non-empty".into()));
    }
    if seed.total_time_ms < 0 {
        return Err(SyncError::Validation("total_time_ms must be >= 0".into()));
    }
    if session.participant(&seed.participant_id).is_some() {
        return Err(SyncError::DuplicateParticipant(seed.participant_id));
    }
    if session
        .participants
        .iter()
        .any(|p| p.participant_index == seed.participant_index)
    {
        return Err(SyncError::Validation(format!(
            "duplicate participant_index {}",
            seed.participant_index
        )));
    }
    if session.sync_mode == SyncMode::PerGroup && seed.group_id.is_none() {
        return Err(SyncError::Validation(
            "per_group mode requires a group_id on every participant".into(),
        ));
    }

    let mut next = session.clone();
    let added_id = seed.participant_id.clone();
    next.participants.push(seed.into_participant());
    next.participants.sort_by_key(|p| p.participant_index);
    next.recompute_total();
    next.updated_at = now;

    let mut t = Transition::new(next, AuditEventType::ParticipantAdded);
    t.detail = Some(json!({ "participant_id": added_id }));
    Ok(t)
}

/// Operator correction of a participant's stored budget. Requires a
/// reason; the reason travels with the audit record. In pooled modes the
/// new value is mirrored across the pool.
pub fn adjust_time(
    session: &SyncSession,
    participant_id: &str,
    total_time_ms: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Transition> {
    reject_terminal(session, "adjust_time")?;
    if reason.trim().is_empty() {
        return Err(SyncError::Validation(
            "adjust_time requires a non-empty reason".into(),
        ));
    }
    if total_time_ms < 0 {
        return Err(SyncError::Validation("total_time_ms must be >= 0".into()));
    }
    session
        .participant(participant_id)
        .ok_or_else(|| SyncError::ParticipantNotFound(participant_id.to_string()))?;

    let mut next = session.clone();
    match next.sync_mode {
        SyncMode::PerGroup => {
            let group = next
                .participant(participant_id)
                .and_then(|p| p.group_id.clone());
            for p in &mut next.participants {
                if p.group_id == group {
                    p.total_time_ms = total_time_ms;
                }
            }
        }
        SyncMode::Global => {
            for p in &mut next.participants {
                p.total_time_ms = total_time_ms;
            }
        }
        _ => {
            if let Some(p) = next.participant_mut(participant_id) {
                p.total_time_ms = total_time_ms;
            }
        }
    }
    next.updated_at = now;

    let mut t = Transition::new(next, AuditEventType::TimeAdjusted);
    t.detail = Some(json!({
        "participant_id": participant_id,
        "total_time_ms": total_time_ms,
        "reason": reason,
    }));
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ParticipantSeed, SessionConfig};
    use chrono::Duration;
    use uuid::Uuid;

    fn seed(id: &str, idx: u32, ms: i64) -> ParticipantSeed {
        ParticipantSeed {
            participant_id: id.into(),
            participant_index: idx,
            total_time_ms: ms,
            group_id: None,
        }
    }

    fn chess_config() -> SessionConfig {
        SessionConfig {
            session_id: Uuid::new_v4(),
            sync_mode: SyncMode::PerParticipant,
            participants: vec![seed("p1", 0, 600_000), seed("p2", 1, 600_000)],
            time_per_cycle_ms: None,
            increment_ms: Some(3_000),
            max_time_ms: None,
            auto_advance: None,
        }
    }

    fn started(config: SessionConfig, now: DateTime<Utc>) -> SyncSession {
        let s = create(config, now).unwrap();
        start(&s, now).unwrap().session
    }

    #[test]
    fn test_create_is_pending_version_one() {
        let now = Utc::now();
        let s = create(chess_config(), now).unwrap();
        assert_eq!(s.status, SyncStatus::Pending);
        assert_eq!(s.version, 1);
        assert_eq!(s.total_time_ms, 1_200_000);
        assert!(s.active_participant_id.is_none());
        assert!(s.cycle_started_at.is_none());
    }

    #[test]
    fn test_start_activates_first_by_index() {
        let now = Utc::now();
        let s = started(chess_config(), now);
        assert_eq!(s.status, SyncStatus::Running);
        assert_eq!(s.active_participant_id.as_deref(), Some("p1"));
        assert_eq!(s.cycle_started_at, Some(now));
        assert_eq!(s.session_started_at, Some(now));
        assert!(s.participant("p1").unwrap().is_active);
        assert!(!s.participant("p2").unwrap().is_active);
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let now = Utc::now();
        let s = started(chess_config(), now);
        assert!(matches!(
            start(&s, now),
            Err(SyncError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_start_without_participants_rejected() {
        let now = Utc::now();
        let mut cfg = chess_config();
        cfg.participants.clear();
        let s = create(cfg, now).unwrap();
        assert!(matches!(start(&s, now), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_switch_rotates_debits_and_credits() {
        let t0 = Utc::now();
        let s = started(chess_config(), t0);
        let t1 = t0 + Duration::milliseconds(5_000);

        let (tr, outcome) = switch(&s, None, None, t1).unwrap();
        assert_eq!(outcome.previous_participant_id, "p1");
        assert_eq!(outcome.new_active_participant_id.as_deref(), Some("p2"));
        assert!(outcome.expired_participant_id.is_none());

        let s2 = tr.session;
        assert_eq!(s2.active_participant_id.as_deref(), Some("p2"));
        assert_eq!(s2.cycle_started_at, Some(t1));
        let p1 = s2.participant("p1").unwrap();
        // 600_000 - 5_000 elapsed + 3_000 Fischer.
        assert_eq!(p1.total_time_ms, 598_000);
        assert_eq!(p1.cycle_count, 1);
        assert!(!p1.is_active);
        assert!(s2.participant("p2").unwrap().is_active);
        assert_eq!(tr.event, AuditEventType::Switched);
    }

    #[test]
    fn test_switch_stale_actor() {
        let t0 = Utc::now();
        let s = started(chess_config(), t0);
        let err = switch(&s, Some("p2"), None, t0).unwrap_err();
        assert!(matches!(err, SyncError::StaleActor { .. }));
    }

    #[test]
    fn test_switch_honours_caller_supplied_next() {
        let t0 = Utc::now();
        let mut cfg = chess_config();
        cfg.participants.push(seed("p3", 2, 600_000));
        let s = started(cfg, t0);
        let (tr, outcome) = switch(&s, None, Some("p3"), t0).unwrap();
        assert_eq!(outcome.new_active_participant_id.as_deref(), Some("p3"));
        assert_eq!(tr.session.active_participant_id.as_deref(), Some("p3"));
    }

    #[test]
    fn test_switch_rejects_expired_next() {
        let t0 = Utc::now();
        let s = {
            let mut s = started(chess_config(), t0);
            s.participant_mut("p2").unwrap().has_expired = true;
            s
        };
        assert!(matches!(
            switch(&s, None, Some("p2"), t0),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_switch_zero_crossing_expires_without_rotation_or_credit() {
        let t0 = Utc::now();
        let mut cfg = chess_config();
        cfg.participants[0].total_time_ms = 100;
        let s = started(cfg, t0);
        let t1 = t0 + Duration::milliseconds(200);

        let (tr, outcome) = switch(&s, None, None, t1).unwrap();
        let s2 = tr.session;
        assert_eq!(s2.status, SyncStatus::Expired);
        assert_eq!(outcome.expired_participant_id.as_deref(), Some("p1"));
        assert!(outcome.new_active_participant_id.is_none());
        let p1 = s2.participant("p1").unwrap();
        assert!(p1.has_expired);
        // Clamped to zero, and no Fischer credit on the crossing.
        assert_eq!(p1.total_time_ms, 0);
        assert!(s2.cycle_started_at.is_none());
        assert!(s2.participants.iter().all(|p| !p.is_active));
        assert_eq!(tr.event, AuditEventType::Expired);
    }

    #[test]
    fn test_switch_last_unexpired_participant_wins() {
        let t0 = Utc::now();
        let s = {
            let mut s = started(chess_config(), t0);
            s.participant_mut("p2").unwrap().has_expired = true;
            s
        };
        let (tr, outcome) = switch(&s, None, None, t0).unwrap();
        assert_eq!(tr.session.status, SyncStatus::Completed);
        assert_eq!(tr.session.session_completed_at, Some(t0));
        assert!(outcome.new_active_participant_id.is_none());
        assert_eq!(tr.event, AuditEventType::Completed);
    }

    #[test]
    fn test_pause_debits_and_resume_reopens_cycle() {
        let t0 = Utc::now();
        let s = started(chess_config(), t0);
        let t1 = t0 + Duration::milliseconds(10_000);

        let paused = pause(&s, t1).unwrap().session;
        assert_eq!(paused.status, SyncStatus::Paused);
        assert!(paused.cycle_started_at.is_none());
        assert_eq!(paused.participant("p1").unwrap().total_time_ms, 590_000);
        // Paused: nobody is on the clock.
        assert!(paused.participants.iter().all(|p| !p.is_active));
        // The active id is retained for resume.
        assert_eq!(paused.active_participant_id.as_deref(), Some("p1"));

        let t2 = t1 + Duration::milliseconds(60_000);
        let resumed = resume(&paused, t2).unwrap().session;
        assert_eq!(resumed.status, SyncStatus::Running);
        assert_eq!(resumed.cycle_started_at, Some(t2));
        // The pause gap did not cost anything.
        assert_eq!(resumed.participant("p1").unwrap().total_time_ms, 590_000);
        assert!(resumed.participant("p1").unwrap().is_active);
    }

    #[test]
    fn test_pause_across_zero_takes_expiration_path() {
        let t0 = Utc::now();
        let mut cfg = chess_config();
        cfg.participants[0].total_time_ms = 50;
        let s = started(cfg, t0);
        let tr = pause(&s, t0 + Duration::milliseconds(500)).unwrap();
        assert_eq!(tr.session.status, SyncStatus::Expired);
        assert!(tr.session.participant("p1").unwrap().has_expired);
    }

    #[test]
    fn test_complete_from_running_and_paused() {
        let t0 = Utc::now();
        let s = started(chess_config(), t0);
        let done = complete(&s, t0).unwrap().session;
        assert_eq!(done.status, SyncStatus::Completed);
        assert_eq!(done.session_completed_at, Some(t0));
        assert!(done.cycle_started_at.is_none());

        let paused = pause(&s, t0).unwrap().session;
        assert_eq!(
            complete(&paused, t0).unwrap().session.status,
            SyncStatus::Completed
        );
    }

    #[test]
    fn test_terminal_sessions_reject_mutation() {
        let t0 = Utc::now();
        let s = started(chess_config(), t0);
        let done = complete(&s, t0).unwrap().session;
        for err in [
            switch(&done, None, None, t0).map(|_| ()),
            pause(&done, t0).map(|_| ()),
            resume(&done, t0).map(|_| ()),
            complete(&done, t0).map(|_| ()),
            adjust_time(&done, "p1", 1_000, "ref decision", t0).map(|_| ()),
        ] {
            assert!(matches!(err, Err(SyncError::InvalidTransition { .. })));
        }
    }

    #[test]
    fn test_add_participant_pending_only() {
        let now = Utc::now();
        let s = create(chess_config(), now).unwrap();
        let grown = add_participant(&s, seed("p3", 2, 300_000), now)
            .unwrap()
            .session;
        assert_eq!(grown.participants.len(), 3);
        assert_eq!(grown.total_time_ms, 1_500_000);

        let running = started(chess_config(), now);
        assert!(matches!(
            add_participant(&running, seed("p4", 3, 1), now),
            Err(SyncError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_add_participant_rejects_duplicates() {
        let now = Utc::now();
        let s = create(chess_config(), now).unwrap();
        assert!(matches!(
            add_participant(&s, seed("p1", 5, 1), now),
            Err(SyncError::DuplicateParticipant(_))
        ));
        assert!(matches!(
            add_participant(&s, seed("p9", 1, 1), now),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_adjust_time_requires_reason() {
        let now = Utc::now();
        let s = started(chess_config(), now);
        assert!(matches!(
            adjust_time(&s, "p1", 30_000, "  ", now),
            Err(SyncError::Validation(_))
        ));
        let adjusted = adjust_time(&s, "p1", 30_000, "clock misread at setup", now)
            .unwrap()
            .session;
        assert_eq!(adjusted.participant("p1").unwrap().total_time_ms, 30_000);
    }

    #[test]
    fn test_adjust_time_unknown_participant() {
        let now = Utc::now();
        let s = started(chess_config(), now);
        assert!(matches!(
            adjust_time(&s, "ghost", 1, "why", now),
            Err(SyncError::ParticipantNotFound(_))
        ));
    }

    #[test]
    fn test_switch_emits_time_warning_when_incoming_is_low() {
        let t0 = Utc::now();
        let mut cfg = chess_config();
        cfg.participants[1].total_time_ms = 10_000;
        cfg.increment_ms = None;
        let s = started(cfg, t0);
        let (tr, _) = switch(&s, None, None, t0).unwrap();
        match tr.warning {
            Some(FanoutMessage::TimeWarning {
                ref participant_id,
                time_remaining_ms,
            }) => {
                assert_eq!(participant_id, "p2");
                assert_eq!(time_remaining_ms, 10_000);
            }
            other => panic!("expected a time warning, got {other:?}"),
        }
    }
}
