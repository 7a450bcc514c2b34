//! Rotation: who is next on the clock.

use crate::session::SyncSession;

/// Next participant by ascending `participant_index`, wrapping modulo the
/// participant count, skipping anyone with `has_expired = true`. `None`
/// when no other unexpired participant remains.
pub(crate) fn next_participant(session: &SyncSession, current_id: &str) -> Option<String> {
    let mut ordered: Vec<&crate::session::Participant> = session.participants.iter().collect();
    ordered.sort_by_key(|p| p.participant_index);

    let pos = ordered
        .iter()
        .position(|p| p.participant_id == current_id)?;

    let n = ordered.len();
    for step in 1..=n {
        let candidate = ordered[(pos + step) % n];
        if candidate.participant_id == current_id {
            continue;
        }
        if !candidate.has_expired {
            return Some(candidate.participant_id.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ParticipantSeed, SessionConfig, SyncMode};
    use chrono::Utc;
    use uuid::Uuid;

    fn session(ids: &[(&str, u32)]) -> SyncSession {
        let cfg = SessionConfig {
            session_id: Uuid::new_v4(),
            sync_mode: SyncMode::PerParticipant,
            participants: ids
                .iter()
                .map(|(id, idx)| ParticipantSeed {
                    participant_id: (*id).into(),
                    participant_index: *idx,
                    total_time_ms: 60_000,
                    group_id: None,
                })
                .collect(),
            time_per_cycle_ms: None,
            increment_ms: None,
            max_time_ms: None,
            auto_advance: None,
        };
        crate::engine::create(cfg, Utc::now()).unwrap()
    }

    #[test]
    fn test_rotation_follows_index_order() {
        let s = session(&[("p1", 0), ("p2", 1), ("p3", 2)]);
        assert_eq!(next_participant(&s, "p1").as_deref(), Some("p2"));
        assert_eq!(next_participant(&s, "p2").as_deref(), Some("p3"));
        assert_eq!(next_participant(&s, "p3").as_deref(), Some("p1"));
    }

    #[test]
    fn test_rotation_order_is_by_index_not_insertion() {
        let s = session(&[("z", 2), ("a", 0), ("m", 1)]);
        assert_eq!(next_participant(&s, "a").as_deref(), Some("m"));
        assert_eq!(next_participant(&s, "z").as_deref(), Some("a"));
    }

    #[test]
    fn test_rotation_skips_expired() {
        let mut s = session(&[("p1", 0), ("p2", 1), ("p3", 2)]);
        s.participant_mut("p2").unwrap().has_expired = true;
        assert_eq!(next_participant(&s, "p1").as_deref(), Some("p3"));
    }

    #[test]
    fn test_no_candidate_when_all_others_expired() {
        let mut s = session(&[("p1", 0), ("p2", 1)]);
        s.participant_mut("p2").unwrap().has_expired = true;
        assert_eq!(next_participant(&s, "p1"), None);
    }

    #[test]
    fn test_single_participant_has_no_next() {
        let s = session(&[("solo", 0)]);
        assert_eq!(next_participant(&s, "solo"), None);
    }
}
