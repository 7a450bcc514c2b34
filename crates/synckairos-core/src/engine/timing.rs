//! Mode-specific time accounting: budget initialisation at start and the
//! debit applied when a cycle ends (switch, pause) or crosses zero.

use crate::session::{SyncMode, SyncSession};

/// Result of applying a cycle debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DebitOutcome {
    /// The active clock (or its pool) hit zero in this debit.
    pub expired: bool,
}

/// Establish the stored budgets the mode requires at session start.
///
/// - `per_cycle`: every participant gets the fixed per-turn budget.
/// - `per_group`: each group's pool is the sum of its members' seeded
///   budgets, mirrored onto every member so any row shows the pool.
/// - `global`: one pool over all participants, mirrored the same way.
pub(crate) fn initialize_budgets(session: &mut SyncSession) {
    match session.sync_mode {
        SyncMode::PerCycle => {
            let per_cycle = session.time_per_cycle_ms.unwrap_or(0);
            for p in &mut session.participants {
                p.total_time_ms = per_cycle;
            }
        }
        SyncMode::PerGroup => {
            let groups: Vec<Option<String>> = session
                .participants
                .iter()
                .map(|p| p.group_id.clone())
                .collect();
            let mut pools: Vec<(Option<String>, i64)> = Vec::new();
            for g in groups {
                if !pools.iter().any(|(k, _)| *k == g) {
                    let sum = session
                        .participants
                        .iter()
                        .filter(|p| p.group_id == g)
                        .map(|p| p.total_time_ms)
                        .fold(0i64, i64::saturating_add);
                    pools.push((g, sum));
                }
            }
            for p in &mut session.participants {
                if let Some((_, pool)) = pools.iter().find(|(k, _)| *k == p.group_id) {
                    p.total_time_ms = *pool;
                }
            }
        }
        SyncMode::Global => {
            let pool = session
                .participants
                .iter()
                .map(|p| p.total_time_ms)
                .fold(0i64, i64::saturating_add);
            for p in &mut session.participants {
                p.total_time_ms = pool;
            }
        }
        SyncMode::PerParticipant | SyncMode::CountUp => {}
    }
}

/// Participant ids sharing the active participant's budget pool.
fn pool_member_ids(session: &SyncSession, active_id: &str) -> Vec<String> {
    match session.sync_mode {
        SyncMode::PerGroup => {
            let group = session
                .participant(active_id)
                .and_then(|p| p.group_id.clone());
            session
                .participants
                .iter()
                .filter(|p| p.group_id == group)
                .map(|p| p.participant_id.clone())
                .collect()
        }
        SyncMode::Global => session
            .participants
            .iter()
            .map(|p| p.participant_id.clone())
            .collect(),
        _ => vec![active_id.to_string()],
    }
}

/// Debit `elapsed_ms` from the active participant's clock according to
/// the mode. Negative remainders clamp to 0 and mark `has_expired` on
/// every affected participant in the same transition.
pub(crate) fn debit_active(
    session: &mut SyncSession,
    active_id: &str,
    elapsed_ms: i64,
) -> DebitOutcome {
    let elapsed_ms = elapsed_ms.max(0);

    if session.sync_mode == SyncMode::CountUp {
        let max = session.max_time_ms;
        let Some(p) = session.participant_mut(active_id) else {
            return DebitOutcome { expired: false };
        };
        p.time_used_ms += elapsed_ms;
        let expired = max.is_some_and(|m| p.time_used_ms >= m);
        if expired {
            p.has_expired = true;
        }
        return DebitOutcome { expired };
    }

    let members = pool_member_ids(session, active_id);
    let budget_before = session
        .participant(active_id)
        .map(|p| p.total_time_ms)
        .unwrap_or(0);
    let expired = elapsed_ms >= budget_before;

    for id in &members {
        if let Some(p) = session.participant_mut(id) {
            p.total_time_ms = (p.total_time_ms - elapsed_ms).max(0);
            if expired {
                p.has_expired = true;
            }
        }
    }
    if let Some(p) = session.participant_mut(active_id) {
        p.time_used_ms += elapsed_ms.min(budget_before);
    }

    DebitOutcome { expired }
}

/// Fischer bonus: credit the outgoing participant (or its pool) on a
/// completed turn. No credit on a zero crossing — expiration wins.
pub(crate) fn credit_increment(session: &mut SyncSession, outgoing_id: &str) {
    let bonus = session.increment_ms;
    if bonus <= 0 {
        return;
    }
    match session.sync_mode {
        SyncMode::PerParticipant => {
            if let Some(p) = session.participant_mut(outgoing_id) {
                p.total_time_ms = p.total_time_ms.saturating_add(bonus);
            }
        }
        SyncMode::PerGroup | SyncMode::Global => {
            for id in pool_member_ids(session, outgoing_id) {
                if let Some(p) = session.participant_mut(&id) {
                    p.total_time_ms = p.total_time_ms.saturating_add(bonus);
                }
            }
        }
        SyncMode::PerCycle | SyncMode::CountUp => {}
    }
}

/// Reset per-turn budgets after a rotation in `per_cycle` mode — the
/// outgoing participant's spent budget is forgotten and the incoming
/// participant starts the next turn fresh.
pub(crate) fn reset_cycle_budgets(session: &mut SyncSession, outgoing_id: &str, incoming_id: &str) {
    if session.sync_mode != SyncMode::PerCycle {
        return;
    }
    let per_cycle = session.time_per_cycle_ms.unwrap_or(0);
    for id in [outgoing_id, incoming_id] {
        if let Some(p) = session.participant_mut(id) {
            p.total_time_ms = per_cycle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::create;
    use crate::session::{ParticipantSeed, SessionConfig, SyncMode};
    use chrono::Utc;
    use uuid::Uuid;

    fn session(mode: SyncMode, seeds: Vec<(&str, u32, i64, Option<&str>)>) -> SyncSession {
        let cfg = SessionConfig {
            session_id: Uuid::new_v4(),
            sync_mode: mode,
            participants: seeds
                .into_iter()
                .map(|(id, idx, ms, g)| ParticipantSeed {
                    participant_id: id.into(),
                    participant_index: idx,
                    total_time_ms: ms,
                    group_id: g.map(String::from),
                })
                .collect(),
            time_per_cycle_ms: if mode == SyncMode::PerCycle {
                Some(120_000)
            } else {
                None
            },
            increment_ms: None,
            max_time_ms: None,
            auto_advance: None,
        };
        let mut s = create(cfg, Utc::now()).unwrap();
        initialize_budgets(&mut s);
        s
    }

    #[test]
    fn test_per_participant_debit_preserves_budget_sum() {
        let mut s = session(
            SyncMode::PerParticipant,
            vec![("p1", 0, 600_000, None), ("p2", 1, 600_000, None)],
        );
        let out = debit_active(&mut s, "p1", 5_000);
        assert!(!out.expired);
        let p1 = s.participant("p1").unwrap();
        assert_eq!(p1.total_time_ms, 595_000);
        assert_eq!(p1.time_used_ms, 5_000);
        assert_eq!(p1.time_used_ms + p1.total_time_ms, 600_000);
        assert_eq!(s.participant("p2").unwrap().total_time_ms, 600_000);
    }

    #[test]
    fn test_debit_past_zero_clamps_and_expires() {
        let mut s = session(
            SyncMode::PerParticipant,
            vec![("p1", 0, 100, None), ("p2", 1, 600_000, None)],
        );
        let out = debit_active(&mut s, "p1", 250);
        assert!(out.expired);
        let p1 = s.participant("p1").unwrap();
        assert_eq!(p1.total_time_ms, 0);
        assert_eq!(p1.time_used_ms, 100);
        assert!(p1.has_expired);
    }

    #[test]
    fn test_exact_zero_crossing_expires() {
        let mut s = session(
            SyncMode::PerParticipant,
            vec![("p1", 0, 100, None), ("p2", 1, 100, None)],
        );
        assert!(debit_active(&mut s, "p1", 100).expired);
    }

    #[test]
    fn test_per_group_debits_the_pool() {
        let mut s = session(
            SyncMode::PerGroup,
            vec![
                ("a1", 0, 100_000, Some("a")),
                ("b1", 1, 100_000, Some("b")),
                ("a2", 2, 100_000, Some("a")),
            ],
        );
        // Pool "a" mirrors 200_000 on both members after initialisation.
        assert_eq!(s.participant("a1").unwrap().total_time_ms, 200_000);
        assert_eq!(s.participant("a2").unwrap().total_time_ms, 200_000);

        debit_active(&mut s, "a1", 30_000);
        assert_eq!(s.participant("a1").unwrap().total_time_ms, 170_000);
        assert_eq!(s.participant("a2").unwrap().total_time_ms, 170_000);
        assert_eq!(s.participant("b1").unwrap().total_time_ms, 100_000);
        assert_eq!(s.participant("a1").unwrap().time_used_ms, 30_000);
        assert_eq!(s.participant("a2").unwrap().time_used_ms, 0);
    }

    #[test]
    fn test_group_pool_exhaustion_expires_all_members() {
        let mut s = session(
            SyncMode::PerGroup,
            vec![
                ("a1", 0, 1_000, Some("a")),
                ("a2", 1, 1_000, Some("a")),
                ("b1", 2, 50_000, Some("b")),
            ],
        );
        let out = debit_active(&mut s, "a1", 5_000);
        assert!(out.expired);
        assert!(s.participant("a1").unwrap().has_expired);
        assert!(s.participant("a2").unwrap().has_expired);
        assert!(!s.participant("b1").unwrap().has_expired);
    }

    #[test]
    fn test_global_debits_everyone() {
        let mut s = session(
            SyncMode::Global,
            vec![("p1", 0, 60_000, None), ("p2", 1, 60_000, None)],
        );
        assert_eq!(s.participant("p1").unwrap().total_time_ms, 120_000);
        debit_active(&mut s, "p1", 10_000);
        assert_eq!(s.participant("p1").unwrap().total_time_ms, 110_000);
        assert_eq!(s.participant("p2").unwrap().total_time_ms, 110_000);
    }

    #[test]
    fn test_count_up_grows_usage_and_respects_max() {
        let mut s = session(
            SyncMode::CountUp,
            vec![("p1", 0, 0, None), ("p2", 1, 0, None)],
        );
        s.max_time_ms = Some(10_000);
        assert!(!debit_active(&mut s, "p1", 4_000).expired);
        assert_eq!(s.participant("p1").unwrap().time_used_ms, 4_000);
        let out = debit_active(&mut s, "p1", 7_000);
        assert!(out.expired);
        assert!(s.participant("p1").unwrap().has_expired);
    }

    #[test]
    fn test_count_up_without_max_never_expires() {
        let mut s = session(SyncMode::CountUp, vec![("p1", 0, 0, None)]);
        assert!(!debit_active(&mut s, "p1", 86_400_000).expired);
    }

    #[test]
    fn test_negative_elapsed_is_clamped() {
        let mut s = session(SyncMode::PerParticipant, vec![("p1", 0, 1_000, None)]);
        let out = debit_active(&mut s, "p1", -500);
        assert!(!out.expired);
        assert_eq!(s.participant("p1").unwrap().total_time_ms, 1_000);
    }

    #[test]
    fn test_fischer_credit_per_participant() {
        let mut s = session(
            SyncMode::PerParticipant,
            vec![("p1", 0, 10_000, None), ("p2", 1, 10_000, None)],
        );
        s.increment_ms = 3_000;
        credit_increment(&mut s, "p1");
        assert_eq!(s.participant("p1").unwrap().total_time_ms, 13_000);
        assert_eq!(s.participant("p2").unwrap().total_time_ms, 10_000);
    }

    #[test]
    fn test_cycle_reset_forgets_spent_budget() {
        let mut s = session(
            SyncMode::PerCycle,
            vec![("p1", 0, 0, None), ("p2", 1, 0, None)],
        );
        assert_eq!(s.participant("p1").unwrap().total_time_ms, 120_000);
        debit_active(&mut s, "p1", 45_000);
        reset_cycle_budgets(&mut s, "p1", "p2");
        assert_eq!(s.participant("p1").unwrap().total_time_ms, 120_000);
        assert_eq!(s.participant("p2").unwrap().total_time_ms, 120_000);
        // Usage is still recorded.
        assert_eq!(s.participant("p1").unwrap().time_used_ms, 45_000);
    }
}
