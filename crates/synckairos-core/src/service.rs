//! `SessionService` — the IO half of the session engine.
//!
//! Every mutation is load → pure engine transition → CAS write through
//! the [`SessionStore`] port. When the caller pins an `expected_version`
//! a CAS mismatch fails fast; otherwise the service re-reads and retries
//! a bounded number of times. Reads never write.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::{self, Transition};
use crate::error::SyncError;
use crate::ports::{AuditSink, SessionStore};
use crate::session::{ParticipantSeed, SessionConfig, SessionView, SyncSession, SyncStatus};
use crate::Result;

/// Bounded read-apply-CAS retry budget when no version was pinned.
const MAX_CAS_ATTEMPTS: u32 = 3;

/// `POST /sessions/:id/switch` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_participant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_participant_id: Option<String>,
}

/// Hot-path response: who held the clock, who holds it now, how long the
/// server spent, and the full post-switch state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchReport {
    pub session_id: Uuid,
    pub status: SyncStatus,
    pub previous_participant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_active_participant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_participant_id: Option<String>,
    pub switch_timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub state: SessionView,
}

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn reject_if_backlogged(&self) -> Result<()> {
        if self.audit.is_backlogged() {
            return Err(SyncError::AuditBacklog);
        }
        Ok(())
    }

    /// Read path: derived view, no writes, server timestamp attached.
    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionView> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(SyncError::NotFound(session_id))?;
        Ok(session.view(self.clock.now()))
    }

    /// Create a new pending session. Low priority: rejected while the
    /// audit queue is backlogged.
    pub async fn create_session(&self, config: SessionConfig) -> Result<SessionView> {
        self.reject_if_backlogged()?;
        let now = self.clock.now();
        let session = engine::create(config, now)?;
        self.store.create(&session).await?;
        Ok(session.view(now))
    }

    pub async fn start_session(
        &self,
        session_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<SessionView> {
        let (session, ()) = self
            .apply(session_id, expected_version, |s, now| {
                engine::start(s, now).map(|t| (t, ()))
            })
            .await?;
        Ok(session.view(self.clock.now()))
    }

    /// The hot path. One CAS round-trip; never blocked by audit latency.
    pub async fn switch(&self, session_id: Uuid, req: SwitchRequest) -> Result<SwitchReport> {
        let started = Instant::now();
        let (session, outcome) = self
            .apply(session_id, req.version, |s, now| {
                engine::switch(
                    s,
                    req.current_participant_id.as_deref(),
                    req.next_participant_id.as_deref(),
                    now,
                )
            })
            .await?;

        let now = self.clock.now();
        Ok(SwitchReport {
            session_id,
            status: session.status,
            previous_participant_id: outcome.previous_participant_id,
            new_active_participant_id: outcome.new_active_participant_id,
            expired_participant_id: outcome.expired_participant_id,
            switch_timestamp: session.updated_at,
            latency_ms: started.elapsed().as_millis() as u64,
            state: session.view(now),
        })
    }

    pub async fn pause_session(
        &self,
        session_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<SessionView> {
        let (session, ()) = self
            .apply(session_id, expected_version, |s, now| {
                engine::pause(s, now).map(|t| (t, ()))
            })
            .await?;
        Ok(session.view(self.clock.now()))
    }

    pub async fn resume_session(
        &self,
        session_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<SessionView> {
        let (session, ()) = self
            .apply(session_id, expected_version, |s, now| {
                engine::resume(s, now).map(|t| (t, ()))
            })
            .await?;
        Ok(session.view(self.clock.now()))
    }

    pub async fn complete_session(
        &self,
        session_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<SessionView> {
        let (session, ()) = self
            .apply(session_id, expected_version, |s, now| {
                engine::complete(s, now).map(|t| (t, ()))
            })
            .await?;
        Ok(session.view(self.clock.now()))
    }

    pub async fn add_participant(
        &self,
        session_id: Uuid,
        seed: ParticipantSeed,
        expected_version: Option<u64>,
    ) -> Result<SessionView> {
        self.reject_if_backlogged()?;
        let (session, ()) = self
            .apply(session_id, expected_version, move |s, now| {
                engine::add_participant(s, seed.clone(), now).map(|t| (t, ()))
            })
            .await?;
        Ok(session.view(self.clock.now()))
    }

    pub async fn adjust_time(
        &self,
        session_id: Uuid,
        participant_id: &str,
        total_time_ms: i64,
        reason: &str,
        expected_version: Option<u64>,
    ) -> Result<SessionView> {
        self.reject_if_backlogged()?;
        let (session, ()) = self
            .apply(session_id, expected_version, |s, now| {
                engine::adjust_time(s, participant_id, total_time_ms, reason, now).map(|t| (t, ()))
            })
            .await?;
        Ok(session.view(self.clock.now()))
    }

    /// Remove the record; the store publishes the tombstone and enqueues
    /// the terminal audit job.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        self.store.delete(session_id).await
    }

    /// Load → pure transition → CAS, with the bounded retry protocol.
    async fn apply<F, T>(
        &self,
        session_id: Uuid,
        expected_version: Option<u64>,
        op: F,
    ) -> Result<(SyncSession, T)>
    where
        F: Fn(&SyncSession, DateTime<Utc>) -> Result<(Transition, T)>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let current = self
                .store
                .get(session_id)
                .await?
                .ok_or(SyncError::NotFound(session_id))?;

            if let Some(pinned) = expected_version {
                if current.version != pinned {
                    return Err(SyncError::ConcurrencyConflict {
                        expected: pinned,
                        actual: current.version,
                    });
                }
            }

            let now = self.clock.now();
            let (transition, payload) = op(&current, now)?;
            let expected = expected_version.unwrap_or(current.version);

            match self
                .store
                .update(
                    &transition.session,
                    expected,
                    transition.event,
                    transition.detail.clone(),
                )
                .await
            {
                Ok(new_version) => {
                    let mut session = transition.session;
                    session.version = new_version;
                    if let Some(warning) = transition.warning {
                        // Best-effort out-of-band fan-out; the mutation
                        // already committed.
                        if let Err(e) = self.store.publish_fanout(session_id, &warning).await {
                            tracing::warn!(%session_id, error = %e, "fan-out publish failed");
                        }
                    }
                    return Ok((session, payload));
                }
                Err(SyncError::ConcurrencyConflict { expected, actual })
                    if expected_version.is_none() && attempt < MAX_CAS_ATTEMPTS =>
                {
                    tracing::debug!(
                        %session_id,
                        attempt,
                        expected,
                        actual,
                        "CAS conflict, reloading"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
