//! In-memory `SessionStore` with the same CAS, TTL, and publish semantics
//! as the Redis adapter, delivered over a local broadcast channel. Dev-mode
//! and test wiring; a single instance only.
//!
//! TTL works the way the Redis adapter's does: every write stamps a fresh
//! expiry, reads never refresh, and an expired entry is indistinguishable
//! from a miss. Expiry is checked lazily against the injected clock, so
//! tests drive it with a manual clock instead of sleeping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use synckairos_core::audit::{AuditEventType, AuditJob};
use synckairos_core::clock::{Clock, SystemClock};
use synckairos_core::ports::{AuditSink, SessionStore};
use synckairos_core::session::SyncSession;
use synckairos_core::wire::{FanoutMessage, StateChangeEvent, StoreEvent};
use synckairos_core::{Result, SyncError};

use crate::keys::DEFAULT_TTL_SECS;

struct StoredEntry {
    session: SyncSession,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, StoredEntry>>,
    events: broadcast::Sender<StoreEvent>,
    audit: Arc<dyn AuditSink>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    /// Default TTL on the system clock.
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self::with_ttl(audit, DEFAULT_TTL_SECS, Arc::new(SystemClock))
    }

    /// Explicit TTL and clock, for tests that drive expiry by hand.
    pub fn with_ttl(audit: Arc<dyn AuditSink>, ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            sessions: RwLock::new(HashMap::new()),
            events,
            audit,
            ttl: Duration::seconds(ttl_secs as i64),
            clock,
        }
    }

    /// Local stand-in for the cluster-wide subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine: nothing is listening yet.
        let _ = self.events.send(event);
    }

    fn enqueue_audit(
        &self,
        session_id: Uuid,
        event_type: AuditEventType,
        state: Option<&SyncSession>,
        detail: Option<serde_json::Value>,
    ) {
        self.audit.enqueue(AuditJob {
            session_id,
            event_type,
            state: state.cloned(),
            detail,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: Uuid) -> Result<Option<SyncSession>> {
        let now = self.clock.now();
        let mut map = self.sessions.write().await;
        match map.get(&session_id) {
            Some(entry) if entry.is_expired(now) => {
                map.remove(&session_id);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.session.clone())),
            None => Ok(None),
        }
    }

    async fn create(&self, session: &SyncSession) -> Result<()> {
        let now = self.clock.now();
        {
            let mut map = self.sessions.write().await;
            if map
                .get(&session.session_id)
                .is_some_and(|e| !e.is_expired(now))
            {
                return Err(SyncError::AlreadyExists(session.session_id));
            }
            map.insert(
                session.session_id,
                StoredEntry {
                    session: session.clone(),
                    expires_at: now + self.ttl,
                },
            );
        }
        self.publish(StoreEvent::StateChanged(StateChangeEvent {
            session_id: session.session_id,
            state: Some(session.clone()),
        }));
        self.enqueue_audit(
            session.session_id,
            AuditEventType::Created,
            Some(session),
            None,
        );
        Ok(())
    }

    async fn update(
        &self,
        session: &SyncSession,
        expected_version: u64,
        event: AuditEventType,
        detail: Option<serde_json::Value>,
    ) -> Result<u64> {
        let now = self.clock.now();
        let next = {
            let mut map = self.sessions.write().await;
            if map
                .get(&session.session_id)
                .is_some_and(|e| e.is_expired(now))
            {
                map.remove(&session.session_id);
            }
            let entry = map
                .get_mut(&session.session_id)
                .ok_or(SyncError::NotFound(session.session_id))?;
            if entry.session.version != expected_version {
                return Err(SyncError::ConcurrencyConflict {
                    expected: expected_version,
                    actual: entry.session.version,
                });
            }
            let mut next = session.clone();
            next.version = expected_version + 1;
            entry.session = next.clone();
            entry.expires_at = now + self.ttl;
            next
        };

        self.publish(StoreEvent::StateChanged(StateChangeEvent {
            session_id: next.session_id,
            state: Some(next.clone()),
        }));
        self.enqueue_audit(next.session_id, event, Some(&next), detail);
        Ok(next.version)
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let now = self.clock.now();
        {
            let mut map = self.sessions.write().await;
            match map.remove(&session_id) {
                None => return Err(SyncError::NotFound(session_id)),
                // An expired record is already gone; no tombstone.
                Some(entry) if entry.is_expired(now) => {
                    return Err(SyncError::NotFound(session_id))
                }
                Some(_) => {}
            }
        }
        self.publish(StoreEvent::StateChanged(StateChangeEvent {
            session_id,
            state: None,
        }));
        self.enqueue_audit(session_id, AuditEventType::Deleted, None, None);
        Ok(())
    }

    async fn publish_fanout(&self, session_id: Uuid, message: &FanoutMessage) -> Result<()> {
        self.publish(StoreEvent::Fanout {
            session_id,
            message: message.clone(),
        });
        Ok(())
    }
}
