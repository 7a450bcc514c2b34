//! Redis-backed `SessionStore`.
//!
//! The version check and the write happen inside one Lua script, so the
//! compare-and-swap is serialised by the Redis command loop — a client
//! side read-then-write can never race past it. Publish failures are
//! logged and swallowed: the stored record is the source of truth, and
//! receivers resync on reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use synckairos_core::audit::{AuditEventType, AuditJob};
use synckairos_core::ports::{AuditSink, SessionStore};
use synckairos_core::session::SyncSession;
use synckairos_core::wire::{FanoutMessage, StateChangeEvent};
use synckairos_core::{Result, SyncError};

use crate::keys::{fanout_channel, session_key, STATE_CHANNEL};

/// CAS script. Sentinels: -1 = key missing; 0 = swapped; any other value
/// is the actual stored version on a mismatch.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
  return -1
end
local decoded = cjson.decode(current)
local stored_version = tonumber(decoded['version'])
if stored_version ~= tonumber(ARGV[1]) then
  return stored_version
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
return 0
"#;

/// `SET key payload NX EX ttl` — create-if-absent with the record TTL.
fn create_command(key: &str, payload: &str, ttl_secs: u64) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(payload).arg("NX").arg("EX").arg(ttl_secs);
    cmd
}

pub struct RedisSessionStore {
    conn: ConnectionManager,
    audit: Arc<dyn AuditSink>,
    ttl_secs: u64,
    cas: redis::Script,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager, audit: Arc<dyn AuditSink>, ttl_secs: u64) -> Self {
        Self {
            conn,
            audit,
            ttl_secs,
            cas: redis::Script::new(CAS_SCRIPT),
        }
    }

    /// Connect and build the store in one step.
    pub async fn connect(
        redis_url: &str,
        audit: Arc<dyn AuditSink>,
        ttl_secs: u64,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SyncError::StoreUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SyncError::StoreUnavailable(e.to_string()))?;
        Ok(Self::new(conn, audit, ttl_secs))
    }

    fn encode(session: &SyncSession) -> Result<String> {
        serde_json::to_string(session)
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("encode session: {e}")))
    }

    fn decode(payload: &str) -> Result<SyncSession> {
        serde_json::from_str(payload)
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("decode stored session: {e}")))
    }

    async fn publish_state(&self, session_id: Uuid, state: Option<&SyncSession>) {
        let envelope = StateChangeEvent {
            session_id,
            state: state.cloned(),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(%session_id, error = %e, "state-change envelope encode failed");
                return;
            }
        };
        let mut conn = self.conn.clone();
        if let Err(e) = conn.publish::<_, _, i64>(STATE_CHANNEL, payload).await {
            tracing::warn!(%session_id, error = %e, "state-change publish failed");
        }
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
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: Uuid) -> Result<Option<SyncSession>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(session_key(session_id))
            .await
            .map_err(|e| SyncError::StoreUnavailable(e.to_string()))?;
        payload.as_deref().map(Self::decode).transpose()
    }

    async fn create(&self, session: &SyncSession) -> Result<()> {
        let payload = Self::encode(session)?;
        let mut conn = self.conn.clone();
        let stored: Option<String> =
            create_command(&session_key(session.session_id), &payload, self.ttl_secs)
                .query_async(&mut conn)
                .await
                .map_err(|e| SyncError::StoreUnavailable(e.to_string()))?;
        if stored.is_none() {
            return Err(SyncError::AlreadyExists(session.session_id));
        }

        self.publish_state(session.session_id, Some(session)).await;
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
        let mut next = session.clone();
        next.version = expected_version + 1;
        let payload = Self::encode(&next)?;

        let mut conn = self.conn.clone();
        let outcome: i64 = self
            .cas
            .key(session_key(session.session_id))
            .arg(expected_version)
            .arg(&payload)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SyncError::StoreUnavailable(e.to_string()))?;

        match outcome {
            0 => {
                self.publish_state(next.session_id, Some(&next)).await;
                self.enqueue_audit(next.session_id, event, Some(&next), detail);
                Ok(next.version)
            }
            -1 => Err(SyncError::NotFound(session.session_id)),
            actual => Err(SyncError::ConcurrencyConflict {
                expected: expected_version,
                actual: actual as u64,
            }),
        }
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(session_key(session_id))
            .await
            .map_err(|e| SyncError::StoreUnavailable(e.to_string()))?;
        if removed == 0 {
            return Err(SyncError::NotFound(session_id));
        }

        self.publish_state(session_id, None).await;
        self.enqueue_audit(session_id, AuditEventType::Deleted, None, None);
        Ok(())
    }

    async fn publish_fanout(&self, session_id: Uuid, message: &FanoutMessage) -> Result<()> {
        let payload = serde_json::to_string(message)
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("encode fan-out: {e}")))?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, i64>(fanout_channel(session_id), payload)
            .await
            .map_err(|e| SyncError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}
