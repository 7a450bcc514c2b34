//! Postgres repository for the audit store.
//!
//! Two append-oriented tables: `sync_sessions` holds one upserted summary
//! row per session, `sync_events` the append-only event log with the full
//! JSON snapshot per transition. DDL is owned by the deployment; only DML
//! lives here, and nothing on the hot path ever reads these tables.

use async_trait::async_trait;
use sqlx::PgPool;

use synckairos_core::audit::AuditJob;

use crate::queue::{AuditWriteError, AuditWriter};

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_session(&self, job: &AuditJob) -> Result<(), sqlx::Error> {
        let Some(state) = &job.state else {
            return Ok(());
        };
        let snapshot = serde_json::to_value(state).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            r#"
            INSERT INTO sync_sessions
                (session_id, sync_mode, status, version, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO UPDATE SET
                sync_mode  = EXCLUDED.sync_mode,
                status     = EXCLUDED.status,
                version    = EXCLUDED.version,
                state      = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.session_id)
        .bind(state.sync_mode.to_string())
        .bind(state.status.to_string())
        .bind(state.version as i64)
        .bind(snapshot)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_event(&self, job: &AuditJob) -> Result<(), sqlx::Error> {
        let snapshot = job
            .state
            .as_ref()
            .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null));
        let version = job.state.as_ref().map(|s| s.version as i64);
        sqlx::query(
            r#"
            INSERT INTO sync_events
                (session_id, event_type, version, snapshot, detail, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.session_id)
        .bind(job.event_type.to_string())
        .bind(version)
        .bind(snapshot)
        .bind(job.detail.clone())
        .bind(job.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Constraint violations (SQLSTATE class 23) can never succeed on retry.
fn classify(err: sqlx::Error) -> AuditWriteError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().is_some_and(|c| c.starts_with("23")) {
            return AuditWriteError::Poison(err.to_string());
        }
    }
    AuditWriteError::Transient(err.to_string())
}

#[async_trait]
impl AuditWriter for AuditRepository {
    async fn record(&self, job: &AuditJob) -> Result<(), AuditWriteError> {
        self.upsert_session(job).await.map_err(classify)?;
        self.insert_event(job).await.map_err(classify)?;
        tracing::debug!(
            session_id = %job.session_id,
            event = %job.event_type,
            "audit record written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        assert!(matches!(
            classify(sqlx::Error::PoolTimedOut),
            AuditWriteError::Transient(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::WorkerCrashed),
            AuditWriteError::Transient(_)
        ));
    }
}
