//! Participant management endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use synckairos_core::session::{ParticipantSeed, SessionView};

use crate::error::AppError;
use crate::state::AppState;

/// `POST /v1/sessions/:id/participants` — pending sessions only.
pub async fn add(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(seed): Json<ParticipantSeed>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(
        state.service.add_participant(session_id, seed, None).await?,
    ))
}

/// `PATCH /v1/sessions/:id/participants/:pid` body.
#[derive(Debug, Deserialize)]
pub struct AdjustTimeRequest {
    pub total_time_ms: i64,
    pub reason: String,
    #[serde(default)]
    pub version: Option<u64>,
}

/// `PATCH /v1/sessions/:id/participants/:pid` — audited time correction.
pub async fn adjust_time(
    State(state): State<AppState>,
    Path((session_id, participant_id)): Path<(Uuid, String)>,
    Json(req): Json<AdjustTimeRequest>,
) -> Result<Json<SessionView>, AppError> {
    let view = state
        .service
        .adjust_time(
            session_id,
            &participant_id,
            req.total_time_ms,
            &req.reason,
            req.version,
        )
        .await?;
    tracing::info!(
        %session_id,
        participant_id,
        total_time_ms = req.total_time_ms,
        reason = %req.reason,
        "participant time adjusted"
    );
    Ok(Json(view))
}
