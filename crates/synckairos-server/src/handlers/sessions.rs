//! Session lifecycle endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use synckairos_core::service::{SwitchReport, SwitchRequest};
use synckairos_core::session::{SessionConfig, SessionView};

use crate::error::AppError;
use crate::state::AppState;

/// `POST /v1/sessions` — 201 with the full initial state.
pub async fn create(
    State(state): State<AppState>,
    Json(config): Json<SessionConfig>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.service.create_session(config).await?;
    tracing::info!(session_id = %view.session_id, mode = %view.sync_mode, "session created");
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /v1/sessions/:id` — derived state plus server time.
pub async fn get(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.service.get_session(session_id).await?))
}

/// `POST /v1/sessions/:id/start`.
pub async fn start(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.service.start_session(session_id, None).await?))
}

/// `POST /v1/sessions/:id/switch` — the hot path. The body is optional;
/// an empty switch advances rotation from the authoritative state.
pub async fn switch(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    body: Option<Json<SwitchRequest>>,
) -> Result<Json<SwitchReport>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let report = state.service.switch(session_id, req).await?;
    tracing::debug!(
        %session_id,
        previous = %report.previous_participant_id,
        new_active = ?report.new_active_participant_id,
        latency_ms = report.latency_ms,
        "switch served"
    );
    Ok(Json(report))
}

/// `POST /v1/sessions/:id/pause`.
pub async fn pause(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.service.pause_session(session_id, None).await?))
}

/// `POST /v1/sessions/:id/resume`.
pub async fn resume(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.service.resume_session(session_id, None).await?))
}

/// `POST /v1/sessions/:id/complete`.
pub async fn complete(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.service.complete_session(session_id, None).await?))
}

/// `DELETE /v1/sessions/:id` — tombstone fan-out happens in the store.
pub async fn delete(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.service.delete_session(session_id).await?;
    tracing::info!(%session_id, "session deleted");
    Ok(Json(json!({ "session_id": session_id, "deleted": true })))
}
