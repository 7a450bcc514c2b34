//! Coordination plane: consumes decoded store events and hands them to
//! the local delivery layer.
//!
//! One consumer per instance, established at startup. Each snapshot is
//! serialised once; the registry's version gate keeps per-client delivery
//! monotonic, so duplicate or reordered pub/sub events are harmless.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use synckairos_core::clock::Clock;
use synckairos_core::wire::{FanoutMessage, ServerFrame, StateChangeEvent, StoreEvent};

use crate::ws::registry::ConnectionRegistry;

pub async fn run(
    mut rx: mpsc::Receiver<StoreEvent>,
    registry: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
) {
    while let Some(event) = rx.recv().await {
        dispatch(event, &registry, clock.as_ref()).await;
    }
    tracing::info!("coordination plane stopped: event channel closed");
}

async fn dispatch(event: StoreEvent, registry: &ConnectionRegistry, clock: &dyn Clock) {
    match event {
        StoreEvent::StateChanged(StateChangeEvent {
            session_id,
            state: Some(state),
        }) => {
            let now = clock.now();
            let version = state.version;
            let frame = ServerFrame::StateUpdate {
                session_id,
                timestamp: now,
                state: state.view(now),
            };
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    registry.broadcast_state(session_id, version, json).await;
                }
                Err(e) => tracing::error!(%session_id, error = %e, "state frame encode failed"),
            }
        }
        StoreEvent::StateChanged(StateChangeEvent {
            session_id,
            state: None,
        }) => {
            deliver_tombstone(session_id, registry, clock).await;
        }
        StoreEvent::Fanout {
            session_id,
            message,
        } => {
            let frame = match message {
                FanoutMessage::TimeWarning {
                    participant_id,
                    time_remaining_ms,
                } => ServerFrame::TimeWarning {
                    participant_id,
                    time_remaining_ms,
                },
            };
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    registry.broadcast_fanout(session_id, json).await;
                }
                Err(e) => tracing::error!(%session_id, error = %e, "fan-out frame encode failed"),
            }
        }
    }
}

async fn deliver_tombstone(session_id: Uuid, registry: &ConnectionRegistry, clock: &dyn Clock) {
    let frame = ServerFrame::SessionDeleted {
        session_id,
        timestamp: clock.now(),
    };
    match serde_json::to_string(&frame) {
        Ok(json) => registry.broadcast_deleted(session_id, json).await,
        Err(e) => tracing::error!(%session_id, error = %e, "tombstone frame encode failed"),
    }
}

/// Bridge the in-memory store's broadcast feed into the coordination
/// channel. Dev-mode and test wiring; the Redis subscriber takes this
/// role in production.
pub fn bridge_local_store(
    mut events: broadcast::Receiver<StoreEvent>,
    tx: mpsc::Sender<StoreEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "local store bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use chrono::Utc;
    use synckairos_core::clock::ManualClock;
    use synckairos_core::engine;
    use synckairos_core::session::{ParticipantSeed, SessionConfig, SyncMode};

    fn session(id: Uuid) -> synckairos_core::SyncSession {
        let cfg = SessionConfig {
            session_id: id,
            sync_mode: SyncMode::PerParticipant,
            participants: vec![ParticipantSeed {
                participant_id: "p1".into(),
                participant_index: 0,
                total_time_ms: 60_000,
                group_id: None,
            }],
            time_per_cycle_ms: None,
            increment_ms: None,
            max_time_ms: None,
            auto_advance: None,
        };
        engine::create(cfg, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_state_event_becomes_state_update_frame() {
        let registry = Arc::new(ConnectionRegistry::new());
        let clock = ManualClock::new(Utc::now());
        let id = Uuid::new_v4();
        let mut reg = registry.register(id).await;

        dispatch(
            StoreEvent::StateChanged(StateChangeEvent {
                session_id: id,
                state: Some(session(id)),
            }),
            &registry,
            &clock,
        )
        .await;

        match reg.rx.recv().await.unwrap() {
            Message::Text(json) => {
                assert!(json.contains(r#""type":"STATE_UPDATE""#));
                assert!(json.contains(&id.to_string()));
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tombstone_becomes_session_deleted_and_close() {
        let registry = Arc::new(ConnectionRegistry::new());
        let clock = ManualClock::new(Utc::now());
        let id = Uuid::new_v4();
        let mut reg = registry.register(id).await;

        dispatch(
            StoreEvent::StateChanged(StateChangeEvent {
                session_id: id,
                state: None,
            }),
            &registry,
            &clock,
        )
        .await;

        match reg.rx.recv().await.unwrap() {
            Message::Text(json) => assert!(json.contains(r#""type":"SESSION_DELETED""#)),
            other => panic!("expected text frame, got {other:?}"),
        }
        assert!(matches!(
            reg.rx.recv().await.unwrap(),
            Message::Close(Some(_))
        ));
    }

    #[tokio::test]
    async fn test_fanout_becomes_time_warning_frame() {
        let registry = Arc::new(ConnectionRegistry::new());
        let clock = ManualClock::new(Utc::now());
        let id = Uuid::new_v4();
        let mut reg = registry.register(id).await;

        dispatch(
            StoreEvent::Fanout {
                session_id: id,
                message: FanoutMessage::TimeWarning {
                    participant_id: "p1".into(),
                    time_remaining_ms: 900,
                },
            },
            &registry,
            &clock,
        )
        .await;

        match reg.rx.recv().await.unwrap() {
            Message::Text(json) => {
                assert!(json.contains(r#""type":"TIME_WARNING""#));
                assert!(json.contains("900"));
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
