//! Process-global pub/sub subscription.
//!
//! Established once at startup and never per request. The handler only
//! decodes and forwards into a bounded channel — no I/O runs on the
//! subscription task, and a slow delivery layer drops events rather than
//! backing up the connection. Receivers are idempotent and versioned, so
//! a dropped or duplicated event is recovered by the next snapshot.

use futures::StreamExt;
use tokio::sync::mpsc;

use synckairos_core::wire::{FanoutMessage, StateChangeEvent, StoreEvent};

use crate::keys::{parse_fanout_channel, FANOUT_PATTERN, STATE_CHANNEL};

/// Decode one pub/sub message into a `StoreEvent`. Unknown channels and
/// malformed payloads are logged and ignored, never fatal.
pub fn decode_message(channel: &str, payload: &str) -> Option<StoreEvent> {
    if channel == STATE_CHANNEL {
        match serde_json::from_str::<StateChangeEvent>(payload) {
            Ok(ev) => return Some(StoreEvent::StateChanged(ev)),
            Err(e) => {
                tracing::warn!(channel, error = %e, "undecodable state-change event");
                return None;
            }
        }
    }
    if let Some(session_id) = parse_fanout_channel(channel) {
        match serde_json::from_str::<FanoutMessage>(payload) {
            Ok(message) => {
                return Some(StoreEvent::Fanout {
                    session_id,
                    message,
                })
            }
            Err(e) => {
                tracing::warn!(channel, error = %e, "undecodable fan-out message");
                return None;
            }
        }
    }
    tracing::debug!(channel, "ignoring message on unrecognised channel");
    None
}

/// Forward a decoded event without blocking the subscription task.
/// Returns `false` when the receiving side is gone (shutdown).
pub fn forward(tx: &mpsc::Sender<StoreEvent>, event: StoreEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("delivery channel full, dropping store event");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Open the dedicated pub/sub client. The subscription holds its own
/// connection; it cannot share the command connection manager.
pub fn connect_client(redis_url: &str) -> synckairos_core::Result<redis::Client> {
    redis::Client::open(redis_url)
        .map_err(|e| synckairos_core::SyncError::StoreUnavailable(e.to_string()))
}

/// Run the subscription until the delivery side shuts down. Transport
/// failures reconnect with a short backoff; the pub/sub channel is not
/// durable, so missed events are not replayed.
pub async fn run(client: redis::Client, tx: mpsc::Sender<StoreEvent>) {
    loop {
        match subscribe_once(&client, &tx).await {
            Ok(()) => {
                tracing::info!("subscriber shutting down: delivery channel closed");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "subscriber connection lost, reconnecting");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

async fn subscribe_once(
    client: &redis::Client,
    tx: &mpsc::Sender<StoreEvent>,
) -> redis::RedisResult<()> {
    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.subscribe(STATE_CHANNEL).await?;
    pubsub.psubscribe(FANOUT_PATTERN).await?;
    tracing::info!(
        channel = STATE_CHANNEL,
        pattern = FANOUT_PATTERN,
        "subscribed to store channels"
    );

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(channel, error = %e, "non-text pub/sub payload");
                continue;
            }
        };
        if let Some(event) = decode_message(&channel, &payload) {
            if !forward(tx, event) {
                return Ok(());
            }
        }
    }
    Err(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "pub/sub stream ended",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_decode_state_change() {
        let id = Uuid::new_v4();
        let payload = format!(r#"{{"session_id":"{id}","state":null}}"#);
        match decode_message(STATE_CHANNEL, &payload) {
            Some(StoreEvent::StateChanged(ev)) => {
                assert_eq!(ev.session_id, id);
                assert!(ev.state.is_none());
            }
            other => panic!("expected state change, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_fanout_time_warning() {
        let id = Uuid::new_v4();
        let payload = r#"{"type":"TIME_WARNING","participant_id":"p2","time_remaining_ms":500}"#;
        match decode_message(&format!("ws:{id}"), payload) {
            Some(StoreEvent::Fanout {
                session_id,
                message: FanoutMessage::TimeWarning { .. },
            }) => assert_eq!(session_id, id),
            other => panic!("expected fan-out, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_payload_is_ignored() {
        assert!(decode_message(STATE_CHANNEL, "not json").is_none());
        let id = Uuid::new_v4();
        assert!(decode_message(&format!("ws:{id}"), r#"{"type":"SHRUG"}"#).is_none());
    }

    #[test]
    fn test_unrecognised_channel_is_ignored() {
        assert!(decode_message("other-topic", "{}").is_none());
    }

    #[test]
    fn test_forward_drops_when_full_and_stops_when_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let id = Uuid::new_v4();
        let ev = || StoreEvent::Fanout {
            session_id: id,
            message: FanoutMessage::TimeWarning {
                participant_id: "p1".into(),
                time_remaining_ms: 1,
            },
        };
        assert!(forward(&tx, ev()));
        // Channel full: the event is dropped, the subscription keeps going.
        assert!(forward(&tx, ev()));
        rx.close();
        let _ = rx.try_recv();
        while rx.try_recv().is_ok() {}
        assert!(!forward(&tx, ev()));
    }
}
