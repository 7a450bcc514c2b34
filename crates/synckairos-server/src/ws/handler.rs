//! WebSocket upgrade path and per-connection protocol.
//!
//! Each accepted socket splits into a writer task draining the handle's
//! queue (one writer per socket: writes are serialised) and the reader
//! loop below. The reader answers `PING` and `REQUEST_SYNC`/`RECONNECT`,
//! flips the liveness flag on protocol pongs, and ignores anything it
//! does not recognise.

use std::sync::atomic::Ordering;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use synckairos_core::wire::{ClientFrame, ServerFrame};
use synckairos_core::SyncError;

use crate::state::AppState;
use crate::ws::registry::{close, Registration};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// `GET /ws?sessionId=<uuid>`. A missing or malformed session id is a
/// policy violation: the socket is accepted and immediately closed 1008.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match query
        .session_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
    {
        Some(session_id) => ws.on_upgrade(move |socket| client_session(state, session_id, socket)),
        None => {
            tracing::warn!(session_id = ?query.session_id, "rejecting handshake: bad sessionId");
            ws.on_upgrade(reject_policy)
        }
    }
}

async fn reject_policy(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close::POLICY,
            reason: "sessionId must be a UUID".into(),
        })))
        .await;
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json));
        }
        Err(e) => tracing::error!(error = %e, "frame encode failed"),
    }
}

async fn client_session(state: AppState, session_id: Uuid, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let Registration {
        conn_id,
        tx,
        mut rx,
        alive,
    } = state.registry.register(session_id).await;

    // Writer half: the only task touching the sink.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    send_frame(
        &tx,
        &ServerFrame::Connected {
            session_id,
            timestamp: state.service.clock().now(),
        },
    );

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Ping) => {
                    send_frame(
                        &tx,
                        &ServerFrame::Pong {
                            timestamp: state.service.clock().now(),
                        },
                    );
                }
                Ok(ClientFrame::RequestSync | ClientFrame::Reconnect) => {
                    let frame = match state.service.get_session(session_id).await {
                        Ok(view) => ServerFrame::StateSync {
                            session_id,
                            timestamp: state.service.clock().now(),
                            state: view,
                        },
                        Err(e @ SyncError::NotFound(_)) => ServerFrame::Error {
                            code: "SESSION_NOT_FOUND".into(),
                            message: e.to_string(),
                        },
                        Err(e) => ServerFrame::Error {
                            code: e.code().into(),
                            message: e.to_string(),
                        },
                    };
                    send_frame(&tx, &frame);
                }
                Err(e) => {
                    tracing::debug!(%conn_id, error = %e, "ignoring unrecognised client frame");
                }
            },
            Message::Pong(_) => {
                alive.store(true, Ordering::Release);
            }
            // Transport-level pings are answered by the stack.
            Message::Ping(_) => {}
            Message::Binary(_) => {
                tracing::warn!(%conn_id, "binary frame on a text protocol, closing");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: close::POLICY,
                    reason: "text frames only".into(),
                })));
                break;
            }
            Message::Close(_) => break,
        }
    }

    state.registry.unregister(session_id, conn_id).await;
    drop(tx);
    let _ = writer.await;
    tracing::debug!(%session_id, %conn_id, "socket closed");
}
