//! Per-instance connection registry: `session_id → live client handles`.
//!
//! Broadcasts serialise a frame once and write it to every local handle
//! through that handle's queue, so writes to one socket are serialised by
//! its writer task while distinct sockets proceed in parallel. A failed
//! write terminates the handle; the subscriber loop is never blocked by a
//! slow client. Per session the registry keeps a version high-water mark,
//! so STATE_UPDATE delivery is monotonic in `version` and duplicate
//! pub/sub deliveries collapse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// WebSocket close codes used by the delivery layer.
pub mod close {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const POLICY: u16 = 1008;
    pub const INTERNAL: u16 = 1011;
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct SessionChannel {
    clients: HashMap<Uuid, ClientHandle>,
    /// Highest snapshot version delivered to this session's clients.
    last_version: u64,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionChannel>>,
    connections: AtomicUsize,
}

/// What `register` hands to the socket task. `tx` lets the reader half
/// answer protocol messages through the same serialised writer.
pub struct Registration {
    pub conn_id: Uuid,
    pub tx: mpsc::UnboundedSender<Message>,
    pub rx: mpsc::UnboundedReceiver<Message>,
    pub alive: Arc<AtomicBool>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub async fn register(&self, session_id: Uuid) -> Registration {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id).or_default().clients.insert(
            conn_id,
            ClientHandle {
                tx: tx.clone(),
                alive: alive.clone(),
            },
        );
        self.connections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%session_id, %conn_id, "client registered");

        Registration {
            conn_id,
            tx,
            rx,
            alive,
        }
    }

    pub async fn unregister(&self, session_id: Uuid, conn_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(channel) = sessions.get_mut(&session_id) {
            if channel.clients.remove(&conn_id).is_some() {
                self.connections.fetch_sub(1, Ordering::Relaxed);
                tracing::debug!(%session_id, %conn_id, "client unregistered");
            }
            if channel.clients.is_empty() {
                sessions.remove(&session_id);
            }
        }
    }

    /// Deliver a STATE_UPDATE frame to every local handle of the session.
    /// Frames older than (or equal to) the session's high-water mark are
    /// dropped — receivers already saw a `>= version` snapshot.
    pub async fn broadcast_state(&self, session_id: Uuid, version: u64, frame: String) -> usize {
        let mut sessions = self.sessions.write().await;
        let Some(channel) = sessions.get_mut(&session_id) else {
            return 0;
        };
        if version <= channel.last_version {
            tracing::debug!(
                %session_id,
                version,
                last_version = channel.last_version,
                "dropping stale snapshot"
            );
            return 0;
        }
        channel.last_version = version;

        let delivered = Self::send_to_all(channel, Message::Text(frame));
        self.prune_dead(&mut sessions, session_id);
        delivered
    }

    /// Out-of-band frame (time warnings): no version gate.
    pub async fn broadcast_fanout(&self, session_id: Uuid, frame: String) -> usize {
        let mut sessions = self.sessions.write().await;
        let Some(channel) = sessions.get_mut(&session_id) else {
            return 0;
        };
        let delivered = Self::send_to_all(channel, Message::Text(frame));
        self.prune_dead(&mut sessions, session_id);
        delivered
    }

    /// Tombstone: deliver SESSION_DELETED, then close every handle with
    /// code 1000 and drop the whole session entry.
    pub async fn broadcast_deleted(&self, session_id: Uuid, frame: String) {
        let mut sessions = self.sessions.write().await;
        let Some(mut channel) = sessions.remove(&session_id) else {
            return;
        };
        let n = channel.clients.len();
        for handle in channel.clients.values_mut() {
            let _ = handle.tx.send(Message::Text(frame.clone()));
            let _ = handle.tx.send(close_message(close::NORMAL, "session deleted"));
        }
        self.connections.fetch_sub(n, Ordering::Relaxed);
        tracing::debug!(%session_id, clients = n, "session deleted, handles closed");
    }

    /// Heartbeat tick: terminate handles that missed the previous round,
    /// clear the flag on the rest and ping them.
    pub async fn sweep(&self) {
        let mut sessions = self.sessions.write().await;
        let mut reaped = 0usize;
        for channel in sessions.values_mut() {
            let before = channel.clients.len();
            channel.clients.retain(|conn_id, handle| {
                if !handle.alive.swap(false, Ordering::AcqRel) {
                    tracing::debug!(%conn_id, "heartbeat missed, terminating handle");
                    let _ = handle.tx.send(close_message(close::GOING_AWAY, "heartbeat timeout"));
                    return false;
                }
                handle.tx.send(Message::Ping(Vec::new())).is_ok()
            });
            reaped += before - channel.clients.len();
        }
        sessions.retain(|_, c| !c.clients.is_empty());
        if reaped > 0 {
            self.connections.fetch_sub(reaped, Ordering::Relaxed);
        }
    }

    /// Shutdown: close every handle with 1001 and clear the registry.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        let mut n = 0usize;
        for channel in sessions.values_mut() {
            for handle in channel.clients.values_mut() {
                let _ = handle.tx.send(close_message(close::GOING_AWAY, "server shutting down"));
                n += 1;
            }
        }
        sessions.clear();
        self.connections.store(0, Ordering::Relaxed);
        tracing::info!(clients = n, "delivery layer shut down");
    }

    fn send_to_all(channel: &mut SessionChannel, frame: Message) -> usize {
        let mut delivered = 0usize;
        for handle in channel.clients.values() {
            if handle.tx.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop handles whose writer task is gone (send fails on a closed
    /// channel).
    fn prune_dead(&self, sessions: &mut HashMap<Uuid, SessionChannel>, session_id: Uuid) {
        if let Some(channel) = sessions.get_mut(&session_id) {
            let before = channel.clients.len();
            channel.clients.retain(|_, h| !h.tx.is_closed());
            let removed = before - channel.clients.len();
            if removed > 0 {
                self.connections.fetch_sub(removed, Ordering::Relaxed);
            }
            if channel.clients.is_empty() {
                sessions.remove(&session_id);
            }
        }
    }
}
