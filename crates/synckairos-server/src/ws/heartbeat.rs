//! Heartbeat: every 5 seconds, terminate handles that never answered the
//! previous ping, then ping the survivors.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::ws::registry::ConnectionRegistry;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub fn spawn(registry: Arc<ConnectionRegistry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        // The first tick fires immediately; skip it so fresh connections
        // get a full interval before their first liveness check.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.sweep().await;
        }
    })
}
