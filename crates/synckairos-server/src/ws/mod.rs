//! Real-time delivery layer: connection registry, upgrade handler, and
//! the heartbeat sweep.

pub mod handler;
pub mod heartbeat;
pub mod registry;
