//! SyncKairos core — the authoritative session model and timing engine.
//!
//! This crate holds everything that does not touch a socket or a database:
//! the session record and its invariants, the pure state-machine engine
//! (`engine`), the wire frame definitions shared by every boundary, the
//! storage/audit/clock port traits, and the `SessionService` that drives
//! the optimistic-concurrency protocol over those ports.
//!
//! Adapters live in sibling crates: `synckairos-redis` implements
//! [`ports::SessionStore`], `synckairos-audit` implements
//! [`ports::AuditSink`], and `synckairos-server` exposes the REST and
//! WebSocket surfaces.

pub mod audit;
pub mod clock;
pub mod engine;
pub mod error;
pub mod ports;
pub mod service;
pub mod session;
pub mod wire;

pub use error::SyncError;
pub use service::SessionService;
pub use session::{Participant, SessionView, SyncMode, SyncSession, SyncStatus};

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, SyncError>;
