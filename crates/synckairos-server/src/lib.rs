//! SyncKairos server — REST + WebSocket boundary over the session core.
//!
//! Routes:
//!   POST   /v1/sessions                          — create (201)
//!   POST   /v1/sessions/:id/start|switch|pause|resume|complete
//!   GET    /v1/sessions/:id                      — derived state + server time
//!   DELETE /v1/sessions/:id
//!   POST   /v1/sessions/:id/participants         — pending sessions only
//!   PATCH  /v1/sessions/:id/participants/:pid    — audited time adjustment
//!   GET    /v1/time                              — server clock
//!   GET    /healthz                              — liveness
//!   GET    /ws?sessionId=<uuid>                  — real-time delivery

pub mod config;
pub mod coordination;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
