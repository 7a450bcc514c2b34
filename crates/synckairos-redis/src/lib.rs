//! Primary-store adapters for SyncKairos.
//!
//! [`RedisSessionStore`] is the production implementation of the
//! `SessionStore` port: scripted compare-and-swap on `version`, TTL
//! refresh on every write, and pub/sub publication of state changes.
//! [`MemorySessionStore`] mirrors the same semantics over a process-local
//! map for dev mode and tests. [`subscriber`] owns the process-global
//! subscription that feeds the delivery layer.

pub mod keys;
pub mod memory;
pub mod store;
pub mod subscriber;

pub use memory::MemorySessionStore;
pub use store::RedisSessionStore;
