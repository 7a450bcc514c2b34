//! Environment-driven configuration, read once at startup.
//!
//!   PORT                — listen port (default 8080)
//!   REDIS_URL           — primary-store endpoint (required)
//!   DATABASE_URL        — audit-store endpoint (required)
//!   LOG_LEVEL           — tracing filter directive (default "info")
//!   DB_POOL_MAX         — audit pool size (default 10)
//!   SESSION_TTL_SECS    — record TTL, refreshed on writes (default 3600)
//!   AUDIT_QUEUE_DEPTH   — audit channel capacity (default 1000)
//!   SHUTDOWN_GRACE_SECS — teardown deadline (default 15)

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub database_url: String,
    pub log_level: String,
    pub db_pool_max: u32,
    pub session_ttl_secs: u64,
    pub audit_queue_depth: usize,
    pub shutdown_grace_secs: u64,
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            port: parsed_or("PORT", 8080),
            redis_url: std::env::var("REDIS_URL").context("REDIS_URL must be set")?,
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            db_pool_max: parsed_or("DB_POOL_MAX", 10),
            session_ttl_secs: parsed_or("SESSION_TTL_SECS", 3_600),
            audit_queue_depth: parsed_or("AUDIT_QUEUE_DEPTH", 1_000),
            shutdown_grace_secs: parsed_or("SHUTDOWN_GRACE_SECS", 15),
        })
    }
}
