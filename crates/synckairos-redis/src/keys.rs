//! Key and channel naming. One well-known channel for cluster-wide state
//! changes, one channel per session for fan-out.

use uuid::Uuid;

/// Cluster-wide state-change channel.
pub const STATE_CHANNEL: &str = "session-updates";

/// Pattern matching every per-session fan-out channel.
pub const FANOUT_PATTERN: &str = "ws:*";

/// Default record TTL, refreshed on every write.
pub const DEFAULT_TTL_SECS: u64 = 3_600;

pub fn session_key(session_id: Uuid) -> String {
    format!("synckairos:session:{session_id}")
}

pub fn fanout_channel(session_id: Uuid) -> String {
    format!("ws:{session_id}")
}

/// Session id embedded in a fan-out channel name, if any.
pub fn parse_fanout_channel(channel: &str) -> Option<Uuid> {
    channel.strip_prefix("ws:").and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_channel_round_trip() {
        let id = Uuid::new_v4();
        assert_eq!(parse_fanout_channel(&fanout_channel(id)), Some(id));
    }

    #[test]
    fn test_parse_rejects_foreign_channels() {
        assert_eq!(parse_fanout_channel("session-updates"), None);
        assert_eq!(parse_fanout_channel("ws:not-a-uuid"), None);
    }
}
