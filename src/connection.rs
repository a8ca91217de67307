//! Per-connection data: the connection record (§3) and the idle timestamp
//! shared between a connection's two pipes and its watchdog.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Monotonic "last activity" clock shared by both directions of a tunnel and
/// its idle watchdog. Stored as whole seconds since the handler started,
/// which is plenty of resolution for a multi-second idle timeout and keeps
/// the watchdog lock-free.
#[derive(Debug)]
pub struct IdleState {
    started: Instant,
    last_activity_secs: AtomicI64,
}

impl IdleState {
    pub fn new() -> Arc<IdleState> {
        Arc::new(IdleState {
            started: Instant::now(),
            last_activity_secs: AtomicI64::new(0),
        })
    }

    /// Marks activity as having happened just now.
    pub fn touch(&self) {
        let elapsed = self.started.elapsed().as_secs() as i64;
        self.last_activity_secs.store(elapsed, Ordering::Relaxed);
    }

    /// Seconds since the last `touch()` call (or since creation, if none).
    pub fn idle_for_secs(&self) -> i64 {
        let elapsed = self.started.elapsed().as_secs() as i64;
        elapsed - self.last_activity_secs.load(Ordering::Relaxed)
    }
}

/// The request method tag recorded on a connection (§3: "method tag").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTag {
    Connect,
    Http,
}

impl MethodTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodTag::Connect => "CONNECT",
            MethodTag::Http => "HTTP",
        }
    }
}

/// One per accepted socket; created on accept, finalized after both pipes
/// terminate and the access-log line (if any) is written.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: u64,
    pub peer_addr: String,
    pub host: String,
    pub port: u16,
    pub method: MethodTag,
    pub started_at: DateTime<Utc>,
    pub created_at: Instant,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub whitelisted: bool,
    pub fragmented: bool,
    pub error_kind: Option<&'static str>,
}

impl ConnectionRecord {
    pub fn new(id: u64, peer_addr: String, host: String, port: u16, method: MethodTag) -> Self {
        ConnectionRecord {
            id,
            peer_addr,
            host,
            port,
            method,
            started_at: Utc::now(),
            created_at: Instant::now(),
            bytes_in: 0,
            bytes_out: 0,
            whitelisted: false,
            fragmented: false,
            error_kind: None,
        }
    }

    pub fn duration_ms(&self) -> u128 {
        self.created_at.elapsed().as_millis()
    }

    pub fn mark_error(&mut self, kind: &'static str) {
        self.error_kind = Some(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_state_resets_on_touch() {
        let idle = IdleState::new();
        assert!(idle.idle_for_secs() >= 0);
        idle.touch();
        assert_eq!(idle.idle_for_secs(), 0);
    }

    #[test]
    fn connection_record_starts_clean() {
        let rec = ConnectionRecord::new(1, "127.0.0.1:1234".to_string(), "example.com".to_string(), 443, MethodTag::Connect);
        assert!(!rec.whitelisted);
        assert!(!rec.fragmented);
        assert!(rec.error_kind.is_none());
        assert_eq!(rec.bytes_in, 0);
    }
}
