//! # Logging & Access/Error Log (component I)
//!
//! Structured diagnostic logging goes through the standard `log` facade,
//! initialized by [`init_logging`]. Separately, the two optional
//! append-only record files (access log, error log) are plain
//! line-oriented files the connection handler writes to directly — they
//! are a feature of this proxy, not a `log` crate sink.

use std::io;
use std::path::Path;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::connection::ConnectionRecord;

/// Initializes the `env_logger` backend. `verbose` maps to `debug`, otherwise
/// `info`; both are overridable with `RUST_LOG` as usual.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

/// One-line-per-connection record of src/dst/method/bytes/flags, matching
/// the fields in `ConnectionRecord`.
pub struct AccessLog {
    file: Mutex<tokio::fs::File>,
}

impl AccessLog {
    pub async fn open(path: &Path) -> io::Result<AccessLog> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(AccessLog { file: Mutex::new(file) })
    }

    pub async fn record(&self, conn: &ConnectionRecord) {
        let mut line = format!(
            "{} | {} -> {}:{} | {} | IN:{} OUT:{}",
            conn.started_at.to_rfc3339(),
            conn.peer_addr,
            conn.host,
            conn.port,
            conn.method.as_str(),
            conn.bytes_in,
            conn.bytes_out,
        );
        if conn.whitelisted {
            line.push_str(" | WHITELISTED");
        }
        if conn.fragmented {
            line.push_str(" | FRAGMENTED");
        }
        if let Some(kind) = conn.error_kind {
            line.push_str(" | ERROR:");
            line.push_str(kind);
        }
        line.push('\n');

        let mut f = self.file.lock().await;
        if let Err(e) = f.write_all(line.as_bytes()).await {
            log::warn!("failed to write access log line: {e}");
            return;
        }
        let _ = f.flush().await;
    }
}

/// One-line-per-error-event record, used for errors the operator wants
/// durably recorded independent of stderr (which may be redirected or
/// rotated out from under a long-running process).
pub struct ErrorLog {
    file: Mutex<tokio::fs::File>,
}

impl ErrorLog {
    pub async fn open(path: &Path) -> io::Result<ErrorLog> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(ErrorLog { file: Mutex::new(file) })
    }

    pub async fn record(&self, context: &str, kind_tag: &str, detail: &str) {
        let line = format!("{} | {} | {} | {}\n", chrono::Utc::now().to_rfc3339(), context, kind_tag, detail);
        let mut f = self.file.lock().await;
        if let Err(e) = f.write_all(line.as_bytes()).await {
            log::warn!("failed to write error log line: {e}");
            return;
        }
        let _ = f.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionRecord, MethodTag};

    #[tokio::test]
    async fn access_log_appends_one_line_per_record() {
        let mut path = std::env::temp_dir();
        path.push(format!("fragproxy-access-test-{}.log", std::process::id()));
        let log = AccessLog::open(&path).await.unwrap();

        let mut conn = ConnectionRecord::new(1, "1.2.3.4:5".to_string(), "example.com".to_string(), 443, MethodTag::Connect);
        conn.bytes_in = 10;
        conn.bytes_out = 20;
        conn.fragmented = true;
        log.record(&conn).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("FRAGMENTED"));
        assert!(contents.contains("example.com"));

        let _ = std::fs::remove_file(&path);
    }
}
