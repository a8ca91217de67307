//! # Configuration
//!
//! `ProxyConfig` is the typed settings contract every other component reads.
//! It carries no argument-parsing logic of its own: the CLI entry point
//! (`main.rs`) is the only place `std::env::args` is touched, matching how
//! this codebase keeps presentation concerns (argv, a console banner) out of
//! the core that the library half of the crate exposes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// Default idle timeout in seconds, matching the original tool's default.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8881;

/// Default blacklist file name used when the operator doesn't override it.
pub const DEFAULT_BLACKLIST_FILE: &str = "blacklist.txt";

/// Settings shared by every component of the proxy.
///
/// Built either by the CLI entry point or directly by an embedding caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on, e.g. `127.0.0.1`.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Path to the blacklist file. Ignored when `auto_blacklist` is set.
    pub blacklist_path: PathBuf,

    /// Path to the whitelist file. Created empty if missing.
    pub whitelist_path: Option<PathBuf>,

    /// When set, static blacklist loading is skipped and the auto-probe
    /// classifies unknown hosts at connection time instead.
    pub auto_blacklist: bool,

    /// Optional path for the one-line-per-connection access log.
    pub access_log_path: Option<PathBuf>,

    /// Optional path for the one-line-per-error-event error log.
    pub error_log_path: Option<PathBuf>,

    /// Seconds of inactivity before a connection is force-closed. 0 disables.
    pub idle_timeout_secs: u64,

    /// Suppress the stats line and startup banner.
    pub quiet: bool,

    /// Enable verbose per-connection logging (whitelist hits, idle closes, …).
    pub verbose: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            blacklist_path: PathBuf::from(DEFAULT_BLACKLIST_FILE),
            whitelist_path: None,
            auto_blacklist: false,
            access_log_path: None,
            error_log_path: None,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            quiet: false,
            verbose: false,
        }
    }
}

impl ProxyConfig {
    /// Listen address in `host:port` form.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the combination of fields that only make sense together,
    /// returning a fatal `ProxyError::Config` on inconsistency (§7.1).
    ///
    /// This does not touch the filesystem; `FilterStore::load` performs the
    /// "file present" check, since only it knows whether auto-blacklist mode
    /// makes a missing blacklist file acceptable.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.port == 0 {
            return Err(ProxyError::Config("port must be nonzero".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(ProxyError::Config("host must not be empty".to_string()));
        }
        Ok(())
    }
}
