//! Error kinds for the proxy core.
//!
//! The design deliberately models *kinds*, not a deep error type hierarchy:
//! every per-connection failure collapses into one `ProxyError` variant that
//! the handler can log and fold into the connection record's error flag.
//! Nothing in here is fatal to the process except the two startup variants.

use std::io;

/// Startup or per-connection error kind.
///
/// `Config` and `Bind` are fatal at process startup (§7.1-2 of the design).
/// Every other variant is scoped to a single connection and is caught by the
/// handler's outermost error path; it never unwinds past a connection task.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Missing required file, bad port, or an otherwise inconsistent config.
    #[error("configuration error: {0}")]
    Config(String),

    /// Listener bind failed (address in use, permission denied).
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Malformed request line, missing Host header, oversized request.
    #[error("client protocol error: {0}")]
    ClientProtocol(String),

    /// Upstream dial failed (timeout, refused, DNS failure).
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Fragmentation-specific I/O failure (short record, timeout, write failure).
    #[error("fragmentation error: {0}")]
    Fragmentation(String),

    /// Connection was idle past the configured timeout.
    #[error("connection idle")]
    Idle,

    /// I/O failure while piping one direction.
    #[error("pipe I/O error: {0}")]
    PipeIo(#[from] io::Error),
}

impl ProxyError {
    /// Short tag used in the connection record and access log, e.g. `FRAGMENT`.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            ProxyError::Config(_) => "CONFIG",
            ProxyError::Bind { .. } => "BIND",
            ProxyError::ClientProtocol(_) => "CLIENT_PROTOCOL",
            ProxyError::UpstreamUnreachable(_) => "UPSTREAM_UNREACHABLE",
            ProxyError::Fragmentation(_) => "FRAGMENTATION",
            ProxyError::Idle => "IDLE",
            ProxyError::PipeIo(_) => "PIPE_IO",
        }
    }
}
