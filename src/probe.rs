//! # Auto-Probe (component C)
//!
//! Out-of-band reachability test used in auto-blacklist mode: a host with no
//! existing filter-list entry is probed with a real TLS handshake against
//! its own `:443`, and the Filter Store is updated from the result. The
//! probe never touches the in-flight tunnel; callers spawn it and move on.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::filter::FilterStore;

/// Total budget for the probe's TCP connect + TLS handshake.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(3500);

/// Probes `host:443` and updates `store` accordingly. Intended to be spawned
/// with `tokio::spawn` right after a host is classified as unknown; never
/// awaited by the connection handler itself.
pub async fn probe_and_classify(store: Arc<FilterStore>, host: String) {
    if store.is_whitelisted(&host) || store.is_blacklisted(&host) {
        return;
    }

    match timeout(PROBE_TIMEOUT, attempt_handshake(&host)).await {
        Ok(Ok(())) => {
            store.add_whitelist(&host).await;
            log::debug!("probe: {host} reachable, whitelisted");
        }
        Ok(Err(e)) => {
            store.add_blacklist(&host).await;
            log::debug!("probe: {host} failed ({e}), blacklisted");
        }
        Err(_) => {
            store.add_blacklist(&host).await;
            log::debug!("probe: {host} timed out, blacklisted");
        }
    }
}

async fn attempt_handshake(host: &str) -> Result<(), String> {
    let tcp = TcpStream::connect((host, 443))
        .await
        .map_err(|e| format!("connect failed: {e}"))?;
    let connector = native_tls::TlsConnector::new().map_err(|e| format!("tls setup failed: {e}"))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    connector
        .connect(host, tcp)
        .await
        .map(|_| ())
        .map_err(|e| format!("handshake failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn already_classified_host_is_left_untouched() {
        let store = Arc::new(FilterStore::in_memory());
        store.add_whitelist("known.test").await;
        probe_and_classify(store.clone(), "known.test".to_string()).await;
        // still whitelisted, never became blacklisted by a spurious probe
        assert!(store.is_whitelisted("known.test"));
        assert!(!store.is_blacklisted("known.test"));
    }

    #[tokio::test]
    async fn unreachable_host_is_blacklisted() {
        // TEST-NET-1 (RFC 5737): guaranteed non-routable, connect will fail
        // or time out, exercising the failure path without real network I/O.
        let store = Arc::new(FilterStore::in_memory());
        probe_and_classify(store.clone(), "192.0.2.1".to_string()).await;
        assert!(store.is_blacklisted("192.0.2.1"));
    }
}
