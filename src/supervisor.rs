//! # Listener / Supervisor (component F)
//!
//! Owns the TCP listener, the active-connection registry, the stats
//! reporter, and the signal-driven shutdown sequence. `ProxyServer::run`
//! is the library's single long-running entry point.

use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::counters::Counters;
use crate::error::ProxyError;
use crate::filter::FilterStore;
use crate::handler::{handle_connection, HandlerContext};
use crate::logging::{AccessLog, ErrorLog};
use crate::registry::Registry;
use crate::stats::{print_final_summary, run_stats_reporter};

const LISTEN_BACKLOG: i32 = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// The running proxy core. Construct with [`ProxyServer::new`] and drive
/// with [`ProxyServer::run`].
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    filters: Arc<FilterStore>,
    counters: Arc<Counters>,
    registry: Arc<Registry>,
    access_log: Option<Arc<AccessLog>>,
    error_log: Option<Arc<ErrorLog>>,
}

impl ProxyServer {
    /// Validates `config`, loads the filter store, and opens the two
    /// optional log files. Returns a fatal `ProxyError::Config` on any of
    /// these startup steps failing (§7.1).
    pub async fn new(config: ProxyConfig) -> Result<ProxyServer, ProxyError> {
        config.validate()?;

        let filters = FilterStore::load(
            &config.blacklist_path,
            config.whitelist_path.as_deref(),
            config.auto_blacklist,
        )?;

        let access_log = match &config.access_log_path {
            Some(path) => Some(Arc::new(AccessLog::open(path).await.map_err(|e| {
                ProxyError::Config(format!("failed to open access log {}: {e}", path.display()))
            })?)),
            None => None,
        };
        let error_log = match &config.error_log_path {
            Some(path) => Some(Arc::new(ErrorLog::open(path).await.map_err(|e| {
                ProxyError::Config(format!("failed to open error log {}: {e}", path.display()))
            })?)),
            None => None,
        };

        Ok(ProxyServer {
            config: Arc::new(config),
            filters: Arc::new(filters),
            counters: Arc::new(Counters::new()),
            registry: Arc::new(Registry::new()),
            access_log,
            error_log,
        })
    }

    fn bind_listener(&self) -> Result<TcpListener, ProxyError> {
        let addr: std::net::SocketAddr = self.config.listen_addr().parse().map_err(|e| {
            ProxyError::Config(format!("invalid listen address {}: {e}", self.config.listen_addr()))
        })?;

        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|e| ProxyError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        socket.set_reuse_address(true).ok();
        #[cfg(unix)]
        {
            if let Err(e) = socket.set_reuse_port(true) {
                log::debug!("SO_REUSEPORT not supported: {e}");
            }
        }
        socket.set_nonblocking(true).map_err(|e| ProxyError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        socket.bind(&SockAddr::from(addr)).map_err(|e| ProxyError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        socket.listen(LISTEN_BACKLOG).map_err(|e| ProxyError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        TcpListener::from_std(socket.into()).map_err(|e| ProxyError::Bind {
            addr: addr.to_string(),
            source: e,
        })
    }

    /// Accepts connections until SIGINT/SIGTERM, then runs the graceful
    /// shutdown sequence described in §4.F.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = self.bind_listener()?;
        log::info!("listening on {}", self.config.listen_addr());

        let shutdown = CancellationToken::new();
        let handler_ctx = Arc::new(HandlerContext {
            config: self.config.clone(),
            filters: self.filters.clone(),
            counters: self.counters.clone(),
            registry: self.registry.clone(),
            access_log: self.access_log.clone(),
            error_log: self.error_log.clone(),
        });

        let stats_handle = tokio::spawn(run_stats_reporter(
            self.counters.clone(),
            self.registry.clone(),
            self.config.quiet,
            shutdown.child_token(),
        ));

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| ProxyError::Config(e.to_string()))?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| ProxyError::Config(e.to_string()))?;

        loop {
            tokio::select! {
                biased;
                _ = sigterm.recv() => { log::info!("received SIGTERM, shutting down"); break; }
                _ = sigint.recv() => { log::info!("received SIGINT, shutting down"); break; }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let ctx = handler_ctx.clone();
                            let token = shutdown.clone();
                            let counters = self.counters.clone();
                            let peer = addr.to_string();
                            let task = tokio::spawn(async move {
                                handle_connection(stream, peer, ctx, token).await;
                            });
                            tokio::spawn(async move {
                                if let Err(e) = task.await {
                                    if e.is_panic() {
                                        log::error!("connection handler panicked: {e}");
                                        counters.inc_failed();
                                    }
                                }
                            });
                        }
                        Err(e) => log::warn!("accept failed: {e}"),
                    }
                }
            }
        }

        shutdown.cancel();
        self.registry.cancel_all();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, wait_for_drain(&self.registry)).await;
        stats_handle.abort();

        print_final_summary(self.counters.snapshot());
        Ok(())
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    pub fn filters(&self) -> Arc<FilterStore> {
        self.filters.clone()
    }
}

async fn wait_for_drain(registry: &Registry) {
    while registry.len() > 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
