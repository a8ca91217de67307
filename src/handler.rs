//! # Connection Handler (component D)
//!
//! `handle_connection` drives one accepted socket through
//! `READ_REQ → CLASSIFY → (HTTPS_CONNECT | HTTP_FORWARD) → PIPING → CLOSING`.
//! Every fallible step maps to a `ProxyError` variant, logged and folded
//! into the connection record; nothing here panics the task.

use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::connection::{ConnectionRecord, IdleState, MethodTag};
use crate::counters::Counters;
use crate::error::ProxyError;
use crate::filter::FilterStore;
use crate::fragment::fragment_first_record;
use crate::host::{canonicalize, split_host_port};
use crate::logging::{AccessLog, ErrorLog};
use crate::pipe::{run_idle_watchdog, run_pipe, Direction};
use crate::probe;
use crate::registry::Registry;

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_BUF_SIZE: usize = 64 * 1024;
const UPSTREAM_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared, cheaply-cloned dependencies every connection handler needs.
pub struct HandlerContext {
    pub config: Arc<ProxyConfig>,
    pub filters: Arc<FilterStore>,
    pub counters: Arc<Counters>,
    pub registry: Arc<Registry>,
    pub access_log: Option<Arc<AccessLog>>,
    pub error_log: Option<Arc<ErrorLog>>,
}

fn tune_socket(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("failed to set TCP_NODELAY: {e}");
    }
    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_keepalive(true) {
        log::debug!("failed to set SO_KEEPALIVE: {e}");
    }
}

/// Entry point spawned by the supervisor for each accepted socket.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: String,
    ctx: Arc<HandlerContext>,
    shutdown: CancellationToken,
) {
    tune_socket(&stream);
    ctx.counters.inc_total_connections();

    let cancel = shutdown.child_token();
    let conn_id = ctx.registry.register(cancel.clone());

    let mut record = run(stream, &peer_addr, &ctx, cancel).await;

    if let Some(access_log) = &ctx.access_log {
        if let Some(rec) = record.take() {
            access_log.record(&rec).await;
        }
    }
    ctx.registry.deregister(conn_id);
}

async fn run(
    mut stream: TcpStream,
    peer_addr: &str,
    ctx: &Arc<HandlerContext>,
    cancel: CancellationToken,
) -> Option<ConnectionRecord> {
    // READ_REQ
    let mut buf = vec![0u8; REQUEST_BUF_SIZE];
    let n = match timeout(REQUEST_READ_TIMEOUT, tokio::io::AsyncReadExt::read(&mut stream, &mut buf)).await {
        Ok(Ok(0)) => return None,
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            log_error(ctx, "read_req", ProxyError::PipeIo(e)).await;
            ctx.counters.inc_failed();
            return None;
        }
        Err(_) => {
            ctx.counters.inc_failed();
            log_error(ctx, "read_req", ProxyError::ClientProtocol("client read timeout".to_string())).await;
            return None;
        }
    };
    buf.truncate(n);

    // CLASSIFY
    let (method, host, port) = match parse_request(&buf) {
        Ok(v) => v,
        Err(e) => {
            ctx.counters.inc_failed();
            log_error(ctx, "classify", e).await;
            return None;
        }
    };
    let canon = canonicalize(&host);
    let whitelisted = ctx.filters.is_whitelisted(&canon.value);

    let mut record = ConnectionRecord::new(0, peer_addr.to_string(), canon.value.clone(), port, method);
    record.whitelisted = whitelisted;
    if whitelisted {
        ctx.counters.inc_whitelisted();
    }

    if ctx.config.auto_blacklist && !whitelisted && canon.persistable {
        let filters = ctx.filters.clone();
        let probe_host = canon.value.clone();
        tokio::spawn(probe::probe_and_classify(filters, probe_host));
    }

    let outcome = match method {
        MethodTag::Connect => https_connect(&mut stream, &host, port, whitelisted, ctx, &mut record, cancel).await,
        MethodTag::Http => http_forward(&mut stream, &buf, &host, port, ctx, &mut record, cancel).await,
    };

    if let Err(e) = outcome {
        ctx.counters.inc_failed();
        record.mark_error(e.kind_tag());
        log_error(ctx, "handler", e).await;
    }

    let _ = stream.shutdown().await;
    Some(record)
}

fn parse_request(buf: &[u8]) -> Result<(MethodTag, String, u16), ProxyError> {
    let text_end = buf.iter().position(|&b| b == b'\r' || b == b'\n').unwrap_or(buf.len());
    let first_line = &buf[..text_end];
    let mut parts = first_line.split(|&b| b == b' ').filter(|p| !p.is_empty());
    let method_bytes = parts.next().ok_or_else(|| ProxyError::ClientProtocol("empty request line".to_string()))?;
    let uri_bytes = parts
        .next()
        .ok_or_else(|| ProxyError::ClientProtocol("missing request target".to_string()))?;

    if method_bytes.eq_ignore_ascii_case(b"CONNECT") {
        let uri = String::from_utf8_lossy(uri_bytes);
        let (host, port) = split_host_port(&uri);
        if host.is_empty() {
            return Err(ProxyError::ClientProtocol("empty CONNECT target".to_string()));
        }
        return Ok((MethodTag::Connect, host.to_string(), port.unwrap_or(443)));
    }

    let host_header = find_host_header(buf).ok_or_else(|| ProxyError::ClientProtocol("missing Host header".to_string()))?;
    let (host, port) = split_host_port(&host_header);
    if host.is_empty() {
        return Err(ProxyError::ClientProtocol("empty Host header".to_string()));
    }
    Ok((MethodTag::Http, host.to_string(), port.unwrap_or(80)))
}

fn find_host_header(buf: &[u8]) -> Option<String> {
    for line in buf.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() >= 5 && line[..5].eq_ignore_ascii_case(b"host:") {
            let value = String::from_utf8_lossy(&line[5..]).trim().to_string();
            return Some(value);
        }
    }
    None
}

async fn dial_upstream(host: &str, port: u16) -> Result<TcpStream, ProxyError> {
    match timeout(UPSTREAM_DIAL_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => Ok(s),
        Ok(Err(e)) => Err(ProxyError::UpstreamUnreachable(format!("{host}:{port}: {e}"))),
        Err(_) => Err(ProxyError::UpstreamUnreachable(format!("{host}:{port}: dial timeout"))),
    }
}

async fn https_connect(
    client: &mut TcpStream,
    host: &str,
    port: u16,
    whitelisted: bool,
    ctx: &Arc<HandlerContext>,
    record: &mut ConnectionRecord,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
        .map_err(ProxyError::PipeIo)?;
    client.flush().await.map_err(ProxyError::PipeIo)?;

    let mut remote = dial_upstream(host, port).await?;
    tune_socket(&remote);

    if !whitelisted {
        let (mut client_read, mut remote_write) = client.split();
        match fragment_first_record(&mut client_read, &mut remote_write).await {
            Ok(fragmented) => {
                record.fragmented = fragmented;
                if fragmented {
                    ctx.counters.inc_fragmented();
                }
            }
            Err(e) => {
                log_error(ctx, "fragment", e).await;
            }
        }
    }

    pipe_both_directions(client, &mut remote, ctx, record, cancel).await
}

async fn http_forward(
    client: &mut TcpStream,
    initial_bytes: &[u8],
    host: &str,
    port: u16,
    ctx: &Arc<HandlerContext>,
    record: &mut ConnectionRecord,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    let mut remote = match dial_upstream(host, port).await {
        Ok(r) => r,
        Err(e) => {
            let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
            return Err(e);
        }
    };
    tune_socket(&remote);

    remote.write_all(initial_bytes).await.map_err(ProxyError::PipeIo)?;
    remote.flush().await.map_err(ProxyError::PipeIo)?;

    pipe_both_directions(client, &mut remote, ctx, record, cancel).await
}

async fn pipe_both_directions(
    client: &mut TcpStream,
    remote: &mut TcpStream,
    ctx: &Arc<HandlerContext>,
    record: &mut ConnectionRecord,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    let (client_read, client_write) = client.split();
    let (remote_read, remote_write) = remote.split();

    let idle = IdleState::new();
    idle.touch();

    let out_cancel = cancel.clone();
    let in_cancel = cancel.clone();
    let wd_cancel = cancel.clone();

    let counters_out = ctx.counters.clone();
    let counters_in = ctx.counters.clone();
    let idle_out = idle.clone();
    let idle_in = idle.clone();
    let idle_wd = idle.clone();
    let idle_timeout = ctx.config.idle_timeout_secs;

    let (bytes_out, bytes_in, ()) = tokio::join!(
        async {
            tokio::select! {
                biased;
                r = run_pipe(client_read, remote_write, idle_out, counters_out, Direction::ClientToOrigin, out_cancel) => r,
            }
        },
        async {
            tokio::select! {
                biased;
                r = run_pipe(remote_read, client_write, idle_in, counters_in, Direction::OriginToClient, in_cancel) => r,
            }
        },
        run_idle_watchdog(idle_wd, idle_timeout, wd_cancel),
    );

    cancel.cancel();

    if let Ok(n) = bytes_out {
        record.bytes_out += n;
    }
    if let Ok(n) = bytes_in {
        record.bytes_in += n;
    }

    let _ = timeout(CLOSE_DRAIN_TIMEOUT, client.shutdown()).await;
    let _ = timeout(CLOSE_DRAIN_TIMEOUT, remote.shutdown()).await;

    Ok(())
}

async fn log_error(ctx: &Arc<HandlerContext>, context: &str, err: ProxyError) {
    log::debug!("{context}: {err}");
    if let Some(error_log) = &ctx.error_log {
        error_log.record(context, err.kind_tag(), &err.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_connect_request_line() {
        let buf = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        let (method, host, port) = parse_request(buf).unwrap();
        assert_eq!(method, MethodTag::Connect);
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn parse_connect_request_defaults_to_443() {
        let buf = b"CONNECT example.com HTTP/1.1\r\n\r\n";
        let (_, _, port) = parse_request(buf).unwrap();
        assert_eq!(port, 443);
    }

    #[test]
    fn parse_http_request_reads_host_header() {
        let buf = b"GET / HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test\r\n\r\n";
        let (method, host, port) = parse_request(buf).unwrap();
        assert_eq!(method, MethodTag::Http);
        assert_eq!(host, "example.com");
        assert_eq!(port, 80);
    }

    #[test]
    fn parse_http_request_without_host_header_errors() {
        let buf = b"GET / HTTP/1.1\r\n\r\n";
        assert!(parse_request(buf).is_err());
    }

    #[test]
    fn parse_malformed_request_line_errors() {
        let buf = b"\r\n\r\n";
        assert!(parse_request(buf).is_err());
    }
}
