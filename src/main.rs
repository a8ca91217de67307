//! # CLI entry point (component J)
//!
//! Thin `clap`-derived argument surface that builds a [`fragproxy::ProxyConfig`]
//! and hands it to [`fragproxy::ProxyServer`]. No proxy logic lives here.

use std::path::PathBuf;

use clap::Parser;

use fragproxy::config::{DEFAULT_BLACKLIST_FILE, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT};
use fragproxy::{ProxyConfig, ProxyServer};

/// HTTP/HTTPS proxy with TLS ClientHello fragmentation support.
#[derive(Parser, Debug)]
#[command(name = "fragproxy", version, about)]
struct Cli {
    /// Proxy host to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Proxy port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Close connections after N seconds of inactivity (0 to disable).
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    idle_timeout: u64,

    /// Path to blacklist file. Mutually exclusive with --autoblacklist.
    #[arg(long, default_value = DEFAULT_BLACKLIST_FILE, conflicts_with = "autoblacklist")]
    blacklist: PathBuf,

    /// Automatic detection of blocked domains instead of a static blacklist.
    #[arg(long)]
    autoblacklist: bool,

    /// Path to whitelist file (domains that bypass fragmentation).
    #[arg(long)]
    whitelist: Option<PathBuf>,

    /// Path to access log file.
    #[arg(long = "log_access")]
    log_access: Option<PathBuf>,

    /// Path to error log file.
    #[arg(long = "log_error")]
    log_error: Option<PathBuf>,

    /// Suppress console output.
    #[arg(short, long)]
    quiet: bool,

    /// Show detailed debug info.
    #[arg(short, long)]
    verbose: bool,
}

impl From<Cli> for ProxyConfig {
    fn from(cli: Cli) -> Self {
        ProxyConfig {
            host: cli.host,
            port: cli.port,
            blacklist_path: cli.blacklist,
            whitelist_path: cli.whitelist,
            auto_blacklist: cli.autoblacklist,
            access_log_path: cli.log_access,
            error_log_path: cli.log_error,
            idle_timeout_secs: cli.idle_timeout,
            quiet: cli.quiet,
            verbose: cli.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let quiet = cli.quiet;
    fragproxy::logging::init_logging(verbose);

    let config: ProxyConfig = cli.into();

    let server = match ProxyServer::new(config).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to start proxy: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if !quiet {
        println!("fragproxy listening, press Ctrl+C to stop");
    }

    if let Err(e) = server.run().await {
        log::error!("proxy exited with error: {e}");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}
