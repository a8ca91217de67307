//! HTTP/HTTPS forwarding proxy that fragments the first TLS handshake
//! record of a `CONNECT` tunnel to evade naive DPI-based SNI blocking.
//!
//! The binary entry point is a thin `clap` wrapper (`main.rs`) around
//! [`supervisor::ProxyServer`]; everything else here is usable as a library.

pub mod config;
pub mod connection;
pub mod counters;
pub mod error;
pub mod filter;
pub mod fragment;
pub mod handler;
pub mod host;
pub mod logging;
pub mod pipe;
pub mod probe;
pub mod registry;
pub mod stats;
pub mod supervisor;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use supervisor::ProxyServer;
