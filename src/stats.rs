//! # Stats reporter (component K)
//!
//! Differences successive [`CountersSnapshot`]s roughly once a second into
//! DL/UL throughput and prints a single-line, carriage-return-refreshed
//! status line — unless `quiet` suppresses it, in which case the task still
//! runs so the final summary on shutdown has fresh numbers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::counters::{Counters, CountersSnapshot};
use crate::registry::Registry;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Runs until `cancel` fires, printing one refreshed line per tick when
/// `quiet` is false.
pub async fn run_stats_reporter(counters: Arc<Counters>, registry: Arc<Registry>, quiet: bool, cancel: CancellationToken) {
    let mut last = counters.snapshot();
    let mut last_at = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(REPORT_INTERVAL) => {}
        }

        let now = counters.snapshot();
        let elapsed = last_at.elapsed().as_secs_f64();
        let (speed_in, speed_out) = if elapsed > 0.0 {
            (
                (now.bytes_in.saturating_sub(last.bytes_in)) as f64 * 8.0 / elapsed,
                (now.bytes_out.saturating_sub(last.bytes_out)) as f64 * 8.0 / elapsed,
            )
        } else {
            (0.0, 0.0)
        };

        if !quiet {
            print!(
                "\r\x1b[2K[STATS] Conns: {} | Active: {} | Fragmented: {} | Whitelisted: {} | Failed: {} | DL: {} | UL: {} | Speed DL: {} | Speed UL: {}",
                now.total_connections,
                registry.len(),
                now.fragmented,
                now.whitelisted,
                now.failed,
                format_size(now.bytes_in),
                format_size(now.bytes_out),
                format_speed(speed_in),
                format_speed(speed_out),
            );
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }

        last = now;
        last_at = Instant::now();
    }
}

/// Prints the final, newline-terminated summary on shutdown.
pub fn print_final_summary(snapshot: CountersSnapshot) {
    println!(
        "\n[STATS] final: conns={} fragmented={} whitelisted={} failed={} in={} out={}",
        snapshot.total_connections,
        snapshot.fragmented,
        snapshot.whitelisted,
        snapshot.failed,
        format_size(snapshot.bytes_in),
        format_size(snapshot.bytes_out),
    );
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

fn format_speed(bits_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["bps", "Kbps", "Mbps", "Gbps"];
    let mut speed = bits_per_sec;
    let mut unit = 0;
    while speed >= 1000.0 && unit < UNITS.len() - 1 {
        speed /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", speed, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_scales_units() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn format_speed_scales_units() {
        assert_eq!(format_speed(500.0), "500.0 bps");
        assert_eq!(format_speed(1_500.0), "1.5 Kbps");
        assert_eq!(format_speed(2_500_000.0), "2.5 Mbps");
    }
}
