//! Statistics display and formatting
//!
//! Progress goes to stderr: stdout may be carrying the received payload.

use gbn_protocol::TransferStats;
use std::io::{self, Write};
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else if secs > 0 {
        format!("{}s", seconds)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Percentage of `done` out of `total`, 0 when the total is unknown
pub fn percent(done: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => (done as f64 * 100.0 / total as f64).min(100.0),
        _ => 0.0,
    }
}

/// One-line progress summary
pub fn compact_line(stats: &TransferStats) -> String {
    let done = stats.packets_sent.max(stats.packets_received);
    format!(
        "[{:>8}] {:5.1}% | Packets: {} | Retransmitted: {} | Bytes: {} | Rate: {}",
        format_duration(stats.elapsed()),
        percent(done, stats.expected_packets),
        done,
        stats.packets_retransmitted,
        format_bytes(stats.bytes_sent.max(stats.bytes_received)),
        format_bandwidth(stats.throughput_bps()),
    )
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(stats: &TransferStats) {
    let mut err = io::stderr();
    let _ = write!(err, "\r{}         ", compact_line(stats));
    let _ = err.flush();
}

/// Display the final transfer summary
pub fn display_transfer_summary(title: &str, stats: &TransferStats) {
    eprintln!();
    eprintln!("┌─────────────────────────────────────────────────────────────┐");
    eprintln!("│ {:<59} │", title);
    eprintln!("├─────────────────────────────────────────────────────────────┤");
    eprintln!(
        "│ {:<59} │",
        format!("Duration:       {}", format_duration(stats.elapsed()))
    );
    eprintln!(
        "│ {:<59} │",
        format!(
            "Packets:        {} sent / {} received / {} dropped",
            stats.packets_sent, stats.packets_received, stats.packets_dropped
        )
    );
    eprintln!(
        "│ {:<59} │",
        format!(
            "Bytes:          {} sent / {} received",
            format_bytes(stats.bytes_sent),
            format_bytes(stats.bytes_received)
        )
    );
    eprintln!(
        "│ {:<59} │",
        format!(
            "Recovery:       {} retransmitted / {} go-back-n rounds",
            stats.packets_retransmitted, stats.go_back_n_rounds
        )
    );
    eprintln!(
        "│ {:<59} │",
        format!(
            "Acks:           {} / {} forced duplicates",
            stats.acks, stats.duplicate_acks
        )
    );
    eprintln!(
        "│ {:<59} │",
        format!("Throughput:     {}", format_bandwidth(stats.throughput_bps()))
    );
    eprintln!("└─────────────────────────────────────────────────────────────┘");
}
