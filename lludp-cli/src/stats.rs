//! Statistics display and formatting

use lludp::protocol::ConnectionStats;
use lludp::{AgentId, PacketCategory};
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

/// Format a round-trip time in human-readable form
pub fn format_rtt(rtt: Duration) -> String {
    let us = rtt.as_micros();
    if us >= 1_000_000 {
        format!("{:.2}s", us as f64 / 1_000_000.0)
    } else if us >= 1_000 {
        format!("{:.2}ms", us as f64 / 1_000.0)
    } else {
        format!("{}µs", us)
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
    } else {
        format!("{}s", seconds)
    }
}

/// Resent packets as a percentage of everything sent
pub fn resend_ratio(stats: &ConnectionStats) -> f64 {
    if stats.packets_sent == 0 {
        0.0
    } else {
        stats.packets_resent as f64 * 100.0 / stats.packets_sent as f64
    }
}

/// Sum the statistics of several connections
pub fn aggregate(stats: &[ConnectionStats]) -> ConnectionStats {
    let mut total = ConnectionStats::default();
    for s in stats {
        total.packets_sent += s.packets_sent;
        total.packets_received += s.packets_received;
        total.packets_resent += s.packets_resent;
        total.packets_dropped += s.packets_dropped;
        total.duplicates += s.duplicates;
        total.acks_sent += s.acks_sent;
        total.bytes_sent += s.bytes_sent;
        total.bytes_received += s.bytes_received;
        for (sum, n) in total.sent_by_category.iter_mut().zip(s.sent_by_category.iter()) {
            *sum += n;
        }
    }
    total
}

/// Display a per-connection statistics table
pub fn display_connection_stats(connections: &[(AgentId, ConnectionStats)], uptime: Duration) {
    println!("\n┌──────────────────────────────────────┬──────────┬──────────┬────────┬─────────┬──────┐");
    println!(
        "│ Agent                                │ Sent     │ Received │ Resent │ Dropped │ Dups │  up {}",
        format_duration(uptime)
    );
    println!("├──────────────────────────────────────┼──────────┼──────────┼────────┼─────────┼──────┤");

    for (agent, stats) in connections {
        println!(
            "│ {:36} │ {:8} │ {:8} │ {:6} │ {:7} │ {:4} │",
            agent.to_string(),
            format_bytes(stats.bytes_sent),
            format_bytes(stats.bytes_received),
            stats.packets_resent,
            stats.packets_dropped,
            stats.duplicates
        );
    }

    println!("└──────────────────────────────────────┴──────────┴──────────┴────────┴─────────┴──────┘");

    let total = aggregate(
        &connections
            .iter()
            .map(|(_, stats)| stats.clone())
            .collect::<Vec<_>>(),
    );
    let categories: Vec<String> = PacketCategory::ALL
        .iter()
        .filter(|c| total.sent_in(**c) > 0)
        .map(|c| format!("{}={}", c, total.sent_in(*c)))
        .collect();
    if !categories.is_empty() {
        println!("  sent by category: {}", categories.join(" "));
    }
}

/// Display compact stats on one line
pub fn compact_stats(connection_count: usize, total: &ConnectionStats, uptime: Duration) -> String {
    format!(
        "[{:8}] Circuits: {} | Sent: {} ({} pkts) | Recv: {} ({} pkts) | Resent: {:.1}% | Acks: {}",
        format_duration(uptime),
        connection_count,
        format_bytes(total.bytes_sent),
        total.packets_sent,
        format_bytes(total.bytes_received),
        total.packets_received,
        resend_ratio(total),
        total.acks_sent
    )
}
