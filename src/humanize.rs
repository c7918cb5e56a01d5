//! Human-readable byte, rate and duration formatting for logs and the CLI

use std::time::Duration;

const UNITS: &[(&str, u64)] = &[
    ("TB", 1024 * 1024 * 1024 * 1024),
    ("GB", 1024 * 1024 * 1024),
    ("MB", 1024 * 1024),
    ("KB", 1024),
];

/// `1536` -> `1.5KB`; whole multiples drop the decimal
pub fn format_bytes(bytes: u64) -> String {
    for &(unit, divisor) in UNITS {
        if bytes >= divisor {
            let whole = bytes / divisor;
            let decimal = (bytes % divisor) * 10 / divisor;
            return if decimal > 0 {
                format!("{}.{}{}", whole, decimal, unit)
            } else {
                format!("{}{}", whole, unit)
            };
        }
    }
    format!("{}B", bytes)
}

/// Average throughput, e.g. `2MB/s`
pub fn format_rate(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "-".to_string();
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}

/// Compact duration for ETAs: `45s`, `3m05s`, `2h10m`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}
