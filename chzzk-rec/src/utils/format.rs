//! Human-readable formatting for sizes, rates and durations.

use std::time::Duration;

const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Format a byte count, e.g. `1.23 MB`.
pub fn format_size(bytes: f64) -> String {
    if bytes <= 0.0 || !bytes.is_finite() {
        return "0 B".to_string();
    }
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", SIZE_UNITS[unit])
}

/// Format a bitrate given in bits per second as kbps.
pub fn format_bitrate(bits_per_sec: Option<f64>) -> String {
    match bits_per_sec {
        Some(bps) if bps > 0.0 => format!("{:.2} kbps", bps / 1000.0),
        _ => "N/A".to_string(),
    }
}

/// Format a throughput given in bytes per second.
pub fn format_throughput(bytes_per_sec: Option<f64>) -> String {
    match bytes_per_sec {
        Some(rate) if rate >= 0.0 => format!("{}/s", format_size(rate)),
        _ => "N/A".to_string(),
    }
}

/// Format a duration as `HH:MM:SS`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Truncate to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0.0), "0 B");
        assert_eq!(format_size(512.0), "512.00 B");
        assert_eq!(format_size(1536.0), "1.50 KB");
        assert_eq!(format_size(3.0 * 1024.0 * 1024.0 * 1024.0), "3.00 GB");
    }

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(Some(6_000_000.0)), "6000.00 kbps");
        assert_eq!(format_bitrate(None), "N/A");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long error message", 10), "a very ...");
    }
}
