//! Pure rendering of the dashboard frame.

use std::time::Duration;

use chrono::{DateTime, Local};
use colored::Colorize;
use tabled::{Table, Tabled, settings::Style};

use crate::recorder::{TaskPhase, TaskStatus};
use crate::utils::format::{format_bitrate, format_duration, format_size, format_throughput, truncate};

/// Log lines shown above the table.
pub const LOG_LINES: usize = 15;

/// Width of the last-error column.
pub const ERROR_WIDTH: usize = 40;

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Elapsed")]
    elapsed: String,
    #[tabled(rename = "Bitrate")]
    bitrate: String,
    #[tabled(rename = "Throughput")]
    throughput: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Last error")]
    error: String,
}

fn phase_cell(phase: &TaskPhase, color: bool) -> String {
    let text = phase.to_string();
    if !color {
        return text;
    }
    match phase {
        TaskPhase::Recording => text.green().bold().to_string(),
        TaskPhase::Polling | TaskPhase::Resolving => text.cyan().to_string(),
        TaskPhase::Retrying { .. } => text.yellow().to_string(),
        TaskPhase::Stopped => text.red().to_string(),
        TaskPhase::Idle => text.dimmed().to_string(),
    }
}

fn row(status: &TaskStatus, color: bool, now: DateTime<Local>) -> Row {
    let (elapsed, bitrate, throughput, size) = match &status.session {
        Some(session) => {
            let metrics = &session.metrics;
            let elapsed = if metrics.elapsed.is_zero() {
                (now - session.started_at).to_std().unwrap_or(Duration::ZERO)
            } else {
                metrics.elapsed
            };
            (
                format_duration(elapsed),
                format_bitrate(metrics.bitrate_bps),
                format_throughput(metrics.throughput_bps),
                format_size(metrics.bytes_written as f64),
            )
        }
        None => Default::default(),
    };

    // A credentials problem outranks the latest transient error.
    let error = status
        .config_problem
        .as_deref()
        .map(|p| format!("config: {p}"))
        .or_else(|| status.last_error.clone())
        .map(|e| truncate(&e, ERROR_WIDTH))
        .unwrap_or_default();

    Row {
        channel: status.channel.clone(),
        status: phase_cell(&status.phase, color),
        elapsed,
        bitrate,
        throughput,
        size,
        error,
    }
}

/// Render one frame: recent log lines, then the status table.
pub fn render(statuses: &[TaskStatus], logs: &[String], color: bool, now: DateTime<Local>) -> String {
    let mut out = String::new();

    let skip = logs.len().saturating_sub(LOG_LINES);
    for line in &logs[skip..] {
        out.push_str(line);
        out.push('\n');
    }
    if !logs.is_empty() {
        out.push('\n');
    }

    if statuses.is_empty() {
        out.push_str("No active recordings.\n");
        return out;
    }

    let recording = statuses.iter().filter(|s| s.phase.is_recording()).count();
    let rows: Vec<Row> = statuses.iter().map(|s| row(s, color, now)).collect();
    out.push_str(&Table::new(rows).with(Style::modern()).to_string());
    out.push('\n');
    out.push_str(&format!(
        "{} channels, {recording} recording | {}\n",
        statuses.len(),
        now.format("%Y-%m-%d %H:%M:%S")
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SessionMetrics;
    use crate::recorder::SessionSnapshot;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap()
    }

    fn recording_status() -> TaskStatus {
        let mut status = TaskStatus::new("ch1", "Streamer");
        status.phase = TaskPhase::Recording;
        status.session = Some(SessionSnapshot {
            started_at: now() - chrono::Duration::seconds(90),
            output_path: PathBuf::from("out.ts.part"),
            quality: "1080p".to_string(),
            metrics: SessionMetrics {
                elapsed: Duration::from_secs(3725),
                media_secs: Some(3720.0),
                bitrate_bps: Some(6_000_000.0),
                throughput_bps: Some(750_000.0),
                bytes_written: 2_147_483_648,
                speed: Some(1.0),
            },
        });
        status
    }

    #[test]
    fn test_empty_board() {
        let frame = render(&[], &[], false, now());
        assert_eq!(frame, "No active recordings.\n");
    }

    #[test]
    fn test_recording_row() {
        let frame = render(&[recording_status()], &[], false, now());
        assert!(frame.contains("Streamer"));
        assert!(frame.contains("Recording"));
        assert!(frame.contains("01:02:05"));
        assert!(frame.contains("6000.00 kbps"));
        assert!(frame.contains("2.00 GB"));
        assert!(frame.contains("1 channels, 1 recording"));
    }

    #[test]
    fn test_elapsed_falls_back_to_start_time() {
        let mut status = recording_status();
        if let Some(session) = status.session.as_mut() {
            session.metrics = SessionMetrics::default();
        }
        let frame = render(&[status], &[], false, now());
        assert!(frame.contains("00:01:30"));
    }

    #[test]
    fn test_error_is_truncated_and_config_problem_wins() {
        let mut polling = TaskStatus::new("ch2", "Other");
        polling.phase = TaskPhase::Polling;
        polling.last_error = Some("x".repeat(100));

        let mut flagged = TaskStatus::new("ch3", "Flagged");
        flagged.last_error = Some("Authentication error: nope".to_string());
        flagged.config_problem = Some("credentials rejected 3 times in a row".to_string());

        let frame = render(&[polling, flagged], &[], false, now());
        assert!(!frame.contains(&"x".repeat(ERROR_WIDTH + 1)));
        assert!(frame.contains("config: credentials"));
        assert!(!frame.contains("nope"));
    }

    #[test]
    fn test_only_last_log_lines_shown() {
        let logs: Vec<String> = (0..20).map(|i| format!("line {i:02}")).collect();
        let frame = render(&[], &logs, false, now());
        assert!(!frame.contains("line 04"));
        assert!(frame.contains("line 05"));
        assert!(frame.contains("line 19"));
    }
}
