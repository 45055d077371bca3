//! Logging setup: reloadable filter, console and daily file output, and a
//! broadcast feed of events for the live dashboard.

use std::fmt as std_fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Event, Metadata, Subscriber, debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, Filter};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::utils::fs;

pub const DEFAULT_LOG_FILTER: &str = "chzzk_rec=info,process_utils=info";

/// Daily files are named `chzzk-rec.log.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "chzzk-rec.log";

const LOG_RETENTION_DAYS: i64 = 7;

const LOG_BROADCAST_CAPACITY: usize = 1024;

/// Encoder messages that are kept out of the log file.
const FILE_NOISE: &[&str] = &["Invalid DTS"];

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std_fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// One log event, as published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl std_fmt::Display for LogEvent {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        let local = self.timestamp.with_timezone(&Local);
        write!(f, "{} {:>5} {}", local.format("%H:%M:%S"), self.level, self.message)
    }
}

/// Where log output goes.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub log_dir: PathBuf,
    /// Write human-readable output to the terminal.
    pub console: bool,
    /// Write daily-rotated files into `log_dir`.
    pub file: bool,
}

/// Handle to the installed logging stack.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_tx: broadcast::Sender<LogEvent>,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Replace the filter directive, e.g. `chzzk_rec=debug`.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::Other(format!("Invalid filter directive: {e}")))?;
        self.handle
            .reload(filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {e}")))?;
        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.log_tx.subscribe()
    }

    /// Delete old log files once a day until cancelled.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let period = Duration::from_secs(24 * 60 * 60);
            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS, Utc::now()).await {
                    warn!(error = %e, "Failed to clean up old logs");
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Log retention task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });
    }
}

/// Delete `chzzk-rec.log.YYYY-MM-DD` files dated before `now - retention_days`.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64, now: DateTime<Utc>) -> std::io::Result<usize> {
    let cutoff = (now - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{LOG_FILE_PREFIX}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}

fn is_noise(message: &str) -> bool {
    FILE_NOISE.iter().any(|pattern| message.contains(pattern))
}

/// Per-layer filter dropping [`FILE_NOISE`] messages.
struct DropNoise;

impl<S> Filter<S> for DropNoise {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &Context<'_, S>) -> bool {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        !is_noise(&message)
    }
}

struct BroadcastLayer {
    tx: broadcast::Sender<LogEvent>,
}

impl<S> Layer<S> for BroadcastLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));

        let _ = self.tx.send(LogEvent {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message,
        });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std_fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
        } else if self.0.is_empty() {
            *self.0 = format!("{}: {value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" || self.0.is_empty() {
            *self.0 = value.to_string();
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the program; it is `None` when file logging is off.
pub fn init_logging(options: &LoggingOptions) -> crate::Result<(Arc<LoggingConfig>, Option<WorkerGuard>)> {
    let (file_layer, guard) = if options.file {
        fs::ensure_dir_all_sync_with_op("creating log directory", &options.log_dir)?;
        let appender = tracing_appender::rolling::daily(&options.log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_timer(LocalTimer)
            .with_filter(DropNoise);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = options
        .console
        .then(|| fmt::layer().with_ansi(true).with_timer(LocalTimer));

    let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, handle) = reload::Layer::new(initial);

    let (log_tx, _) = broadcast::channel(LOG_BROADCAST_CAPACITY);
    let broadcast_layer = BroadcastLayer { tx: log_tx.clone() };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .with(broadcast_layer)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    let config = Arc::new(LoggingConfig {
        handle,
        log_tx,
        log_dir: options.log_dir.clone(),
    });
    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_noise_filter() {
        assert!(is_noise("[mpegts @ 0x55] Invalid DTS: 1234 PTS: 1200"));
        assert!(!is_noise("Recording started"));
    }

    #[test]
    fn test_log_event_line() {
        let event = LogEvent {
            timestamp: Utc::now(),
            level: "WARN".to_string(),
            target: "chzzk_rec::recorder".to_string(),
            message: "Recording failed".to_string(),
        };
        let line = event.to_string();
        assert!(line.ends_with(" WARN Recording failed"), "{line}");
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let dir = TempDir::new().unwrap();
        for name in [
            "chzzk-rec.log.2024-05-01",
            "chzzk-rec.log.2024-05-08",
            "chzzk-rec.log.2024-05-09",
            "chzzk-rec.log.2024-05-10",
            "chzzk-rec.log.garbage",
            "other.log.2024-01-01",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let now = Utc.with_ymd_and_hms(2024, 5, 16, 12, 0, 0).unwrap();

        let deleted = cleanup_old_logs(dir.path(), 7, now).await.unwrap();

        assert_eq!(deleted, 2);
        assert!(!dir.path().join("chzzk-rec.log.2024-05-01").exists());
        assert!(!dir.path().join("chzzk-rec.log.2024-05-08").exists());
        assert!(dir.path().join("chzzk-rec.log.2024-05-09").exists());
        assert!(dir.path().join("chzzk-rec.log.garbage").exists());
        assert!(dir.path().join("other.log.2024-01-01").exists());
    }
}
