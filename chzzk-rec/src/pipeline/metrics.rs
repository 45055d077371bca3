//! Live metrics of a recording attempt.

use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::progress::{ProgressReport, ThroughputWindow};

/// Minimum interval between two published metric updates.
pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot of a running recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetrics {
    /// Wall-clock time since the pipeline started.
    pub elapsed: Duration,
    /// Media time written, as reported by the encoder.
    pub media_secs: Option<f64>,
    pub bitrate_bps: Option<f64>,
    /// Averaged write rate in bytes per second.
    pub throughput_bps: Option<f64>,
    pub bytes_written: u64,
    pub speed: Option<f64>,
}

/// Folds progress reports into [`SessionMetrics`] and publishes them at most
/// once per [`PUBLISH_INTERVAL`].
pub struct MetricsTracker {
    started: Instant,
    throughput: ThroughputWindow,
    current: SessionMetrics,
    last_publish: Option<Instant>,
    tx: watch::Sender<SessionMetrics>,
}

impl MetricsTracker {
    pub fn new(tx: watch::Sender<SessionMetrics>, started: Instant) -> Self {
        Self {
            started,
            throughput: ThroughputWindow::new(),
            current: SessionMetrics::default(),
            last_publish: None,
            tx,
        }
    }

    pub fn record(&mut self, report: &ProgressReport, now: Instant) {
        self.current.elapsed = now.saturating_duration_since(self.started);
        if let Some(secs) = report.out_time_secs {
            self.current.media_secs = Some(secs);
        }
        if let Some(bitrate) = report.bitrate_bps {
            self.current.bitrate_bps = Some(bitrate);
        }
        if let Some(speed) = report.speed {
            self.current.speed = Some(speed);
        }
        if let Some(size) = report.total_size {
            self.current.bytes_written = size;
            if let Some(rate) = self.throughput.record(size, now) {
                self.current.throughput_bps = Some(rate);
            }
        }

        let due = self
            .last_publish
            .is_none_or(|last| now.saturating_duration_since(last) >= PUBLISH_INTERVAL);
        if due || report.finished {
            self.publish(now);
        }
    }

    /// Publish the current snapshot regardless of throttling.
    pub fn publish(&mut self, now: Instant) {
        self.current.elapsed = now.saturating_duration_since(self.started);
        self.last_publish = Some(now);
        self.tx.send_replace(self.current.clone());
    }

    pub fn current(&self) -> &SessionMetrics {
        &self.current
    }
}
