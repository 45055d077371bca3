//! One recording attempt as seen by its task.

use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::pipeline::SessionMetrics;

/// The single active recording of a channel.
#[derive(Debug)]
pub struct RecordingSession {
    pub started_at: DateTime<Local>,
    pub output_path: PathBuf,
    pub quality: String,
    pub metrics: SessionMetrics,
}

impl RecordingSession {
    pub fn new(started_at: DateTime<Local>, output_path: PathBuf, quality: impl Into<String>) -> Self {
        Self {
            started_at,
            output_path,
            quality: quality.into(),
            metrics: SessionMetrics::default(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            started_at: self.started_at,
            output_path: self.output_path.clone(),
            quality: self.quality.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Immutable copy of a [`RecordingSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub started_at: DateTime<Local>,
    pub output_path: PathBuf,
    pub quality: String,
    pub metrics: SessionMetrics,
}
