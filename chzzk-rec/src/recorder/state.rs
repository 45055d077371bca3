//! Per-channel task status.

use std::fmt;
use std::time::Duration;

use crate::recorder::session::SessionSnapshot;

/// Phase of a recording task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPhase {
    /// Waiting for its start delay.
    Idle,
    Polling,
    Resolving,
    Recording,
    /// Waiting out a backoff delay after consecutive failures.
    Retrying { attempt: u32, delay: Duration },
    Stopped,
}

impl TaskPhase {
    pub fn label(&self) -> &'static str {
        match self {
            TaskPhase::Idle => "Idle",
            TaskPhase::Polling => "Polling",
            TaskPhase::Resolving => "Resolving",
            TaskPhase::Recording => "Recording",
            TaskPhase::Retrying { .. } => "Retrying",
            TaskPhase::Stopped => "Stopped",
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, TaskPhase::Recording)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Retrying { attempt, delay } => {
                write!(f, "Retrying #{attempt} ({}s)", delay.as_secs())
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Snapshot of one task, as shown on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub identifier: String,
    pub channel: String,
    pub phase: TaskPhase,
    pub last_error: Option<String>,
    /// Present while recording.
    pub session: Option<SessionSnapshot>,
    /// Set when credentials keep getting rejected.
    pub config_problem: Option<String>,
}

impl TaskStatus {
    pub fn new(identifier: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            channel: channel.into(),
            phase: TaskPhase::Idle,
            last_error: None,
            session: None,
            config_problem: None,
        }
    }
}
