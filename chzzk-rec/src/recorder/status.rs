//! Single-writer publication of [`TaskStatus`].

use tokio::sync::watch;

use super::state::{TaskPhase, TaskStatus};
use super::session::RecordingSession;

/// Write half of a task's status. Not `Clone`: the owning task is the only
/// writer.
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<TaskStatus>,
}

impl StatusPublisher {
    pub fn new(initial: TaskStatus) -> (Self, watch::Receiver<TaskStatus>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    pub fn phase(&self, phase: TaskPhase) {
        self.tx.send_modify(|s| {
            if !phase.is_recording() {
                s.session = None;
            }
            s.phase = phase;
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|s| s.last_error = Some(message));
    }

    pub fn clear_error(&self) {
        self.tx.send_if_modified(|s| s.last_error.take().is_some());
    }

    pub fn config_problem(&self, problem: Option<String>) {
        self.tx.send_if_modified(|s| {
            if s.config_problem == problem {
                return false;
            }
            s.config_problem = problem;
            true
        });
    }

    /// Enter `Recording` with the given session.
    pub fn recording(&self, session: &RecordingSession) {
        let snapshot = session.snapshot();
        self.tx.send_modify(|s| {
            s.phase = TaskPhase::Recording;
            s.session = Some(snapshot);
        });
    }

    pub fn session(&self, session: &RecordingSession) {
        let snapshot = session.snapshot();
        self.tx.send_modify(|s| s.session = Some(snapshot));
    }
}
