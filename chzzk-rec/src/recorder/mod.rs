//! Per-channel recording tasks.

pub mod backoff;
pub mod session;
pub mod state;
pub mod status;
pub mod task;

pub use backoff::Backoff;
pub use session::{RecordingSession, SessionSnapshot};
pub use state::{TaskPhase, TaskStatus};
pub use task::{RecordingTask, TaskContext, TaskSettings};
