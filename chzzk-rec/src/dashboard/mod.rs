//! Live terminal dashboard.
//!
//! Every tick it takes a snapshot of the status board and redraws the whole
//! screen. Tasks appearing or disappearing between ticks are simply absent
//! from or new in the next frame.

pub mod render;

use std::collections::VecDeque;
use std::io::{IsTerminal, Write};
use std::time::Duration;

use chrono::Local;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::logging::LogEvent;
use crate::manager::StatusBoard;

pub use render::{LOG_LINES, render};

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const CLEAR_SCREEN: &str = "\x1B[2J\x1B[H";

pub struct Dashboard {
    board: StatusBoard,
    logs: broadcast::Receiver<LogEvent>,
    recent: VecDeque<String>,
    color: bool,
}

impl Dashboard {
    pub fn new(board: StatusBoard, logs: broadcast::Receiver<LogEvent>) -> Self {
        Self {
            board,
            logs,
            recent: VecDeque::with_capacity(LOG_LINES),
            color: std::io::stdout().is_terminal(),
        }
    }

    /// Pull buffered log events, keeping the last [`LOG_LINES`].
    fn drain_logs(&mut self) {
        loop {
            match self.logs.try_recv() {
                Ok(event) => {
                    if self.recent.len() == LOG_LINES {
                        self.recent.pop_front();
                    }
                    self.recent.push_back(event.to_string());
                }
                Err(TryRecvError::Lagged(skipped)) => debug!(skipped, "Dashboard skipped log events"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Render the current frame.
    pub fn frame(&mut self) -> String {
        self.drain_logs();
        let logs: Vec<String> = self.recent.iter().cloned().collect();
        render(&self.board.snapshot(), &logs, self.color, Local::now())
    }

    /// Redraw every [`REFRESH_INTERVAL`] until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let frame = self.frame();
                    let mut stdout = std::io::stdout().lock();
                    let _ = write!(stdout, "{CLEAR_SCREEN}{frame}");
                    let _ = stdout.flush();
                }
            }
        }
    }
}
