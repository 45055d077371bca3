//! Multi-channel Chzzk live stream recorder.
//!
//! One [`recorder::RecordingTask`] per configured channel polls the live
//! status, resolves the HLS stream and runs a `streamlink | ffmpeg` pipeline
//! while the channel is live. The [`manager::TaskManager`] owns the task set
//! and the [`dashboard`] renders their status.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod manager;
pub mod monitor;
pub mod panic_hook;
pub mod pipeline;
pub mod recorder;
pub mod resolver;
pub mod utils;

pub use error::{Error, Result};
