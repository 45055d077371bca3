//! The recording pipeline: a stream fetcher piped into a remuxing encoder.

pub mod command;
pub mod metrics;
pub mod progress;
pub mod proxy;
pub mod reader;
pub mod supervisor;

pub use command::PipelineConfig;
pub use metrics::SessionMetrics;
pub use supervisor::{PipelineExit, PipelineOutcome, PipelineRequest, PipelineRunner, PipelineSupervisor};
