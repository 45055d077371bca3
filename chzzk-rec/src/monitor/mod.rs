//! Live status detection.
//!
//! [`LiveStatusClient`] is the seam the recording task polls through; the
//! production implementation talks to the Chzzk live-detail API.

pub mod client;
pub mod models;

pub use client::{ChzzkClient, LiveStatusClient, auth_headers};
pub use models::{LiveDetail, LiveInfo, LiveStatus, Media};
