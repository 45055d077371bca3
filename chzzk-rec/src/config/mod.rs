//! Configuration loading.
//!
//! All settings live in a single `config.json` owned by the external settings
//! editor. The recorder only reads it: every section is decoded on its own so
//! that one malformed value never takes the others down with it.

pub mod credentials;
pub mod migrate;
pub mod store;
pub mod types;

pub use credentials::CredentialsProvider;
pub use store::ConfigStore;
pub use types::{Channel, Config, Credentials, RecorderSettings};
