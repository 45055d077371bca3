//! Read-through access to the shared session cookies.
//!
//! The cookies are owned by the external settings editor. Tasks never keep a
//! copy across a resolution boundary: they call [`CredentialsProvider::get`]
//! every time and the provider serves a cached value until it is invalidated
//! or replaced. A cache miss reads the file on the blocking pool.

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::store::ConfigStore;
use super::types::Credentials;

enum Source {
    Store(ConfigStore),
    Fixed,
}

/// Shared, read-locked credentials accessor.
pub struct CredentialsProvider {
    source: Source,
    cached: RwLock<Option<Credentials>>,
}

impl CredentialsProvider {
    /// Provider backed by the configuration file.
    pub fn from_store(store: ConfigStore) -> Self {
        Self {
            source: Source::Store(store),
            cached: RwLock::new(None),
        }
    }

    /// Provider with a constant value that never touches disk.
    pub fn fixed(credentials: Credentials) -> Self {
        Self {
            source: Source::Fixed,
            cached: RwLock::new(Some(credentials)),
        }
    }

    /// Current credentials, loading them on first access after an invalidation.
    pub async fn get(&self) -> Credentials {
        let cached = self.cached.read().clone();
        if let Some(credentials) = cached {
            return credentials;
        }

        let Source::Store(store) = &self.source else {
            return Credentials::default();
        };
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.load_credentials()).await {
            Ok(fresh) => self.replace(fresh),
            Err(e) => {
                warn!(error = %e, "Credentials load task failed");
                Credentials::default()
            }
        }
    }

    /// Drop the cached value; the next [`get`](Self::get) re-reads the source.
    pub fn invalidate(&self) {
        if matches!(self.source, Source::Store(_)) {
            debug!("Credentials cache invalidated");
            *self.cached.write() = None;
        }
    }

    /// Install credentials the caller already read, e.g. on a config reload.
    pub fn replace(&self, fresh: Credentials) -> Credentials {
        if matches!(self.source, Source::Fixed) {
            return self.cached.read().clone().unwrap_or_default();
        }
        let mut cached = self.cached.write();
        if cached.as_ref() != Some(&fresh) {
            info!(authenticated = !fresh.is_empty(), "Credentials loaded");
        }
        *cached = Some(fresh.clone());
        fresh
    }
}
