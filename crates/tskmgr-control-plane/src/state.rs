//! Shared application state.

use std::sync::Arc;

use crate::config::Config;
use crate::store::{MemoryStore, Store};

/// Shared application state, handed to every service.
pub struct AppState {
    /// Run and task records.
    pub store: Arc<dyn Store>,

    pub config: Config,
}

impl AppState {
    /// Create a new AppState over an in-memory store.
    pub fn new(config: Config) -> Arc<Self> {
        let store = Arc::new(MemoryStore::new(config.lock_timeout()));
        Self::with_store(store, config)
    }

    /// Create a new AppState over an existing store.
    pub fn with_store(store: Arc<dyn Store>, config: Config) -> Arc<Self> {
        Arc::new(Self { store, config })
    }
}
