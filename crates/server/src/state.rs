//! Application state shared across handlers.

use crate::persist::FilePersister;
use hopper_core::config::AppConfig;
use hopper_metadata::SessionStore;
use hopper_storage::Spool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Per-session-key lock registry.
///
/// The orchestrator holds a key's lock across the whole
/// append -> check -> finalize sequence. A second request for the same key
/// while the lock is held is rejected with a busy response rather than
/// interleaved; requests for distinct keys never contend.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the lock for a session key without waiting.
    /// Returns None if another request for the same key is in flight.
    pub fn try_acquire(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.inner.lock().expect("session lock registry poisoned");
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }

    /// Drop registry entries for keys with no lock holder.
    /// Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        let mut map = self.inner.lock().expect("session lock registry poisoned");
        let before = map.len();
        // A held guard keeps a clone of the Arc alive, so strong_count == 1
        // means nobody is inside the key's critical section.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("session lock registry poisoned").len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The staging spool.
    pub spool: Arc<Spool>,
    /// Session and form-token store.
    pub sessions: Arc<dyn SessionStore>,
    /// Single-shot persistence collaborator.
    pub persister: Arc<dyn FilePersister>,
    /// Per-session-key serialization.
    pub locks: SessionLocks,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Panics
    ///
    /// Panics if sweep configuration validation fails; a bad interval must
    /// not pass startup silently.
    pub fn new(
        config: AppConfig,
        spool: Arc<Spool>,
        sessions: Arc<dyn SessionStore>,
        persister: Arc<dyn FilePersister>,
    ) -> Self {
        if let Err(error) = config.sweep.validate() {
            panic!("Invalid sweep configuration: {}", error);
        }

        Self {
            config: Arc::new(config),
            spool,
            sessions,
            persister,
            locks: SessionLocks::new(),
        }
    }
}
