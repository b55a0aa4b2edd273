//! In-process registry store

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    CasOutcome, ChangeNotifier, DEFAULT_CHANGE_CAPACITY, RegistryChange, RegistryStore, StoreError, Version,
    Versioned, resolve_cas,
};
use crate::registry::Registry;

/// Registry held in memory, shared by every handle of the same `Arc`
///
/// Availability can be switched off to exercise the `StoreUnavailable` path.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<Versioned>,
    available: AtomicBool,
    notifier: ChangeNotifier,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Seed the store with an existing registry (committed at version 0)
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            state: Mutex::new(Versioned {
                registry,
                ..Versioned::initial()
            }),
            available: AtomicBool::new(true),
            notifier: ChangeNotifier::new(DEFAULT_CHANGE_CAPACITY),
        }
    }

    pub fn set_available(&self, available: bool) {
        debug!(available, "MemoryStore::set_available");
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Versioned>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn read(&self) -> Result<Versioned, StoreError> {
        self.check_available()?;
        Ok(self.lock()?.clone())
    }

    async fn write(&self, registry: Registry) -> Result<Version, StoreError> {
        debug!(entries = registry.len(), "MemoryStore::write: called");
        self.check_available()?;
        let mut state = self.lock()?;
        if state.registry == registry {
            return Ok(state.version);
        }
        let next = state.successor(registry);
        let previous = std::mem::replace(&mut *state, next.clone());
        drop(state);
        self.notifier.notify(previous, next.clone());
        Ok(next.version)
    }

    async fn compare_and_swap(&self, expected: Version, next: Registry) -> Result<CasOutcome, StoreError> {
        debug!(expected, entries = next.len(), "MemoryStore::compare_and_swap: called");
        self.check_available()?;
        let mut state = self.lock()?;
        let (outcome, successor) = resolve_cas(&state, expected, next);
        if let Some(successor) = successor {
            let previous = std::mem::replace(&mut *state, successor.clone());
            drop(state);
            self.notifier.notify(previous, successor);
        }
        Ok(outcome)
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.notifier.subscribe()
    }
}
