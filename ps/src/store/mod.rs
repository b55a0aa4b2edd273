//! Registry persistence with optimistic concurrency
//!
//! Every stored registry carries a monotonically increasing version. Writers
//! read a `Versioned` value, compute the next registry locally, and commit it
//! with `compare_and_swap`. A stale expected version is reported as a
//! conflict so the caller can re-read and re-apply.
//!
//! # Backends
//!
//! - [`MemoryStore`] - in-process, shared through `Arc`
//! - [`FileStore`] - JSON record on disk, safe across processes
//!
//! # On-disk record
//!
//! ```text
//! {
//!   "version": 7,
//!   "updatedAt": "2026-10-18T09:30:00Z",
//!   "registry": {
//!     "412": { "slot": 1, "title": "Inbox", "locator": "https://...", "iconRef": null }
//!   }
//! }
//! ```

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::registry::Registry;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Registry version counter
pub type Version = u64;

/// Capacity of the in-process change channel
pub const DEFAULT_CHANGE_CAPACITY: usize = 64;

/// Errors from the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Registry store unavailable: {0}")]
    Unavailable(String),

    #[error("Registry store holds a corrupt record: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// A registry value tagged with the version it was committed at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioned {
    pub version: Version,
    pub updated_at: DateTime<Utc>,
    pub registry: Registry,
}

impl Versioned {
    /// The registry as it exists before anything was ever written
    pub fn initial() -> Self {
        Self {
            version: 0,
            updated_at: Utc::now(),
            registry: Registry::new(),
        }
    }

    /// The value that results from committing `registry` on top of this one
    pub fn successor(&self, registry: Registry) -> Self {
        Self {
            version: self.version + 1,
            updated_at: Utc::now(),
            registry,
        }
    }
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed (or was identical to the stored value) at this version
    Committed(Version),
    /// Someone else committed first; the store is now at `current`
    Conflict { current: Version },
}

/// Notification emitted after every committed change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryChange {
    pub previous: Versioned,
    pub current: Versioned,
}

/// Shared persisted registry
///
/// `read` returns the last value this context observed committed. `write`
/// replaces the whole registry unconditionally. `compare_and_swap` replaces
/// it only when the stored version still equals `expected`. Writing a
/// registry equal to the stored one is a no-op that keeps the version.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn read(&self) -> Result<Versioned, StoreError>;

    async fn write(&self, registry: Registry) -> Result<Version, StoreError>;

    async fn compare_and_swap(&self, expected: Version, next: Registry) -> Result<CasOutcome, StoreError>;

    /// Subscribe to changes committed through this store handle
    fn subscribe(&self) -> broadcast::Receiver<RegistryChange>;
}

/// Fan-out of committed changes to in-process subscribers
#[derive(Debug, Clone)]
pub(crate) struct ChangeNotifier {
    tx: broadcast::Sender<RegistryChange>,
}

impl ChangeNotifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: no subscribers is fine
    pub(crate) fn notify(&self, previous: Versioned, current: Versioned) {
        debug!(
            from = previous.version,
            to = current.version,
            entries = current.registry.len(),
            "ChangeNotifier::notify"
        );
        let _ = self.tx.send(RegistryChange { previous, current });
    }
}

/// Decide the outcome of a conditional write against the stored value.
///
/// Returns the new value to persist, or `None` when nothing must be written.
pub(crate) fn resolve_cas(stored: &Versioned, expected: Version, next: Registry) -> (CasOutcome, Option<Versioned>) {
    if stored.version != expected {
        return (
            CasOutcome::Conflict {
                current: stored.version,
            },
            None,
        );
    }
    if stored.registry == next {
        return (CasOutcome::Committed(stored.version), None);
    }
    let successor = stored.successor(next);
    (CasOutcome::Committed(successor.version), Some(successor))
}
