//! Observer-side cache of the registry

use pinstore::{Registry, ResourceEntry, Slot, Version, Versioned};

/// A context's local copy of the registry
///
/// Always rebuilt wholesale from a broadcast snapshot. Snapshots older than
/// the one already held are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalView {
    version: Option<Version>,
    registry: Registry,
}

impl LocalView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the view with `snapshot`. Returns false if it was stale.
    pub fn apply(&mut self, snapshot: &Versioned) -> bool {
        if self.version.is_some_and(|v| v > snapshot.version) {
            return false;
        }
        self.version = Some(snapshot.version);
        self.registry = snapshot.registry.clone();
        true
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn entry_for_slot(&self, slot: Slot) -> Option<&ResourceEntry> {
        self.registry.get_by_slot(slot)
    }

    /// Entries in display order
    pub fn ordered(&self) -> Vec<&ResourceEntry> {
        self.registry.ordered().collect()
    }

    /// One line per entry: `<slot>  <title>  <locator>`
    pub fn lines(&self) -> Vec<String> {
        self.registry
            .ordered()
            .map(|e| format!("{}  {}  {}", e.slot, e.title, e.locator))
            .collect()
    }
}
