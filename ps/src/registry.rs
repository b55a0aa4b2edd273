//! Registry data model
//!
//! A `Registry` maps resource ids to entries and keeps a reverse slot index.
//! Both views are updated together so they can never disagree.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::slot::{Allocation, SLOT_COUNT, Slot, allocate};

/// Opaque, stable identifier issued by the host for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// One pinned resource bound to exactly one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    pub resource_id: ResourceId,
    pub slot: Slot,
    pub title: String,
    pub locator: String,
    #[serde(default)]
    pub icon_ref: Option<String>,
}

/// Violations of the registry invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Resource {0} is already pinned")]
    DuplicateResource(ResourceId),

    #[error("Slot {slot} is already held by resource {holder}")]
    SlotTaken { slot: Slot, holder: ResourceId },

    #[error("Registry is full ({} entries)", SLOT_COUNT)]
    Full,
}

/// Persisted shape of a single entry (the id is the map key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub slot: Slot,
    pub title: String,
    pub locator: String,
    #[serde(default)]
    pub icon_ref: Option<String>,
}

/// Persisted shape of the whole registry: resource id -> entry record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryRecord(pub BTreeMap<ResourceId, EntryRecord>);

/// The full set of pinned resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegistryRecord", into = "RegistryRecord")]
pub struct Registry {
    entries: BTreeMap<ResourceId, ResourceEntry>,
    slots: BTreeMap<Slot, ResourceId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= SLOT_COUNT
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceEntry> {
        self.entries.get(id)
    }

    pub fn get_by_slot(&self, slot: Slot) -> Option<&ResourceEntry> {
        self.slots.get(&slot).and_then(|id| self.entries.get(id))
    }

    pub fn find_by_locator(&self, locator: &str) -> Option<&ResourceEntry> {
        self.entries.values().find(|e| e.locator == locator)
    }

    pub fn occupied_slots(&self) -> BTreeSet<Slot> {
        self.slots.keys().copied().collect()
    }

    /// Ask the allocator for the next free slot
    pub fn next_slot(&self) -> Allocation {
        allocate(&self.occupied_slots())
    }

    /// Entries in display order: slot 1..9, then 0
    pub fn ordered(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.slots.values().filter_map(|id| self.entries.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.entries.keys()
    }

    /// Insert an entry, enforcing id and slot uniqueness and capacity
    pub fn insert(&mut self, entry: ResourceEntry) -> Result<(), RegistryError> {
        if self.entries.contains_key(&entry.resource_id) {
            return Err(RegistryError::DuplicateResource(entry.resource_id));
        }
        if let Some(holder) = self.slots.get(&entry.slot) {
            return Err(RegistryError::SlotTaken {
                slot: entry.slot,
                holder: holder.clone(),
            });
        }
        if self.is_full() {
            return Err(RegistryError::Full);
        }
        self.slots.insert(entry.slot, entry.resource_id.clone());
        self.entries.insert(entry.resource_id.clone(), entry);
        Ok(())
    }

    /// Remove an entry; its slot becomes free, no other entry moves
    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceEntry> {
        let entry = self.entries.remove(id)?;
        self.slots.remove(&entry.slot);
        Some(entry)
    }

    /// Update locator and title in place. Returns true if anything changed.
    pub fn patch(&mut self, id: &ResourceId, locator: &str, title: &str) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.locator == locator && entry.title == title {
            return false;
        }
        entry.locator = locator.to_string();
        entry.title = title.to_string();
        true
    }

    /// Drop every entry whose id is not in `live`, returning what was removed
    pub fn retain_live(&mut self, live: &HashSet<ResourceId>) -> Vec<ResourceEntry> {
        let orphans: Vec<ResourceId> = self.entries.keys().filter(|id| !live.contains(*id)).cloned().collect();
        orphans.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
    }
}

impl From<Registry> for RegistryRecord {
    fn from(registry: Registry) -> Self {
        RegistryRecord(
            registry
                .entries
                .into_iter()
                .map(|(id, e)| {
                    (
                        id,
                        EntryRecord {
                            slot: e.slot,
                            title: e.title,
                            locator: e.locator,
                            icon_ref: e.icon_ref,
                        },
                    )
                })
                .collect(),
        )
    }
}

impl TryFrom<RegistryRecord> for Registry {
    type Error = RegistryError;

    fn try_from(record: RegistryRecord) -> Result<Self, Self::Error> {
        let mut registry = Registry::new();
        for (resource_id, e) in record.0 {
            registry.insert(ResourceEntry {
                resource_id,
                slot: e.slot,
                title: e.title,
                locator: e.locator,
                icon_ref: e.icon_ref,
            })?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, slot: u8) -> ResourceEntry {
        ResourceEntry {
            resource_id: id.into(),
            slot: Slot::new(slot).unwrap(),
            title: format!("Title {}", id),
            locator: format!("https://example.com/{}", id),
            icon_ref: None,
        }
    }

    #[test]
    fn test_insert_and_lookup_both_views() {
        let mut reg = Registry::new();
        reg.insert(entry("a", 1)).unwrap();
        reg.insert(entry("b", 2)).unwrap();

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(&"a".into()).unwrap().slot.digit(), 1);
        assert_eq!(reg.get_by_slot(Slot::new(2).unwrap()).unwrap().resource_id.as_str(), "b");
    }

    #[test]
    fn test_insert_rejects_duplicate_id_and_slot() {
        let mut reg = Registry::new();
        reg.insert(entry("a", 1)).unwrap();

        assert_eq!(
            reg.insert(entry("a", 2)),
            Err(RegistryError::DuplicateResource("a".into()))
        );
        assert!(matches!(reg.insert(entry("b", 1)), Err(RegistryError::SlotTaken { .. })));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_full_registry_rejects_more() {
        let mut reg = Registry::new();
        for (i, slot) in Slot::all().enumerate() {
            reg.insert(entry(&format!("r{}", i), slot.digit())).unwrap();
        }
        assert!(reg.is_full());
        assert_eq!(reg.next_slot(), Allocation::Exhausted);
        assert!(reg.insert(entry("r10", 1)).is_err());
        assert_eq!(reg.len(), 10);
    }

    #[test]
    fn test_remove_keeps_other_slots() {
        let mut reg = Registry::new();
        reg.insert(entry("a", 1)).unwrap();
        reg.insert(entry("b", 2)).unwrap();
        reg.insert(entry("c", 3)).unwrap();

        let removed = reg.remove(&"b".into()).unwrap();
        assert_eq!(removed.slot.digit(), 2);
        assert_eq!(reg.get(&"a".into()).unwrap().slot.digit(), 1);
        assert_eq!(reg.get(&"c".into()).unwrap().slot.digit(), 3);
        assert!(reg.get_by_slot(Slot::new(2).unwrap()).is_none());
        assert!(reg.remove(&"b".into()).is_none());
    }

    #[test]
    fn test_ordered_puts_zero_last() {
        let mut reg = Registry::new();
        reg.insert(entry("z", 0)).unwrap();
        reg.insert(entry("c", 3)).unwrap();
        reg.insert(entry("a", 1)).unwrap();

        let digits: Vec<u8> = reg.ordered().map(|e| e.slot.digit()).collect();
        assert_eq!(digits, vec![1, 3, 0]);
    }

    #[test]
    fn test_patch_only_touches_tracked() {
        let mut reg = Registry::new();
        reg.insert(entry("a", 4)).unwrap();

        assert!(reg.patch(&"a".into(), "https://new", "New"));
        assert!(!reg.patch(&"a".into(), "https://new", "New"));
        assert!(!reg.patch(&"ghost".into(), "https://x", "X"));

        let a = reg.get(&"a".into()).unwrap();
        assert_eq!(a.slot.digit(), 4);
        assert_eq!(a.title, "New");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_retain_live_drops_orphans() {
        let mut reg = Registry::new();
        reg.insert(entry("a", 1)).unwrap();
        reg.insert(entry("b", 2)).unwrap();
        reg.insert(entry("c", 3)).unwrap();

        let live: HashSet<ResourceId> = ["a".into(), "c".into(), "unpinned".into()].into_iter().collect();
        let removed = reg.retain_live(&live);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].resource_id.as_str(), "b");
        assert!(reg.ids().all(|id| live.contains(id)));
    }

    #[test]
    fn test_persisted_layout() {
        let mut reg = Registry::new();
        reg.insert(ResourceEntry {
            icon_ref: Some("https://example.com/favicon.ico".to_string()),
            ..entry("42", 1)
        })
        .unwrap();

        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "42": {
                    "slot": 1,
                    "title": "Title 42",
                    "locator": "https://example.com/42",
                    "iconRef": "https://example.com/favicon.ico"
                }
            })
        );
    }

    #[test]
    fn test_deserialize_rejects_shared_slot() {
        let json = r#"{
            "1": {"slot": 3, "title": "a", "locator": "x", "iconRef": null},
            "2": {"slot": 3, "title": "b", "locator": "y", "iconRef": null}
        }"#;
        assert!(serde_json::from_str::<Registry>(json).is_err());
    }

    #[test]
    fn test_deserialize_missing_icon_ref() {
        let json = r#"{"7": {"slot": 0, "title": "t", "locator": "l"}}"#;
        let reg: Registry = serde_json::from_str(json).unwrap();
        assert_eq!(reg.get(&7u64.into()).unwrap().icon_ref, None);
    }
}
