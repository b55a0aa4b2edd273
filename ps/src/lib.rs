//! PinStore - bounded ten-slot pin registry
//!
//! Holds the shared registry of pinned resources, each bound to a digit slot
//! (1-9, then 0), together with the persistence layer every context uses to
//! read and conditionally replace it.
//!
//! # Architecture
//!
//! ```text
//! slot        allocate / release over the 1..9,0 keyspace
//!   ↑
//! registry    id -> entry map with a consistent slot index
//!   ↑
//! store       versioned read / write / compare_and_swap + change stream
//!             ├── MemoryStore (in-process)
//!             └── FileStore   (registry.json + registry.json.lock)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pinstore::{FileStore, RegistryStore, ResourceEntry};
//!
//! let store = FileStore::open("registry.json")?;
//! let current = store.read().await?;
//! let mut next = current.registry.clone();
//! if let Some(slot) = next.next_slot().slot() {
//!     next.insert(ResourceEntry { resource_id: "42".into(), slot, ..entry })?;
//!     store.compare_and_swap(current.version, next).await?;
//! }
//! ```

pub mod cli;
pub mod config;
pub mod registry;
pub mod slot;
pub mod store;

pub use registry::{EntryRecord, Registry, RegistryError, RegistryRecord, ResourceEntry, ResourceId};
pub use slot::{ALLOCATION_ORDER, Allocation, InvalidSlot, SLOT_COUNT, Slot, allocate, release};
pub use store::{
    CasOutcome, DEFAULT_CHANGE_CAPACITY, FileStore, MemoryStore, RegistryChange, RegistryStore, StoreError, Version,
    Versioned,
};

/// File name of the registry record inside the data directory
pub const REGISTRY_FILE_NAME: &str = "registry.json";
