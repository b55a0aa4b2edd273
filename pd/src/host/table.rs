//! In-daemon model of the host's live resources
//!
//! The host bridge reports what is open over IPC; this table answers the
//! enumerator and activator traits from that report. Activation requests are
//! published on a broadcast channel the bridge listens to.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pinstore::ResourceId;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ActivationError, HostError, LiveResource, ResourceActivator, ResourceEnumerator};

/// Capacity of the activation request channel
const ACTIVATION_CHANNEL_CAPACITY: usize = 32;

/// Live resources as last reported by the host
pub struct ResourceTable {
    resources: RwLock<HashMap<ResourceId, LiveResource>>,
    /// False until the host has sent one complete listing
    synced: AtomicBool,
    active: RwLock<Option<ResourceId>>,
    activation_tx: broadcast::Sender<ResourceId>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTable {
    pub fn new() -> Self {
        let (activation_tx, _) = broadcast::channel(ACTIVATION_CHANNEL_CAPACITY);
        Self {
            resources: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
            active: RwLock::new(None),
            activation_tx,
        }
    }

    /// Replace the whole table with a complete listing from the host
    pub fn replace_all(&self, resources: Vec<LiveResource>) {
        debug!(count = resources.len(), "ResourceTable::replace_all: called");
        if let Ok(mut table) = self.resources.write() {
            *table = resources.into_iter().map(|r| (r.resource_id.clone(), r)).collect();
            self.synced.store(true, Ordering::SeqCst);
        }
    }

    pub fn open(&self, resource: LiveResource) {
        debug!(resource_id = %resource.resource_id, "ResourceTable::open: called");
        if let Ok(mut table) = self.resources.write() {
            table.insert(resource.resource_id.clone(), resource);
        }
    }

    /// Forget a resource. Returns true if it was known.
    pub fn close(&self, resource_id: &ResourceId) -> bool {
        debug!(%resource_id, "ResourceTable::close: called");
        self.resources
            .write()
            .map(|mut table| table.remove(resource_id).is_some())
            .unwrap_or(false)
    }

    /// Record a navigation or rename. Unknown resources are added.
    pub fn change(&self, resource_id: &ResourceId, locator: &str, title: &str) {
        debug!(%resource_id, %locator, "ResourceTable::change: called");
        if let Ok(mut table) = self.resources.write() {
            table
                .entry(resource_id.clone())
                .and_modify(|r| {
                    r.locator = locator.to_string();
                    r.title = title.to_string();
                })
                .or_insert_with(|| LiveResource::new(resource_id.clone(), title, locator));
        }
    }

    pub fn get(&self, resource_id: &ResourceId) -> Option<LiveResource> {
        self.resources.read().ok()?.get(resource_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Last resource the daemon asked the host to activate
    pub fn active(&self) -> Option<ResourceId> {
        self.active.read().ok()?.clone()
    }

    /// Receive activation requests (for the host bridge)
    pub fn subscribe_activations(&self) -> broadcast::Receiver<ResourceId> {
        self.activation_tx.subscribe()
    }
}

#[async_trait]
impl ResourceEnumerator for ResourceTable {
    async fn list_live_resources(&self) -> Result<Vec<LiveResource>, HostError> {
        if !self.is_synced() {
            return Err(HostError::NotSynced);
        }
        let table = self
            .resources
            .read()
            .map_err(|_| HostError::Unavailable("resource table lock poisoned".to_string()))?;
        Ok(table.values().cloned().collect())
    }
}

#[async_trait]
impl ResourceActivator for ResourceTable {
    async fn activate(&self, resource_id: &ResourceId) -> Result<(), ActivationError> {
        debug!(%resource_id, "ResourceTable::activate: called");
        if self.get(resource_id).is_none() {
            return Err(ActivationError::NotFound(resource_id.clone()));
        }
        if let Ok(mut active) = self.active.write() {
            *active = Some(resource_id.clone());
        }
        // No bridge listening is fine; it picks up `active` on reconnect
        let _ = self.activation_tx.send(resource_id.clone());
        Ok(())
    }
}
