//! Command router
//!
//! Interprets `add`, `remove`, `switch_to`, `query` and `flush` against the
//! shared store. Every mutating command runs through the optimistic update
//! loop in [`optimistic`], so two contexts racing for the last free slot end
//! with exactly one winner and the loser gets a typed signal.

mod messages;
pub mod optimistic;

use std::sync::Arc;

use pinstore::{Registry, RegistryError, RegistryStore, ResourceEntry, ResourceId, Slot, Versioned};
use tracing::{debug, info, warn};

pub use messages::{Command, CommandError};
pub use optimistic::{Phase, RetryPolicy};

use crate::config::RouterConfig;
use crate::host::{ActivationError, LiveResource, ResourceActivator};

/// Applies commands to the shared registry
pub struct CommandRouter {
    store: Arc<dyn RegistryStore>,
    activator: Arc<dyn ResourceActivator>,
    policy: RetryPolicy,
    reject_duplicate_locators: bool,
}

impl CommandRouter {
    pub fn new(store: Arc<dyn RegistryStore>, activator: Arc<dyn ResourceActivator>, config: &RouterConfig) -> Self {
        Self {
            store,
            activator,
            policy: RetryPolicy::from(config),
            reject_duplicate_locators: config.reject_duplicate_locators,
        }
    }

    pub fn store(&self) -> Arc<dyn RegistryStore> {
        self.store.clone()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Dispatch a command, answering with the registry once it settles
    pub async fn execute(&self, command: Command) -> Result<Versioned, CommandError> {
        debug!(command = command.name(), phase = %Phase::Idle, "CommandRouter::execute: called");
        match command {
            Command::Add {
                resource_id,
                title,
                locator,
                icon_ref,
            } => {
                self.add(LiveResource {
                    resource_id,
                    title,
                    locator,
                    icon_ref,
                })
                .await
            }
            Command::Remove { resource_id } => self.remove(&resource_id).await,
            Command::SwitchTo { slot } => self.switch_to(slot).await,
            Command::Query => self.query().await,
            Command::Flush => self.flush().await,
        }
    }

    /// Pin a resource to the lowest free slot
    pub async fn add(&self, resource: LiveResource) -> Result<Versioned, CommandError> {
        debug!(resource_id = %resource.resource_id, "CommandRouter::add: called");
        let reject_duplicates = self.reject_duplicate_locators;
        let result = optimistic::update(self.store.as_ref(), &self.policy, "add", |registry| {
            if registry.contains(&resource.resource_id) {
                return Err(CommandError::AlreadyTracked {
                    resource_id: resource.resource_id.clone(),
                });
            }
            if reject_duplicates && let Some(existing) = registry.find_by_locator(&resource.locator) {
                return Err(CommandError::AlreadyTracked {
                    resource_id: existing.resource_id.clone(),
                });
            }
            let Some(slot) = registry.next_slot().slot() else {
                return Err(CommandError::CapacityReached);
            };

            let mut next = registry.clone();
            next.insert(ResourceEntry {
                resource_id: resource.resource_id.clone(),
                slot,
                title: resource.title.clone(),
                locator: resource.locator.clone(),
                icon_ref: resource.icon_ref.clone(),
            })
            .map_err(|e| match e {
                RegistryError::DuplicateResource(resource_id) => CommandError::AlreadyTracked { resource_id },
                RegistryError::SlotTaken { .. } | RegistryError::Full => CommandError::CapacityReached,
            })?;
            Ok(Some(next))
        })
        .await?;

        if let Some(entry) = result.registry.get(&resource.resource_id) {
            info!(resource_id = %entry.resource_id, slot = %entry.slot, version = result.version, "Pinned resource");
        }
        Ok(result)
    }

    /// Unpin a resource. Absent ids leave the registry untouched.
    pub async fn remove(&self, resource_id: &ResourceId) -> Result<Versioned, CommandError> {
        debug!(%resource_id, "CommandRouter::remove: called");
        let mut plan = removal(resource_id);
        let mut unpinned = false;
        let result = optimistic::update(self.store.as_ref(), &self.policy, "remove", |registry| {
            let next = plan(registry)?;
            unpinned = next.is_some();
            Ok(next)
        })
        .await?;

        if unpinned {
            info!(%resource_id, version = result.version, "Unpinned resource");
        } else {
            debug!(%resource_id, "CommandRouter::remove: not pinned, nothing written");
        }
        Ok(result)
    }

    /// Bring the resource pinned at `slot` to the foreground.
    ///
    /// A resource the host no longer knows is unpinned on the spot and the
    /// caller gets `ActivationFailed`.
    pub async fn switch_to(&self, slot: Slot) -> Result<Versioned, CommandError> {
        debug!(%slot, "CommandRouter::switch_to: called");
        let current = optimistic::timed(&self.policy, self.store.read()).await?;
        let Some(entry) = current.registry.get_by_slot(slot) else {
            debug!(%slot, "CommandRouter::switch_to: slot empty");
            return Err(CommandError::SlotEmpty { slot });
        };
        let resource_id = entry.resource_id.clone();

        match self.activator.activate(&resource_id).await {
            Ok(()) => {
                debug!(%resource_id, %slot, "CommandRouter::switch_to: activated");
                Ok(current)
            }
            Err(ActivationError::NotFound(_)) => {
                warn!(%resource_id, %slot, "Pinned resource is gone, unpinning it");
                optimistic::update(self.store.as_ref(), &self.policy, "switch_to", removal(&resource_id)).await?;
                Err(CommandError::ActivationFailed {
                    resource_id,
                    reason: "resource no longer exists".to_string(),
                })
            }
            Err(ActivationError::Failed(reason)) => {
                warn!(%resource_id, %slot, %reason, "Host refused activation");
                Err(CommandError::ActivationFailed { resource_id, reason })
            }
        }
    }

    /// Current registry, read-only
    pub async fn query(&self) -> Result<Versioned, CommandError> {
        debug!("CommandRouter::query: called");
        optimistic::timed(&self.policy, self.store.read()).await
    }

    /// Replace the registry with the empty one, unconditionally
    pub async fn flush(&self) -> Result<Versioned, CommandError> {
        debug!("CommandRouter::flush: called");
        let version = optimistic::timed(&self.policy, self.store.write(Registry::new())).await?;
        info!(version, "Registry flushed");

        let settled = optimistic::timed(&self.policy, self.store.read()).await?;
        if settled.version == version {
            return Ok(settled);
        }
        // Another writer committed after the flush; report the flush itself
        debug!(version, current = settled.version, "CommandRouter::flush: registry moved on");
        Ok(Versioned {
            version,
            updated_at: chrono::Utc::now(),
            registry: Registry::new(),
        })
    }
}

/// Plan that drops `resource_id` if present
pub(crate) fn removal(resource_id: &ResourceId) -> impl FnMut(&Registry) -> Result<Option<Registry>, CommandError> + '_ {
    move |registry| {
        if !registry.contains(resource_id) {
            return Ok(None);
        }
        let mut next = registry.clone();
        next.remove(resource_id);
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use pinstore::MemoryStore;

    fn router_with(host: Arc<MockHost>) -> (CommandRouter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let router = CommandRouter::new(store.clone(), host, &RouterConfig::default());
        (router, store)
    }

    fn resource(id: &str) -> LiveResource {
        LiveResource::new(id, format!("Title {}", id), format!("https://{}.example", id))
    }

    fn slot(digit: u8) -> Slot {
        Slot::new(digit).unwrap()
    }

    #[tokio::test]
    async fn test_add_assigns_lowest_free_slot() {
        let (router, _) = router_with(Arc::new(MockHost::default()));

        let v = router.add(resource("r1")).await.unwrap();
        assert_eq!(v.registry.get(&"r1".into()).unwrap().slot, slot(1));

        let v = router.add(resource("r2")).await.unwrap();
        assert_eq!(v.registry.get(&"r2".into()).unwrap().slot, slot(2));
        assert_eq!(v.version, 2);
    }

    #[tokio::test]
    async fn test_add_twice_is_already_tracked() {
        let (router, store) = router_with(Arc::new(MockHost::default()));
        router.add(resource("r1")).await.unwrap();

        let err = router.add(resource("r1")).await.unwrap_err();
        assert_eq!(err, CommandError::AlreadyTracked { resource_id: "r1".into() });
        assert_eq!(store.read().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_duplicate_locator_guard_is_opt_in() {
        let store = Arc::new(MemoryStore::new());
        let config = RouterConfig {
            reject_duplicate_locators: true,
            ..Default::default()
        };
        let router = CommandRouter::new(store.clone(), Arc::new(MockHost::default()), &config);

        router.add(LiveResource::new("a", "A", "https://same")).await.unwrap();
        let err = router.add(LiveResource::new("b", "B", "https://same")).await.unwrap_err();
        assert_eq!(err, CommandError::AlreadyTracked { resource_id: "a".into() });

        let (lenient, _) = router_with(Arc::new(MockHost::default()));
        lenient.add(LiveResource::new("a", "A", "https://same")).await.unwrap();
        lenient.add(LiveResource::new("b", "B", "https://same")).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let (router, store) = router_with(Arc::new(MockHost::default()));
        let before = router.add(resource("r1")).await.unwrap();

        let after = router.remove(&"ghost".into()).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(store.read().await.unwrap().version, before.version);
    }

    #[tokio::test]
    async fn test_switch_to_empty_slot() {
        let (router, _) = router_with(Arc::new(MockHost::default()));
        let err = router.switch_to(slot(3)).await.unwrap_err();
        assert_eq!(err, CommandError::SlotEmpty { slot: slot(3) });
    }

    #[tokio::test]
    async fn test_switch_to_activates_live_resource() {
        let host = Arc::new(MockHost::with_live(vec![resource("r1")]));
        let (router, _) = router_with(host.clone());
        router.add(resource("r1")).await.unwrap();

        router.switch_to(slot(1)).await.unwrap();
        assert_eq!(host.activations(), vec![ResourceId::from("r1")]);
    }

    #[tokio::test]
    async fn test_switch_to_vanished_resource_unpins_it() {
        let host = Arc::new(MockHost::with_live(vec![]));
        let (router, store) = router_with(host);
        router.add(resource("r1")).await.unwrap();
        router.add(resource("r2")).await.unwrap();

        let err = router.switch_to(slot(1)).await.unwrap_err();
        assert!(matches!(err, CommandError::ActivationFailed { ref resource_id, .. } if resource_id.as_str() == "r1"));

        let registry = store.read().await.unwrap().registry;
        assert!(!registry.contains(&"r1".into()));
        assert_eq!(registry.get(&"r2".into()).unwrap().slot, slot(2));
    }

    #[tokio::test]
    async fn test_flush_twice_is_stable() {
        let (router, _) = router_with(Arc::new(MockHost::default()));
        router.add(resource("r1")).await.unwrap();

        let first = router.flush().await.unwrap();
        let second = router.flush().await.unwrap();
        assert!(first.registry.is_empty());
        assert_eq!(first.registry, second.registry);
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn test_noop_flush_reports_stored_timestamp() {
        let (router, store) = router_with(Arc::new(MockHost::default()));
        router.add(resource("r1")).await.unwrap();

        let first = router.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = router.flush().await.unwrap();

        let stored = store.read().await.unwrap();
        assert_eq!(first, stored);
        assert_eq!(second, stored);
    }

    #[tokio::test]
    async fn test_execute_dispatches() {
        let (router, _) = router_with(Arc::new(MockHost::default()));
        router.execute(Command::add(resource("r1"))).await.unwrap();
        let v = router.execute(Command::Query).await.unwrap();
        assert_eq!(v.registry.len(), 1);

        let v = router.execute(Command::Remove { resource_id: "r1".into() }).await.unwrap();
        assert!(v.registry.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_surfaces_signal() {
        let (router, store) = router_with(Arc::new(MockHost::default()));
        store.set_available(false);

        for result in [
            router.add(resource("r1")).await,
            router.query().await,
            router.flush().await,
            router.switch_to(slot(1)).await,
        ] {
            assert!(matches!(result, Err(CommandError::StoreUnavailable { .. })));
        }
    }
}
