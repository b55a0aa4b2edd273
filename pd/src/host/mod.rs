//! Host collaborators
//!
//! The registry tracks resources owned by a host (browser tabs, windows,
//! buffers). The daemon only ever talks to the host through these traits:
//! enumerate what is alive, ask for something to be brought to the front,
//! and receive close/change notifications as [`ResourceEvent`]s.

mod table;

use async_trait::async_trait;
use pinstore::ResourceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use table::ResourceTable;

/// A resource as currently reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveResource {
    pub resource_id: ResourceId,
    pub title: String,
    pub locator: String,
    #[serde(default)]
    pub icon_ref: Option<String>,
}

impl LiveResource {
    pub fn new(resource_id: impl Into<ResourceId>, title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            title: title.into(),
            locator: locator.into(),
            icon_ref: None,
        }
    }

    pub fn with_icon(mut self, icon_ref: impl Into<String>) -> Self {
        self.icon_ref = Some(icon_ref.into());
        self
    }
}

/// Notifications pushed by the host about resources it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResourceEvent {
    /// The resource is gone
    Closed { resource_id: ResourceId },
    /// The resource reloaded, navigated within its document, or was renamed
    Changed {
        resource_id: ResourceId,
        locator: String,
        title: String,
    },
}

impl ResourceEvent {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            ResourceEvent::Closed { resource_id } | ResourceEvent::Changed { resource_id, .. } => resource_id,
        }
    }
}

/// Errors from asking the host to activate a resource
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationError {
    #[error("Resource {0} no longer exists")]
    NotFound(ResourceId),

    #[error("Host refused activation: {0}")]
    Failed(String),
}

/// Errors from querying the host
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Host has not reported its resources yet")]
    NotSynced,

    #[error("Host unavailable: {0}")]
    Unavailable(String),
}

/// Lists every resource the host currently holds
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    async fn list_live_resources(&self) -> Result<Vec<LiveResource>, HostError>;
}

/// Brings a resource to the foreground
#[async_trait]
pub trait ResourceActivator: Send + Sync {
    async fn activate(&self, resource_id: &ResourceId) -> Result<(), ActivationError>;
}

#[cfg(test)]
pub mod mock {
    //! Scriptable host for unit tests

    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host double whose answers are set by the test
    #[derive(Default)]
    pub struct MockHost {
        live: Mutex<Option<Vec<LiveResource>>>,
        activations: Mutex<Vec<ResourceId>>,
        enumerations: AtomicUsize,
    }

    impl MockHost {
        pub fn with_live(live: Vec<LiveResource>) -> Self {
            Self {
                live: Mutex::new(Some(live)),
                ..Default::default()
            }
        }

        /// `None` makes enumeration fail
        pub fn set_live(&self, live: Option<Vec<LiveResource>>) {
            *self.live.lock().unwrap() = live;
        }

        pub fn activations(&self) -> Vec<ResourceId> {
            self.activations.lock().unwrap().clone()
        }

        pub fn enumeration_count(&self) -> usize {
            self.enumerations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceEnumerator for MockHost {
        async fn list_live_resources(&self) -> Result<Vec<LiveResource>, HostError> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            self.live
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| HostError::Unavailable("mock enumeration failure".to_string()))
        }
    }

    #[async_trait]
    impl ResourceActivator for MockHost {
        async fn activate(&self, resource_id: &ResourceId) -> Result<(), ActivationError> {
            let alive = self
                .live
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|live| live.iter().any(|r| &r.resource_id == resource_id));
            if !alive {
                return Err(ActivationError::NotFound(resource_id.clone()));
            }
            self.activations.lock().unwrap().push(resource_id.clone());
            Ok(())
        }
    }
}
