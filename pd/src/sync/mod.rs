//! Sync broadcaster
//!
//! Fans every committed registry value out to observing contexts. Each
//! notification carries the full registry, never a delta; observers rebuild
//! their [`LocalView`] from it.
//!
//! Commits made through this process arrive on the store's change stream.
//! Commits made by other processes sharing the same record are picked up by
//! re-reading the store on a poll interval. Only strictly newer versions are
//! published, so the two paths never produce duplicates.

mod view;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use pinstore::{RegistryStore, StoreError, Versioned};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use view::LocalView;

use crate::config::SyncConfig;

/// Publishes registry snapshots to subscribers
pub struct Broadcaster {
    store: Arc<dyn RegistryStore>,
    tx: broadcast::Sender<Versioned>,
    latest: RwLock<Option<Versioned>>,
    poll_interval: Duration,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn RegistryStore>, config: &SyncConfig) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            store,
            tx,
            latest: RwLock::new(None),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Versioned> {
        self.tx.subscribe()
    }

    /// Most recent snapshot published
    pub fn latest(&self) -> Option<Versioned> {
        self.latest.read().ok()?.clone()
    }

    /// Publish `snapshot` if it is newer than anything sent so far
    pub fn publish(&self, snapshot: Versioned) -> bool {
        let Ok(mut latest) = self.latest.write() else {
            return false;
        };
        if latest.as_ref().is_some_and(|l| l.version >= snapshot.version) {
            return false;
        }
        debug!(
            version = snapshot.version,
            entries = snapshot.registry.len(),
            subscribers = self.tx.receiver_count(),
            "Broadcaster::publish"
        );
        *latest = Some(snapshot.clone());
        let _ = self.tx.send(snapshot);
        true
    }

    /// Re-read the store and publish whatever is new
    pub async fn refresh(&self) -> Result<bool, StoreError> {
        let current = self.store.read().await?;
        Ok(self.publish(current))
    }

    /// Forward store changes until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(poll_interval = ?self.poll_interval, "Broadcaster started");
        let mut changes = self.store.subscribe();
        let mut changes_open = true;
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => {
                        self.publish(change.current);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(n, "Broadcaster::run: lagged behind, re-reading store");
                        self.refresh_logged().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Store change stream closed, falling back to polling only");
                        changes_open = false;
                    }
                },

                _ = poll.tick() => self.refresh_logged().await,

                _ = shutdown_rx.recv() => {
                    debug!("Broadcaster::run: shutdown");
                    break;
                }
            }
        }
        info!("Broadcaster stopped");
    }

    async fn refresh_logged(&self) {
        match self.refresh().await {
            Ok(true) => debug!("Broadcaster: picked up external commit"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Broadcaster: store read failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinstore::{MemoryStore, Registry, ResourceEntry, Slot};

    fn one(id: &str, slot: u8) -> Registry {
        let mut reg = Registry::new();
        reg.insert(ResourceEntry {
            resource_id: id.into(),
            slot: Slot::new(slot).unwrap(),
            title: id.to_string(),
            locator: format!("https://{}", id),
            icon_ref: None,
        })
        .unwrap();
        reg
    }

    #[tokio::test]
    async fn test_publish_only_newer() {
        let store = Arc::new(MemoryStore::new());
        let b = Broadcaster::new(store, &SyncConfig::default());
        let mut rx = b.subscribe();

        let v1 = Versioned::initial().successor(one("a", 1));
        assert!(b.publish(v1.clone()));
        assert!(!b.publish(v1.clone()));
        assert!(!b.publish(Versioned::initial()));

        assert_eq!(rx.recv().await.unwrap(), v1);
        assert!(rx.try_recv().is_err());
        assert_eq!(b.latest(), Some(v1));
    }

    #[tokio::test]
    async fn test_run_forwards_commits() {
        let store = Arc::new(MemoryStore::new());
        let b = Arc::new(Broadcaster::new(store.clone(), &SyncConfig::default()));
        let mut rx = b.subscribe();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(b.clone().run(shutdown_rx));

        // First poll tick publishes the initial value
        let initial = rx.recv().await.unwrap();
        assert_eq!(initial.version, 0);

        store.write(one("a", 1)).await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.registry, one("a", 1));

        shutdown_tx.send(()).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_sees_writes_from_other_handles() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("registry.json");
        let ours = Arc::new(pinstore::FileStore::open(&path).unwrap());
        let theirs = pinstore::FileStore::open(&path).unwrap();

        let b = Broadcaster::new(ours, &SyncConfig::default());
        assert!(b.refresh().await.unwrap());

        theirs.write(one("x", 4)).await.unwrap();
        assert!(b.refresh().await.unwrap());
        assert_eq!(b.latest().unwrap().registry, one("x", 4));
        assert!(!b.refresh().await.unwrap());
    }
}
