//! Lifecycle reconciler
//!
//! Keeps the registry honest about the resources it points at. Host
//! notifications (closed, changed) arrive as messages on a bounded queue and
//! are handled one at a time; a periodic sweep enumerates the live resources
//! and drops every orphan entry. Handlers are idempotent: replaying an event
//! never writes twice.
//!
//! # Queue
//!
//! ```text
//! host bridge ──Event──┐
//! pd sweep ────Sweep───┼──► mpsc ──► run loop ──► optimistic update ──► store
//! interval ────tick────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use pinstore::{CasOutcome, Registry, RegistryStore, ResourceEntry, ResourceId, Version, Versioned};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::host::{HostError, ResourceEnumerator, ResourceEvent};
use crate::router::{CommandError, RetryPolicy, optimistic, removal};

/// Errors from reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Could not enumerate live resources: {0}")]
    Enumeration(#[from] HostError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Reconciler is not running")]
    ChannelClosed,
}

/// Outcome of one sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Number of resources the host reported alive
    pub live: usize,
    /// Orphan entries that were unpinned
    pub removed: Vec<ResourceEntry>,
    /// Registry version after the sweep
    pub version: Version,
}

/// Messages accepted by the reconciler task
#[derive(Debug)]
pub enum ReconcilerInput {
    Event(ResourceEvent),
    Sweep {
        reply: Option<oneshot::Sender<Result<SweepReport, ReconcileError>>>,
    },
    Shutdown,
}

/// Repairs the registry against host state
pub struct Reconciler {
    store: Arc<dyn RegistryStore>,
    enumerator: Arc<dyn ResourceEnumerator>,
    policy: RetryPolicy,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        enumerator: Arc<dyn ResourceEnumerator>,
        policy: RetryPolicy,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            enumerator,
            policy,
            config,
        }
    }

    /// Apply one host notification
    pub async fn handle_event(&self, event: &ResourceEvent) -> Result<Versioned, CommandError> {
        debug!(?event, "Reconciler::handle_event: called");
        match event {
            ResourceEvent::Closed { resource_id } => {
                let result =
                    optimistic::update(self.store.as_ref(), &self.policy, "resource_closed", removal(resource_id))
                        .await?;
                debug!(%resource_id, version = result.version, "Reconciler::handle_event: closed handled");
                Ok(result)
            }
            ResourceEvent::Changed {
                resource_id,
                locator,
                title,
            } => {
                optimistic::update(
                    self.store.as_ref(),
                    &self.policy,
                    "resource_changed",
                    patch(resource_id, locator, title),
                )
                .await
            }
        }
    }

    /// Drop every entry whose resource the host no longer reports.
    ///
    /// Each attempt reads the registry before taking the listing and commits
    /// against that version, so a pin made while the host was enumerating
    /// shows up as a conflict and the attempt starts over with a fresh
    /// listing. A failed enumeration leaves the registry untouched.
    pub async fn sweep(&self) -> Result<SweepReport, ReconcileError> {
        debug!("Reconciler::sweep: called");
        for attempt in 1..=self.policy.max_attempts {
            let current = optimistic::timed(&self.policy, self.store.read()).await?;
            let live = self.live_set().await?;

            let mut next = current.registry.clone();
            let removed = next.retain_live(&live);
            if removed.is_empty() {
                return Ok(SweepReport {
                    live: live.len(),
                    removed,
                    version: current.version,
                });
            }

            match optimistic::timed(&self.policy, self.store.compare_and_swap(current.version, next)).await? {
                CasOutcome::Committed(version) => {
                    info!(
                        removed = removed.len(),
                        live = live.len(),
                        version,
                        "Sweep unpinned orphan entries"
                    );
                    return Ok(SweepReport {
                        live: live.len(),
                        removed,
                        version,
                    });
                }
                CasOutcome::Conflict { current: stored } => {
                    debug!(attempt, expected = current.version, stored, "sweep: registry moved, re-enumerating");
                }
            }
        }

        warn!(attempts = self.policy.max_attempts, "Sweep gave up after repeated conflicts");
        Err(CommandError::ConcurrentModification {
            attempts: self.policy.max_attempts,
        }
        .into())
    }

    async fn live_set(&self) -> Result<HashSet<ResourceId>, HostError> {
        Ok(self
            .enumerator
            .list_live_resources()
            .await?
            .into_iter()
            .map(|r| r.resource_id)
            .collect())
    }

    /// Start the reconciler task
    pub fn spawn(self) -> (ReconcilerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let handle = tokio::spawn(self.run(rx));
        (ReconcilerHandle { tx }, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<ReconcilerInput>) {
        info!(
            initial_delay = ?self.config.sweep_initial_delay(),
            interval = ?self.config.sweep_interval(),
            "Reconciler started"
        );
        let start = Instant::now() + self.config.sweep_initial_delay();
        let mut ticker = tokio::time::interval_at(start, self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                input = rx.recv() => match input {
                    Some(ReconcilerInput::Event(event)) => {
                        if let Err(e) = self.handle_event(&event).await {
                            warn!(resource_id = %event.resource_id(), error = %e, "Failed to apply resource event");
                        }
                    }
                    Some(ReconcilerInput::Sweep { reply }) => {
                        let result = self.sweep().await;
                        if let Err(e) = &result {
                            warn!(error = %e, "Requested sweep failed");
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Some(ReconcilerInput::Shutdown) | None => {
                        debug!("Reconciler::run: shutdown");
                        break;
                    }
                },

                _ = ticker.tick() => self.periodic_sweep().await,
            }
        }
        info!("Reconciler stopped");
    }

    async fn periodic_sweep(&self) {
        debug!("Reconciler::periodic_sweep: tick");
        match self.sweep().await {
            Ok(report) => debug!(live = report.live, removed = report.removed.len(), "periodic_sweep: done"),
            // Nothing to compare against until the host reports in
            Err(ReconcileError::Enumeration(HostError::NotSynced)) => {
                debug!("periodic_sweep: host not synced yet, skipping");
            }
            Err(e) => warn!(error = %e, "Periodic sweep failed, retrying next interval"),
        }
    }
}

/// Plan that patches a tracked entry in place; untracked ids are ignored
fn patch<'a>(
    resource_id: &'a ResourceId,
    locator: &'a str,
    title: &'a str,
) -> impl FnMut(&Registry) -> Result<Option<Registry>, CommandError> + 'a {
    move |registry| {
        let mut next = registry.clone();
        Ok(next.patch(resource_id, locator, title).then_some(next))
    }
}

/// Sending side of the reconciler queue
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<ReconcilerInput>,
}

impl ReconcilerHandle {
    /// Queue a host notification
    pub async fn submit(&self, event: ResourceEvent) -> Result<(), ReconcileError> {
        debug!(?event, "ReconcilerHandle::submit: called");
        self.tx
            .send(ReconcilerInput::Event(event))
            .await
            .map_err(|_| ReconcileError::ChannelClosed)
    }

    /// Run a sweep now and wait for its report
    pub async fn sweep(&self) -> Result<SweepReport, ReconcileError> {
        debug!("ReconcilerHandle::sweep: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ReconcilerInput::Sweep { reply: Some(reply_tx) })
            .await
            .map_err(|_| ReconcileError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ReconcileError::ChannelClosed)?
    }

    /// Queue a sweep without waiting for it
    pub async fn request_sweep(&self) -> Result<(), ReconcileError> {
        self.tx
            .send(ReconcilerInput::Sweep { reply: None })
            .await
            .map_err(|_| ReconcileError::ChannelClosed)
    }

    pub async fn shutdown(&self) {
        debug!("ReconcilerHandle::shutdown: called");
        let _ = self.tx.send(ReconcilerInput::Shutdown).await;
    }
}
