//! Optimistic read / compute / compare-and-swap loop
//!
//! The registry is never locked. A writer reads the current versioned value,
//! plans the next registry from it, and commits with `compare_and_swap`. On a
//! conflict the whole cycle runs again against the fresh value, so the plan
//! re-validates every time. Attempts are bounded and each store call is
//! bounded by a timeout.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use pinstore::{CasOutcome, Registry, RegistryStore, StoreError, Versioned};
use tracing::{debug, warn};

use super::CommandError;
use crate::config::RouterConfig;

/// Router lifecycle for a single command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    Applying,
    Settled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Validating => "validating",
            Phase::Applying => "applying",
            Phase::Settled => "settled",
        };
        write!(f, "{}", s)
    }
}

/// Bounds on how hard a writer tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub store_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for RetryPolicy {
    fn from(config: &RouterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            store_timeout: config.store_timeout(),
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::store_unavailable(e)
    }
}

/// Run one store call under the policy's timeout
pub async fn timed<T, F>(policy: &RetryPolicy, call: F) -> Result<T, CommandError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(policy.store_timeout, call).await {
        Ok(result) => result.map_err(CommandError::from),
        Err(_) => {
            warn!(timeout = ?policy.store_timeout, "Registry store call timed out");
            Err(CommandError::store_unavailable(format!(
                "no answer within {}ms",
                policy.store_timeout.as_millis()
            )))
        }
    }
}

/// Apply `plan` to the shared registry with optimistic concurrency.
///
/// `plan` sees the current registry and returns the registry to commit,
/// `Ok(None)` to leave it untouched, or a signal to abort. Returns the value
/// the registry holds once the command settles.
pub async fn update<F>(
    store: &dyn RegistryStore,
    policy: &RetryPolicy,
    operation: &str,
    mut plan: F,
) -> Result<Versioned, CommandError>
where
    F: FnMut(&Registry) -> Result<Option<Registry>, CommandError>,
{
    for attempt in 1..=policy.max_attempts {
        let current = timed(policy, store.read()).await?;
        debug!(operation, attempt, version = current.version, phase = %Phase::Validating, "update");

        let Some(next) = plan(&current.registry)? else {
            debug!(operation, version = current.version, phase = %Phase::Settled, "update: nothing to write");
            return Ok(current);
        };

        debug!(operation, attempt, entries = next.len(), phase = %Phase::Applying, "update");
        match timed(policy, store.compare_and_swap(current.version, next.clone())).await? {
            CasOutcome::Committed(version) => {
                debug!(operation, version, phase = %Phase::Settled, "update: committed");
                let updated_at = if version == current.version {
                    current.updated_at
                } else {
                    chrono::Utc::now()
                };
                return Ok(Versioned {
                    version,
                    updated_at,
                    registry: next,
                });
            }
            CasOutcome::Conflict { current: stored } => {
                debug!(operation, attempt, expected = current.version, stored, "update: conflict, retrying");
            }
        }
    }

    warn!(operation, attempts = policy.max_attempts, "Giving up after repeated conflicts");
    Err(CommandError::ConcurrentModification {
        attempts: policy.max_attempts,
    })
}
