//! File-backed registry store
//!
//! The record lives in a single JSON file. Every commit takes an exclusive
//! `fs2` lock on a sidecar `.lock` file, re-reads the record, applies the
//! compare step, and replaces the file through a temp file + rename, so a
//! write is never observed half-applied and CAS holds across processes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{
    CasOutcome, ChangeNotifier, DEFAULT_CHANGE_CAPACITY, RegistryChange, RegistryStore, StoreError, Version,
    Versioned, resolve_cas,
};
use crate::registry::Registry;

/// Registry persisted as a JSON file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    notifier: ChangeNotifier,
}

impl FileStore {
    /// Open the store at `path`, creating an empty record if none exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "FileStore::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let store = Self {
            path,
            notifier: ChangeNotifier::new(DEFAULT_CHANGE_CAPACITY),
        };

        with_lock(&store.lock_path(), LockMode::Exclusive, || {
            if !store.path.exists() {
                info!(path = %store.path.display(), "Creating empty registry record");
                persist(&store.path, &Versioned::initial())?;
            }
            Ok(())
        })?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    /// Read-modify-write under the exclusive lock, on a blocking thread
    async fn commit<F>(&self, decide: F) -> Result<(CasOutcome, Option<RegistryChange>), StoreError>
    where
        F: FnOnce(&Versioned) -> (CasOutcome, Option<Versioned>) + Send + 'static,
    {
        let path = self.path.clone();
        let lock = self.lock_path();
        let result = tokio::task::spawn_blocking(move || {
            with_lock(&lock, LockMode::Exclusive, || {
                let stored = load(&path)?;
                let (outcome, successor) = decide(&stored);
                match successor {
                    Some(next) => {
                        persist(&path, &next)?;
                        Ok((
                            outcome,
                            Some(RegistryChange {
                                previous: stored,
                                current: next,
                            }),
                        ))
                    }
                    None => Ok((outcome, None)),
                }
            })
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))??;

        if let (_, Some(change)) = &result {
            self.notifier.notify(change.previous.clone(), change.current.clone());
        }
        Ok(result)
    }
}

#[async_trait]
impl RegistryStore for FileStore {
    async fn read(&self) -> Result<Versioned, StoreError> {
        let path = self.path.clone();
        let lock = self.lock_path();
        tokio::task::spawn_blocking(move || with_lock(&lock, LockMode::Shared, || load(&path)))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }

    async fn write(&self, registry: Registry) -> Result<Version, StoreError> {
        debug!(entries = registry.len(), "FileStore::write: called");
        let (outcome, _) = self
            .commit(move |stored| resolve_cas(stored, stored.version, registry))
            .await?;
        match outcome {
            CasOutcome::Committed(version) | CasOutcome::Conflict { current: version } => Ok(version),
        }
    }

    async fn compare_and_swap(&self, expected: Version, next: Registry) -> Result<CasOutcome, StoreError> {
        debug!(expected, entries = next.len(), "FileStore::compare_and_swap: called");
        let (outcome, _) = self.commit(move |stored| resolve_cas(stored, expected, next)).await?;
        Ok(outcome)
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.notifier.subscribe()
    }
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn with_lock<T>(lock_path: &Path, mode: LockMode, f: impl FnOnce() -> Result<T, StoreError>) -> Result<T, StoreError> {
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;
    match mode {
        LockMode::Shared => lock_file.lock_shared()?,
        LockMode::Exclusive => lock_file.lock_exclusive()?,
    }
    let result = f();
    // Unlock errors are irrelevant: closing the descriptor releases the lock too
    let _ = lock_file.unlock();
    result
}

/// Load the record; a missing file is the never-written initial registry
fn load(path: &Path) -> Result<Versioned, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Versioned::initial()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))
}

fn persist(path: &Path, value: &Versioned) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut tmp = fs::File::create(&tmp_path)?;
    tmp.write_all(json.as_bytes())?;
    tmp.sync_all()?;
    fs::rename(&tmp_path, path)?;
    debug!(version = value.version, path = %path.display(), "persist: record replaced");
    Ok(())
}
