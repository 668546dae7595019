/*!
Optional state persistence: debounced snapshots of the hash registry and
lock queues, plus startup recovery.

Saves are debounced through a single abortable timer task; `save_now`
cancels the timer and flushes immediately under the save mutex. The
snapshot file is written with `atomic_write`, so a crash mid-save never
corrupts the previous state.

Startup recovery: read and decode the file (corrupt or absent means
fresh state), restore both snapshots, purge TTL-expired queue entries,
re-validate every registry entry against the bytes on disk, then flush
the cleaned state back.

With persistence disabled every method is a no-op.
*/

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::atomic::atomic_write;
use crate::locks::{LockManager, LockManagerSnapshot};
use crate::registry::HashRegistry;
use fsbroker_core::{hash_file_bounded, ContentHash, HashOutcome, PersistenceConfig};

pub(crate) const STATE_SCHEMA_VERSION: u32 = 1;

/// On-disk snapshot shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: String,
    pub hash_registry: HashMap<PathBuf, ContentHash>,
    pub pending_queue: LockManagerSnapshot,
}

struct PersistInner {
    enabled: bool,
    state_file: PathBuf,
    debounce: Duration,
    max_file_size_bytes: u64,
    registry: Arc<HashRegistry>,
    locks: LockManager,
    dirty: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    save_lock: tokio::sync::Mutex<()>,
}

/// Cloneable handle; clones share the same debounce timer and save lock.
#[derive(Clone)]
pub struct StatePersistence {
    inner: Arc<PersistInner>,
}

impl StatePersistence {
    pub fn new(
        config: &PersistenceConfig,
        max_file_size_bytes: u64,
        registry: Arc<HashRegistry>,
        locks: LockManager,
    ) -> Self {
        Self {
            inner: Arc::new(PersistInner {
                enabled: config.enabled,
                state_file: config.state_file_path(),
                debounce: Duration::from_secs_f64(config.write_debounce_seconds.max(0.0)),
                max_file_size_bytes,
                registry,
                locks,
                dirty: AtomicBool::new(false),
                timer: Mutex::new(None),
                save_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn state_file(&self) -> &PathBuf {
        &self.inner.state_file
    }

    fn swap_timer(&self, next: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *timer, next)
    }

    /// Marks state dirty and (re)schedules the debounced save. Calling
    /// again within the window resets the timer.
    pub fn mark_dirty(&self) {
        if !self.inner.enabled {
            return;
        }
        self.inner.dirty.store(true, Ordering::SeqCst);

        let this = self.clone();
        let debounce = self.inner.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            this.debounced_save().await;
        });
        if let Some(previous) = self.swap_timer(Some(handle)) {
            previous.abort();
        }
    }

    async fn debounced_save(&self) {
        let _guard = self.inner.save_lock.lock().await;
        if !self.inner.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        self.save().await;
    }

    /// Cancels any pending timer and flushes immediately. Used on
    /// shutdown so no debounced state is lost.
    pub async fn save_now(&self) {
        if !self.inner.enabled {
            return;
        }
        if let Some(timer) = self.swap_timer(None) {
            timer.abort();
        }
        let _guard = self.inner.save_lock.lock().await;
        self.save().await;
        self.inner.dirty.store(false, Ordering::SeqCst);
    }

    async fn save(&self) {
        let state = PersistedState {
            version: STATE_SCHEMA_VERSION,
            saved_at: fsbroker_core::utc_timestamp(),
            hash_registry: self.inner.registry.snapshot(),
            pending_queue: self.inner.locks.snapshot(),
        };

        let bytes = match serde_json::to_vec_pretty(&state) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("failed to serialize persisted state: {e}");
                return;
            }
        };

        if let Some(parent) = self.inner.state_file.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::error!("failed to create state directory {}: {e}", parent.display());
                return;
            }
        }

        match atomic_write(&self.inner.state_file, &bytes).await {
            Ok(()) => tracing::debug!("saved state to {}", self.inner.state_file.display()),
            Err(e) => tracing::error!(
                "error saving state to {}: {e}",
                self.inner.state_file.display()
            ),
        }
    }

    /// Startup recovery. No-op when disabled or when no state file exists.
    pub async fn load(&self) {
        if !self.inner.enabled {
            return;
        }

        let raw = match tokio::fs::read(&self.inner.state_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "no state file at {}, starting fresh",
                    self.inner.state_file.display()
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    "error reading state file {}: {e}",
                    self.inner.state_file.display()
                );
                return;
            }
        };

        let state: PersistedState = match serde_json::from_slice(&raw) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(
                    "corrupt state file at {}: {e}; starting fresh",
                    self.inner.state_file.display()
                );
                return;
            }
        };

        tracing::info!(
            "loading state from {} (saved_at {})",
            self.inner.state_file.display(),
            state.saved_at
        );

        let restored_entries = state.hash_registry.len();
        self.inner.registry.restore(state.hash_registry);
        tracing::debug!("restored {restored_entries} hash registry entries");

        self.inner.locks.restore(state.pending_queue);
        let purged = self.inner.locks.purge_expired();
        if purged > 0 {
            tracing::info!("purged {purged} expired lock entries on startup");
        }

        self.revalidate_hashes().await;
        self.save_now().await;
    }

    /// Re-checks every registry entry against the file's current bytes:
    /// missing files drop out, changed files get their new hash.
    async fn revalidate_hashes(&self) {
        let snapshot = self.inner.registry.snapshot();
        let mut removed = 0usize;
        let mut updated = 0usize;

        for (path, stored_hash) in snapshot {
            if !path.exists() {
                self.inner.registry.remove(&path);
                removed += 1;
                tracing::info!("removed deleted file from registry: {}", path.display());
                continue;
            }

            match hash_file_bounded(&path, self.inner.max_file_size_bytes) {
                Ok(HashOutcome::Hashed { hash, .. }) => {
                    if hash != stored_hash {
                        tracing::warn!(
                            "hash mismatch for {} (external modification detected)",
                            path.display()
                        );
                        self.inner.registry.update(&path, hash);
                        updated += 1;
                    }
                }
                Ok(outcome) => {
                    tracing::warn!("skipping re-validation of {}: {outcome:?}", path.display());
                }
                Err(e) => {
                    tracing::warn!("error re-validating {}: {e}", path.display());
                }
            }
        }

        if removed > 0 || updated > 0 {
            tracing::info!("hash registry re-validation: {removed} removed, {updated} updated");
        }
    }
}
