/*!
Per-path reader/writer coordination with strict FIFO ordering.

Queue discipline (per path):
- A read arriving with no active writer AND an empty queue is granted
  immediately; otherwise it queues. Because a non-empty queue forces new
  readers to wait behind any queued writer, a stream of readers cannot
  starve a writer.
- A write arriving with no active holders AND an empty queue is granted
  immediately; otherwise it queues.
- On every release the promotion routine inspects the head: a writer is
  granted alone once the path is idle; a reader is granted together with
  every consecutive reader behind it (batch read promotion).

Acquisitions return RAII guards. Dropping a guard releases the lock and
runs promotion synchronously, so cancellation, errors, and panics can
never leak a held lock.

Dual-write acquisition (for rename) always locks the lexicographically
smaller path first, which makes overlapping renames deadlock-free.
*/

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fsbroker_core::{LockStateKind, PendingRequestInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Read,
    Write,
}

impl LockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Read => "read",
            LockKind::Write => "write",
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum LockError {
    #[error("Failed to acquire write lock within {seconds}s")]
    Timeout { seconds: f64 },

    /// The queue entry was dropped without a grant (state restore or TTL
    /// purge removed it from under the waiter).
    #[error("Lock request was discarded before it could be granted")]
    Interrupted,
}

/// Wall-clock seconds since the Unix epoch. Wall time (not a monotonic
/// clock) so persisted TTL deadlines stay meaningful across restarts.
fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug)]
struct LockEntry {
    request_id: Uuid,
    kind: LockKind,
    created_at: f64,
    timeout: Option<f64>,
    ttl_expires_at: Option<f64>,
    /// Completion signal. `None` for entries restored from a snapshot;
    /// promotion still consumes them, there is just nobody to wake.
    grant: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct FileLock {
    active_readers: usize,
    active_writer: bool,
    queue: VecDeque<LockEntry>,
}

impl FileLock {
    fn is_idle(&self) -> bool {
        self.active_readers == 0 && !self.active_writer && self.queue.is_empty()
    }

    fn can_grant_read_now(&self) -> bool {
        !self.active_writer && self.queue.is_empty()
    }

    fn can_grant_write_now(&self) -> bool {
        self.active_readers == 0 && !self.active_writer && self.queue.is_empty()
    }

    /// Grants eligible waiters from the front of the queue: one writer if
    /// the path is idle, or the whole leading run of readers if no writer
    /// is active.
    fn promote_next(&mut self) {
        match self.queue.front().map(|e| e.kind) {
            Some(LockKind::Write) => {
                if self.active_readers == 0 && !self.active_writer {
                    if let Some(entry) = self.queue.pop_front() {
                        self.active_writer = true;
                        if let Some(tx) = entry.grant {
                            let _ = tx.send(());
                        }
                    }
                }
            }
            Some(LockKind::Read) => {
                if !self.active_writer {
                    while self.queue.front().map(|e| e.kind) == Some(LockKind::Read) {
                        if let Some(entry) = self.queue.pop_front() {
                            self.active_readers += 1;
                            if let Some(tx) = entry.grant {
                                let _ = tx.send(());
                            }
                        }
                    }
                }
            }
            None => {}
        }
    }
}

/// Public read-only view of one path's lock state.
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub active_readers: usize,
    pub active_writer: bool,
    pub queued: usize,
}

impl LockStatus {
    pub fn state_kind(&self) -> LockStateKind {
        if self.active_writer {
            LockStateKind::WriteLocked
        } else if self.active_readers > 0 {
            LockStateKind::ReadLocked
        } else {
            LockStateKind::Unlocked
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntrySnapshot {
    pub request_id: Uuid,
    pub lock_type: LockKind,
    pub created_at: f64,
    pub timeout: Option<f64>,
    pub ttl_expires_at: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLockSnapshot {
    pub active_readers: usize,
    pub active_writer: bool,
    pub queue: Vec<QueueEntrySnapshot>,
}

pub type LockManagerSnapshot = HashMap<PathBuf, FileLockSnapshot>;

#[derive(Debug)]
struct LockTable {
    locks: Mutex<HashMap<PathBuf, FileLock>>,
    /// TTL deadline factor for queued writes; 0 disables TTL recording
    /// (persistence off).
    ttl_multiplier: f64,
}

/// Coordinates per-path FIFO reader/writer locks. Single-host,
/// single-process; no multi-process locking is attempted. Cloning is
/// cheap and clones share the same table.
#[derive(Debug, Clone)]
pub struct LockManager {
    inner: Arc<LockTable>,
}

impl LockManager {
    pub fn new(ttl_multiplier: f64) -> Self {
        Self {
            inner: Arc::new(LockTable {
                locks: Mutex::new(HashMap::new()),
                ttl_multiplier,
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, FileLock>> {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires a shared read lock. Reads carry no timeout; they wait for
    /// the queue ahead of them to drain.
    pub async fn acquire_read(&self, path: &Path) -> Result<LockGuard, LockError> {
        let request_id = Uuid::new_v4();
        let waiter = {
            let mut table = self.table();
            let lock = table.entry(path.to_path_buf()).or_default();
            if lock.can_grant_read_now() {
                lock.active_readers += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                lock.queue.push_back(LockEntry {
                    request_id,
                    kind: LockKind::Read,
                    created_at: now_epoch_secs(),
                    timeout: None,
                    ttl_expires_at: None,
                    grant: Some(tx),
                });
                Some(rx)
            }
        };

        if let Some(rx) = waiter {
            rx.await.map_err(|_| LockError::Interrupted)?;
        }

        Ok(LockGuard {
            manager: self.clone(),
            path: path.to_path_buf(),
            request_id,
            kind: LockKind::Read,
        })
    }

    /// Acquires an exclusive write lock, waiting up to `timeout` seconds.
    /// The timeout applies only while queued; once granted, the caller
    /// holds the lock until the guard drops.
    pub async fn acquire_write(&self, path: &Path, timeout: f64) -> Result<LockGuard, LockError> {
        let request_id = Uuid::new_v4();
        let ttl_expires_at = (self.inner.ttl_multiplier > 0.0)
            .then(|| now_epoch_secs() + timeout * self.inner.ttl_multiplier);

        let waiter = {
            let mut table = self.table();
            let lock = table.entry(path.to_path_buf()).or_default();
            if lock.can_grant_write_now() {
                lock.active_writer = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                lock.queue.push_back(LockEntry {
                    request_id,
                    kind: LockKind::Write,
                    created_at: now_epoch_secs(),
                    timeout: Some(timeout),
                    ttl_expires_at,
                    grant: Some(tx),
                });
                Some(rx)
            }
        };

        if let Some(rx) = waiter {
            match tokio::time::timeout(Duration::from_secs_f64(timeout.max(0.0)), rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(LockError::Interrupted),
                Err(_elapsed) => {
                    let still_queued = {
                        let mut table = self.table();
                        match table.get_mut(path) {
                            Some(lock) => {
                                let was_queued = remove_queued(lock, request_id);
                                if was_queued {
                                    // The timed-out entry may have been
                                    // blocking grantable waiters behind it.
                                    lock.promote_next();
                                }
                                if lock.is_idle() {
                                    table.remove(path);
                                }
                                was_queued
                            }
                            None => false,
                        }
                    };
                    if !still_queued {
                        // Promotion won the race and granted on our
                        // behalf; hand the lock straight back.
                        self.release(path, LockKind::Write);
                    }
                    return Err(LockError::Timeout { seconds: timeout });
                }
            }
        }

        Ok(LockGuard {
            manager: self.clone(),
            path: path.to_path_buf(),
            request_id,
            kind: LockKind::Write,
        })
    }

    /// Acquires write locks on two paths in lexicographic order so that
    /// overlapping dual acquisitions cannot deadlock. Guard request ids
    /// map back to the caller's original argument order.
    pub async fn acquire_dual_write(
        &self,
        path_a: &Path,
        path_b: &Path,
        timeout: f64,
    ) -> Result<DualWriteGuard, LockError> {
        let a_first = path_a <= path_b;
        let (first, second) = if a_first {
            (path_a, path_b)
        } else {
            (path_b, path_a)
        };

        let first_guard = self.acquire_write(first, timeout).await?;
        // If the second acquisition fails, dropping `first_guard` releases
        // the first lock before the error propagates.
        let second_guard = self.acquire_write(second, timeout).await?;

        let (guard_a, guard_b) = if a_first {
            (first_guard, second_guard)
        } else {
            (second_guard, first_guard)
        };
        Ok(DualWriteGuard { guard_a, guard_b })
    }

    fn release(&self, path: &Path, kind: LockKind) {
        let mut table = self.table();
        let Some(lock) = table.get_mut(path) else {
            return;
        };
        match kind {
            LockKind::Read => {
                lock.active_readers = lock.active_readers.saturating_sub(1);
            }
            LockKind::Write => {
                lock.active_writer = false;
            }
        }
        lock.promote_next();
        if lock.is_idle() {
            table.remove(path);
        }
    }

    pub fn status(&self, path: &Path) -> LockStatus {
        let table = self.table();
        match table.get(path) {
            Some(lock) => LockStatus {
                active_readers: lock.active_readers,
                active_writer: lock.active_writer,
                queued: lock.queue.len(),
            },
            None => LockStatus {
                active_readers: 0,
                active_writer: false,
                queued: 0,
            },
        }
    }

    /// Aggregate (readers, writers) across all paths, for STATUS.
    pub fn aggregate_counts(&self) -> (usize, usize) {
        let table = self.table();
        let mut readers = 0;
        let mut writers = 0;
        for lock in table.values() {
            readers += lock.active_readers;
            writers += usize::from(lock.active_writer);
        }
        (readers, writers)
    }

    pub fn pending_for(&self, path: &Path) -> Vec<PendingRequestInfo> {
        let table = self.table();
        table
            .get(path)
            .map(|lock| {
                lock.queue
                    .iter()
                    .map(|entry| PendingRequestInfo {
                        kind: entry.kind.as_str().to_string(),
                        queued_at: entry.created_at,
                        ttl_expires_at: entry.ttl_expires_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serializable view of every path with state or a queue.
    pub fn snapshot(&self) -> LockManagerSnapshot {
        let table = self.table();
        table
            .iter()
            .map(|(path, lock)| {
                (
                    path.clone(),
                    FileLockSnapshot {
                        active_readers: lock.active_readers,
                        active_writer: lock.active_writer,
                        queue: lock
                            .queue
                            .iter()
                            .map(|entry| QueueEntrySnapshot {
                                request_id: entry.request_id,
                                lock_type: entry.kind,
                                created_at: entry.created_at,
                                timeout: entry.timeout,
                                ttl_expires_at: entry.ttl_expires_at,
                            })
                            .collect(),
                    },
                )
            })
            .collect()
    }

    /// Installs a snapshot verbatim, discarding current state. Restored
    /// queue entries have no waiting task; they sit in the queue until
    /// promotion consumes them or [`Self::purge_expired`] drops them.
    /// Requests arriving after the restore queue behind them.
    pub fn restore(&self, snapshot: LockManagerSnapshot) {
        let mut table = self.table();
        table.clear();
        for (path, file_snapshot) in snapshot {
            let queue = file_snapshot
                .queue
                .into_iter()
                .map(|entry| LockEntry {
                    request_id: entry.request_id,
                    kind: entry.lock_type,
                    created_at: entry.created_at,
                    timeout: entry.timeout,
                    ttl_expires_at: entry.ttl_expires_at,
                    grant: None,
                })
                .collect();
            table.insert(
                path,
                FileLock {
                    active_readers: file_snapshot.active_readers,
                    active_writer: file_snapshot.active_writer,
                    queue,
                },
            );
        }
    }

    /// Drops every queued entry whose TTL deadline has passed, then
    /// garbage-collects fully idle locks. Returns the number purged.
    /// In-session waiters whose entries are purged observe
    /// [`LockError::Interrupted`].
    pub fn purge_expired(&self) -> usize {
        let now = now_epoch_secs();
        let mut purged = 0;
        let mut table = self.table();
        table.retain(|_, lock| {
            let before = lock.queue.len();
            lock.queue
                .retain(|entry| entry.ttl_expires_at.is_none_or(|ttl| ttl > now));
            purged += before - lock.queue.len();
            lock.promote_next();
            !lock.is_idle()
        });
        purged
    }
}

fn remove_queued(lock: &mut FileLock, request_id: Uuid) -> bool {
    let before = lock.queue.len();
    lock.queue.retain(|entry| entry.request_id != request_id);
    lock.queue.len() != before
}

/// RAII lock hold. Dropping releases and promotes.
#[derive(Debug)]
pub struct LockGuard {
    manager: LockManager,
    path: PathBuf,
    request_id: Uuid,
    kind: LockKind,
}

impl LockGuard {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release(&self.path, self.kind);
    }
}

/// Two write locks held for a rename, released together on drop.
#[derive(Debug)]
pub struct DualWriteGuard {
    guard_a: LockGuard,
    guard_b: LockGuard,
}

impl DualWriteGuard {
    /// Request ids in the caller's original (a, b) order.
    pub fn request_ids(&self) -> (Uuid, Uuid) {
        (self.guard_a.request_id(), self.guard_b.request_id())
    }
}
