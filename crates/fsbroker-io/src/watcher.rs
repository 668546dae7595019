/*!
Filesystem watcher: feeds external modifications back into the hash
registry with debouncing and event coalescing.

Raw notify events funnel through a channel into a buffer keyed by path;
each new event refreshes its entry's timestamp. Entries older than the
debounce window are flushed and processed. Coalescing within the window:

- DELETE then CREATE collapses to MODIFY,
- CREATE then DELETE cancels out,
- MODIFY absorbs anything later,
- a rename is decomposed into DELETE(from) + CREATE(to) first.

Only paths already present in the registry are touched (the registry is
populated by core operations, never by the watcher). The watcher never
takes lock-manager locks; its registry writes are best-effort and a
write-holding operation overwrites them at completion.

Backends: native recursive watching per base directory, falling back to
polling for network mounts and when the native backend reports resource
exhaustion (inotify limits).
*/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use crate::path_policy::canonical_key;
use crate::registry::HashRegistry;
use fsbroker_core::{hash_file_bounded, HashOutcome};

/// Kinds of registry-affecting change events surfaced to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Removed,
}

/// A change to a tracked file, published on the service's broadcast
/// channel by both operations and the watcher.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

enum WatcherMsg {
    Event(Result<Event, notify::Error>),
    Stop,
}

/// Owns the watcher thread; dropping or calling [`stop`](Self::stop)
/// shuts it down.
pub struct FileWatcher {
    tx: mpsc::Sender<WatcherMsg>,
    join: Option<thread::JoinHandle<()>>,
}

impl FileWatcher {
    pub fn stop(&mut self) {
        let _ = self.tx.send(WatcherMsg::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(WatcherMsg::Stop);
    }
}

fn is_network_path(path: &Path) -> bool {
    let Some(s) = path.to_str() else {
        return false;
    };
    s.starts_with("\\\\") || s.starts_with("/mnt/") || s.starts_with("/net/")
}

enum Backend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

impl Backend {
    fn watch(&mut self, root: &Path) -> notify::Result<()> {
        match self {
            Backend::Native(w) => w.watch(root, RecursiveMode::Recursive),
            Backend::Poll(w) => w.watch(root, RecursiveMode::Recursive),
        }
    }
}

fn resource_exhausted(err: &notify::Error) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("inotify") || text.contains("too many") || text.contains("no space")
}

fn create_backend(
    root: &Path,
    tx: mpsc::Sender<WatcherMsg>,
    poll_interval: Duration,
) -> notify::Result<Backend> {
    let handler = move |res: Result<Event, notify::Error>| {
        let _ = tx.send(WatcherMsg::Event(res));
    };

    if is_network_path(root) {
        tracing::warn!(
            "network path detected, using polling watcher: {}",
            root.display()
        );
        let config = Config::default().with_poll_interval(poll_interval);
        return Ok(Backend::Poll(PollWatcher::new(handler, config)?));
    }

    match RecommendedWatcher::new(handler.clone(), Config::default()) {
        Ok(w) => Ok(Backend::Native(w)),
        Err(e) if resource_exhausted(&e) => {
            tracing::warn!("native watcher unavailable ({e}), falling back to polling");
            let config = Config::default().with_poll_interval(poll_interval);
            Ok(Backend::Poll(PollWatcher::new(handler, config)?))
        }
        Err(e) => Err(e),
    }
}

/// Starts the watcher thread over `roots`. Blocks until every root is
/// registered so callers cannot miss events raised immediately after
/// startup.
pub fn start_watcher(
    roots: Vec<PathBuf>,
    debounce: Duration,
    registry: Arc<HashRegistry>,
    max_file_size_bytes: u64,
    events_tx: broadcast::Sender<FileChangeEvent>,
) -> FileWatcher {
    let (tx, rx) = mpsc::channel::<WatcherMsg>();
    let (ready_tx, ready_rx) = mpsc::channel::<()>();

    let thread_tx = tx.clone();
    let join = thread::spawn(move || {
        let poll_interval = Duration::from_secs(2);
        let mut backends = Vec::new();
        for root in &roots {
            if !root.exists() {
                tracing::warn!("watch root does not exist, skipping: {}", root.display());
                continue;
            }
            match create_backend(root, thread_tx.clone(), poll_interval) {
                Ok(mut backend) => {
                    let watch_result = backend.watch(root);
                    match watch_result {
                        Ok(()) => backends.push(backend),
                        Err(e) if resource_exhausted(&e) => {
                            let config = Config::default().with_poll_interval(poll_interval);
                            match PollWatcher::new(
                                {
                                    let tx = thread_tx.clone();
                                    move |res| {
                                        let _ = tx.send(WatcherMsg::Event(res));
                                    }
                                },
                                config,
                            ) {
                                Ok(mut poll) => {
                                    if poll.watch(root, RecursiveMode::Recursive).is_ok() {
                                        backends.push(Backend::Poll(poll));
                                    }
                                }
                                Err(e) => tracing::error!(
                                    "failed to start polling watcher for {}: {e}",
                                    root.display()
                                ),
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to watch {}: {e}", root.display());
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("failed to create watcher for {}: {e}", root.display());
                }
            }
        }
        let _ = ready_tx.send(());

        debounce_loop(rx, debounce, &registry, max_file_size_bytes, &events_tx);
        drop(backends);
    });

    // Wait for registration to finish before returning.
    let _ = ready_rx.recv();

    FileWatcher {
        tx,
        join: Some(join),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Created,
    Modified,
    Deleted,
}

/// Maps a notify event into zero or more raw per-path events. Renames
/// decompose into a delete of the source and a create of the destination
/// so coalescing can treat them uniformly.
fn map_notify_event(event: Event) -> Vec<(PathBuf, RawKind)> {
    use notify::event::{ModifyKind, RenameMode};
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .map(|p| (p, RawKind::Created))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .map(|p| (p, RawKind::Deleted))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if event.paths.len() >= 2 {
                let from = event.paths[0].clone();
                let to = event.paths[1].clone();
                vec![(from, RawKind::Deleted), (to, RawKind::Created)]
            } else {
                event
                    .paths
                    .into_iter()
                    .map(|p| (p, RawKind::Modified))
                    .collect()
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .into_iter()
            .map(|p| (p, RawKind::Deleted))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .into_iter()
            .map(|p| (p, RawKind::Created))
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .into_iter()
            .map(|p| (p, RawKind::Modified))
            .collect(),
        _ => Vec::new(),
    }
}

fn coalesce(pending: &mut HashMap<PathBuf, (RawKind, Instant)>, path: PathBuf, incoming: RawKind) {
    let now = Instant::now();
    match pending.get(&path).map(|(kind, _)| *kind) {
        Some(RawKind::Deleted) if incoming == RawKind::Created => {
            pending.insert(path, (RawKind::Modified, now));
        }
        Some(RawKind::Created) if incoming == RawKind::Deleted => {
            pending.remove(&path);
        }
        Some(RawKind::Modified) => {
            pending.insert(path, (RawKind::Modified, now));
        }
        _ => {
            pending.insert(path, (incoming, now));
        }
    }
}

fn debounce_loop(
    rx: mpsc::Receiver<WatcherMsg>,
    debounce: Duration,
    registry: &HashRegistry,
    max_file_size_bytes: u64,
    events_tx: &broadcast::Sender<FileChangeEvent>,
) {
    let mut pending: HashMap<PathBuf, (RawKind, Instant)> = HashMap::new();

    loop {
        // recv_timeout doubles as the flush heartbeat.
        match rx.recv_timeout(debounce) {
            Ok(WatcherMsg::Event(Ok(event))) => {
                for (path, kind) in map_notify_event(event) {
                    coalesce(&mut pending, canonical_key(&path), kind);
                }
            }
            Ok(WatcherMsg::Event(Err(e))) => {
                tracing::warn!("watcher backend error: {e}");
            }
            Ok(WatcherMsg::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        let expired: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= debounce)
            .map(|(p, _)| p.clone())
            .collect();
        for path in expired {
            if let Some((kind, _)) = pending.remove(&path) {
                process_event(&path, kind, registry, max_file_size_bytes, events_tx);
            }
        }
    }
}

fn process_event(
    path: &Path,
    kind: RawKind,
    registry: &HashRegistry,
    max_file_size_bytes: u64,
    events_tx: &broadcast::Sender<FileChangeEvent>,
) {
    match kind {
        RawKind::Created | RawKind::Modified => {
            // Paths never seen by a core operation are not tracked.
            if registry.get(path).is_none() {
                tracing::trace!("ignoring event for unregistered file: {}", path.display());
                return;
            }
            match hash_file_bounded(path, max_file_size_bytes) {
                Ok(HashOutcome::Hashed { hash, .. }) => {
                    registry.update(path, hash);
                    let _ = events_tx.send(FileChangeEvent {
                        path: path.to_path_buf(),
                        kind: FileEventKind::Modified,
                    });
                    tracing::debug!("watcher refreshed hash for {}", path.display());
                }
                Ok(HashOutcome::TooLarge { size_bytes, .. }) => {
                    tracing::warn!(
                        "file grew past the hash limit ({size_bytes} bytes), leaving stale entry: {}",
                        path.display()
                    );
                }
                Ok(HashOutcome::NotARegularFile) => {
                    tracing::debug!("ignoring non-regular file: {}", path.display());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Vanished in the race window between event and hash.
                    registry.remove(path);
                    let _ = events_tx.send(FileChangeEvent {
                        path: path.to_path_buf(),
                        kind: FileEventKind::Removed,
                    });
                }
                Err(e) => {
                    tracing::warn!("failed to hash {}: {e}", path.display());
                }
            }
        }
        RawKind::Deleted => {
            if registry.remove(path).is_some() {
                let _ = events_tx.send(FileChangeEvent {
                    path: path.to_path_buf(),
                    kind: FileEventKind::Removed,
                });
                tracing::debug!("watcher removed deleted file: {}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsbroker_core::hash_bytes;
    use tempfile::tempdir;

    fn wait_for<F: Fn() -> bool>(cond: F, max: Duration) -> bool {
        let deadline = Instant::now() + max;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        false
    }

    #[test]
    fn coalesce_delete_then_create_becomes_modify() {
        let mut pending = HashMap::new();
        let path = PathBuf::from("/tmp/x");
        coalesce(&mut pending, path.clone(), RawKind::Deleted);
        coalesce(&mut pending, path.clone(), RawKind::Created);
        assert_eq!(pending[&path].0, RawKind::Modified);
    }

    #[test]
    fn coalesce_create_then_delete_cancels() {
        let mut pending = HashMap::new();
        let path = PathBuf::from("/tmp/x");
        coalesce(&mut pending, path.clone(), RawKind::Created);
        coalesce(&mut pending, path.clone(), RawKind::Deleted);
        assert!(pending.is_empty());
    }

    #[test]
    fn coalesce_modify_absorbs_later_events() {
        let mut pending = HashMap::new();
        let path = PathBuf::from("/tmp/x");
        coalesce(&mut pending, path.clone(), RawKind::Modified);
        coalesce(&mut pending, path.clone(), RawKind::Created);
        assert_eq!(pending[&path].0, RawKind::Modified);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn external_modification_refreshes_a_registered_hash() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("watched.txt");
        std::fs::write(&file, b"before").unwrap();

        let registry = Arc::new(HashRegistry::new());
        registry.update(&file, hash_bytes(b"before"));

        let (events_tx, _) = broadcast::channel(64);
        let mut watcher = start_watcher(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(50),
            Arc::clone(&registry),
            10 * 1024 * 1024,
            events_tx,
        );

        std::fs::write(&file, b"after").unwrap();

        let registry_check = Arc::clone(&registry);
        let file_check = file.clone();
        let updated = tokio::task::spawn_blocking(move || {
            wait_for(
                || registry_check.get(&file_check) == Some(hash_bytes(b"after")),
                Duration::from_secs(5),
            )
        })
        .await
        .unwrap();
        assert!(updated, "registry hash was not refreshed");

        watcher.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unregistered_files_are_ignored() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(HashRegistry::new());

        let (events_tx, _) = broadcast::channel(64);
        let mut watcher = start_watcher(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(50),
            Arc::clone(&registry),
            10 * 1024 * 1024,
            events_tx,
        );

        std::fs::write(dir.path().join("stranger.txt"), b"data").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(registry.is_empty());

        watcher.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn external_deletion_removes_the_entry() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("doomed.txt");
        std::fs::write(&file, b"data").unwrap();

        let registry = Arc::new(HashRegistry::new());
        registry.update(&file, hash_bytes(b"data"));

        let (events_tx, _) = broadcast::channel(64);
        let mut watcher = start_watcher(
            vec![dir.path().to_path_buf()],
            Duration::from_millis(50),
            Arc::clone(&registry),
            10 * 1024 * 1024,
            events_tx,
        );

        std::fs::remove_file(&file).unwrap();

        let registry_check = Arc::clone(&registry);
        let removed = tokio::task::spawn_blocking(move || {
            wait_for(|| registry_check.is_empty(), Duration::from_secs(5))
        })
        .await
        .unwrap();
        assert!(removed, "registry entry was not removed");

        watcher.stop();
    }
}
