use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use fsbroker_core::ContentHash;

use crate::path_policy::canonical_key;

/// In-memory mapping from canonical path to the latest known content hash.
///
/// Entries are created lazily: a path enters the registry the first time a
/// core operation successfully reads or writes its bytes. The map is
/// internally synchronized, so the watcher thread can update it without
/// touching the lock manager; operations that hold a write lock overwrite
/// any concurrent watcher update at completion by storing the
/// post-operation hash.
#[derive(Debug, Default)]
pub struct HashRegistry {
    entries: DashMap<PathBuf, ContentHash>,
}

impl HashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<ContentHash> {
        self.entries.get(&canonical_key(path)).map(|e| e.clone())
    }

    pub fn update(&self, path: &Path, hash: ContentHash) {
        self.entries.insert(canonical_key(path), hash);
    }

    /// Removes the entry, returning the hash it held.
    pub fn remove(&self, path: &Path) -> Option<ContentHash> {
        self.entries.remove(&canonical_key(path)).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<PathBuf, ContentHash> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Replaces the full contents with a snapshot. Keys are re-canonicalized
    /// so a snapshot taken on another spelling of the same tree still lands
    /// on the right entries.
    pub fn restore(&self, state: HashMap<PathBuf, ContentHash>) {
        self.entries.clear();
        for (path, hash) in state {
            self.entries.insert(canonical_key(&path), hash);
        }
    }
}
