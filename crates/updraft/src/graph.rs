//! The thread-safe keyed store of node entries.

use std::sync::Arc;

use papaya::HashMap;

use crate::entry::NodeEntry;
use crate::key::NodeKey;

/// In-memory entry store.
///
/// Uses papaya's lock-free map so lookups never block behind a build; all
/// per-entry mutation happens under the entry's own lock.
pub(crate) struct InMemoryGraph {
    entries: HashMap<NodeKey, Arc<NodeEntry>, ahash::RandomState>,
}

impl InMemoryGraph {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Atomic get-or-create: exactly one creation wins for concurrent
    /// callers of the same key.
    pub(crate) fn get_or_create(&self, key: &NodeKey) -> Arc<NodeEntry> {
        let pinned = self.entries.pin();
        if let Some(entry) = pinned.get(key) {
            return entry.clone();
        }
        pinned
            .get_or_insert_with(key.clone(), || Arc::new(NodeEntry::new(key.clone())))
            .clone()
    }

    /// Non-blocking lookup.
    pub(crate) fn get(&self, key: &NodeKey) -> Option<Arc<NodeEntry>> {
        self.entries.pin().get(key).cloned()
    }

    /// Only the invalidator removes entries, after delete propagation.
    pub(crate) fn remove(&self, key: &NodeKey) {
        self.entries.pin().remove(key);
    }

    /// Snapshot of all entries. Consistent per-key, not globally; callers
    /// tolerate concurrent mutation.
    pub(crate) fn entries(&self) -> Vec<Arc<NodeEntry>> {
        self.entries.pin().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.pin().len()
    }
}
