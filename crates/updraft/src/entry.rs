//! Per-key node records.

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, MutexGuard};

use crate::error::ErrorInfo;
use crate::key::NodeKey;
use crate::node::Node;
use crate::version::IntVersion;

/// Dependencies a node requested together form one group. Groups are checked
/// sequentially during revalidation; members of a group concurrently.
pub(crate) type DepGroup = Vec<NodeKey>;

/// Externally visible node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Created but never evaluated.
    New,
    /// Cached value is suspect; must be revalidated or rebuilt.
    Dirty,
    /// Revalidation in progress: recorded dep groups are being re-checked.
    CheckDependencies,
    /// A builder attempt is in progress or parked on missing deps.
    Rebuilding,
    /// Evaluation completed, with a value or an error.
    Done,
    /// Dropped by deletion; about to leave the store.
    Deleted,
}

/// Internal lifecycle. `Dirty` distinguishes nodes that were directly
/// invalidated (their inputs are known to differ, so the builder must run)
/// from nodes dirtied transitively (a dep check may prove them still clean).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    New,
    Dirty { needs_rebuild: bool },
    CheckDependencies,
    Rebuilding,
    Done,
    Deleted,
}

impl Lifecycle {
    pub(crate) fn as_state(self) -> NodeState {
        match self {
            Lifecycle::New => NodeState::New,
            Lifecycle::Dirty { .. } => NodeState::Dirty,
            Lifecycle::CheckDependencies => NodeState::CheckDependencies,
            Lifecycle::Rebuilding => NodeState::Rebuilding,
            Lifecycle::Done => NodeState::Done,
            Lifecycle::Deleted => NodeState::Deleted,
        }
    }
}

/// Everything about a node, guarded by the entry's lock.
///
/// `scheduled` and `pending_signals` carry the single-flight discipline:
/// `scheduled` is the one token admitting the node to the work queue (and
/// stays held while a worker processes it), `pending_signals` counts dep
/// completions still outstanding before a parked node may run again. Both
/// only change under the lock, so a dep completing concurrently with the
/// node parking cannot lose the wakeup.
pub(crate) struct EntryState {
    pub lifecycle: Lifecycle,
    /// Last successfully computed value. Retained while dirty so
    /// revalidation can short-circuit.
    pub value: Option<Arc<dyn Node>>,
    /// Last error outcome. Cleared by a successful rebuild.
    pub error: Option<ErrorInfo>,
    /// Dep groups recorded by the last completed build, in declaration order.
    pub deps: Vec<DepGroup>,
    /// Dep groups declared so far by the in-flight attempt.
    pub building_deps: Vec<DepGroup>,
    /// Keys that depended on this node during their last build.
    pub rdeps: IndexSet<NodeKey, ahash::RandomState>,
    /// Parked rdeps awaiting this node's completion in the current pass.
    pub waiters: Vec<NodeKey>,
    /// Version at which the value last differed from its predecessor.
    pub last_changed: IntVersion,
    /// Version at which the node last completed a build or revalidation.
    pub last_evaluated: IntVersion,
    /// Next dep group to re-check while in `CheckDependencies`.
    pub check_group: usize,
    /// Queue admission token; see the struct docs.
    pub scheduled: bool,
    /// Outstanding dep-completion signals; see the struct docs.
    pub pending_signals: usize,
}

impl EntryState {
    /// The node finished this or an earlier pass and its result is usable.
    pub(crate) fn is_done(&self) -> bool {
        self.lifecycle == Lifecycle::Done
    }

    pub(crate) fn flat_deps(&self) -> impl Iterator<Item = &NodeKey> {
        self.deps.iter().flatten()
    }

    /// Outbound edges to follow when hunting for cycles: the in-flight
    /// attempt's declarations if there are any, else the committed deps a
    /// revalidation is waiting on.
    pub(crate) fn stuck_edges(&self) -> impl Iterator<Item = &NodeKey> {
        let groups = if self.building_deps.is_empty() {
            &self.deps
        } else {
            &self.building_deps
        };
        groups.iter().flatten()
    }
}

/// The record for one key.
pub(crate) struct NodeEntry {
    key: NodeKey,
    state: Mutex<EntryState>,
}

impl NodeEntry {
    pub(crate) fn new(key: NodeKey) -> Self {
        Self {
            key,
            state: Mutex::new(EntryState {
                lifecycle: Lifecycle::New,
                value: None,
                error: None,
                deps: Vec::new(),
                building_deps: Vec::new(),
                rdeps: IndexSet::default(),
                waiters: Vec::new(),
                last_changed: IntVersion::MINIMAL,
                last_evaluated: IntVersion::MINIMAL,
                check_group: 0,
                scheduled: false,
                pending_signals: 0,
            }),
        }
    }

    pub(crate) fn key(&self) -> &NodeKey {
        &self.key
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock()
    }

    /// Build a consistent snapshot of this entry.
    pub(crate) fn snapshot(&self) -> NodeSnapshot {
        let state = self.lock();
        NodeSnapshot {
            key: self.key.clone(),
            state: state.lifecycle.as_state(),
            value: state.value.clone(),
            error: state.error.clone(),
            deps: state.deps.clone(),
            rdeps: state.rdeps.iter().cloned().collect(),
            last_changed: state.last_changed,
            last_evaluated: state.last_evaluated,
        }
    }
}

/// A point-in-time copy of one node entry, for introspection and dumps.
///
/// Snapshots are consistent per-key but not across keys.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub key: NodeKey,
    pub state: NodeState,
    pub value: Option<Arc<dyn Node>>,
    pub error: Option<ErrorInfo>,
    pub deps: Vec<Vec<NodeKey>>,
    pub rdeps: Vec<NodeKey>,
    pub last_changed: IntVersion,
    pub last_evaluated: IntVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_snapshot() {
        let entry = NodeEntry::new(NodeKey::new("n", 1u32));
        let snap = entry.snapshot();
        assert_eq!(snap.state, NodeState::New);
        assert!(snap.value.is_none());
        assert!(snap.error.is_none());
        assert_eq!(snap.last_changed, IntVersion::MINIMAL);
    }

    #[test]
    fn test_lifecycle_as_state() {
        assert_eq!(Lifecycle::New.as_state(), NodeState::New);
        assert_eq!(
            Lifecycle::Dirty { needs_rebuild: true }.as_state(),
            NodeState::Dirty
        );
        assert_eq!(Lifecycle::Done.as_state(), NodeState::Done);
    }

    #[test]
    fn test_stuck_edges_prefer_in_flight_declarations() {
        let entry = NodeEntry::new(NodeKey::new("n", 1u32));
        let old = NodeKey::new("n", 2u32);
        let fresh = NodeKey::new("n", 3u32);
        {
            let mut state = entry.lock();
            state.deps = vec![vec![old]];
            state.building_deps = vec![vec![fresh.clone()]];
        }
        let state = entry.lock();
        let edges: Vec<_> = state.stuck_edges().cloned().collect();
        assert_eq!(edges, vec![fresh]);
    }
}
