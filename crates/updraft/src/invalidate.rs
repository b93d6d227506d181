//! Dirty and delete propagation along reverse-dependency edges.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::entry::Lifecycle;
use crate::graph::InMemoryGraph;
use crate::key::NodeKey;
use crate::observer::{InvalidationState, ProgressObserver};

/// How a seed node should be dirtied.
///
/// Directly invalidated nodes have changed inputs and must rebuild; nodes
/// reached by propagation may still prove clean by re-checking their deps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirtyKind {
    Rebuild,
    Check,
}

pub(crate) struct Invalidator<'a> {
    graph: &'a InMemoryGraph,
    observer: &'a dyn ProgressObserver,
}

impl<'a> Invalidator<'a> {
    pub(crate) fn new(graph: &'a InMemoryGraph, observer: &'a dyn ProgressObserver) -> Self {
        Self { graph, observer }
    }

    /// Mark the seeds and the transitive closure of their rdeps dirty.
    /// Values are retained so revalidation can short-circuit.
    ///
    /// The relation is commutative and idempotent, so traversal order does
    /// not matter; the observer may see the same node from multiple paths.
    pub(crate) fn dirty(&self, seeds: Vec<NodeKey>, kind: DirtyKind, parallelism: usize) {
        debug!(seeds = seeds.len(), ?kind, "marking dirty");
        let seeds: Vec<(NodeKey, DirtyKind)> = seeds.into_iter().map(|k| (k, kind)).collect();
        propagate(parallelism, seeds, |(key, kind)| {
            self.mark_dirty(&key, kind)
                .into_iter()
                .map(|rdep| (rdep, DirtyKind::Check))
                .collect()
        });
    }

    /// Returns the rdeps to continue through, empty when this node was
    /// already at least as dirty.
    fn mark_dirty(&self, key: &NodeKey, kind: DirtyKind) -> Vec<NodeKey> {
        let Some(entry) = self.graph.get(key) else {
            return Vec::new();
        };
        let mut state = entry.lock();
        match state.lifecycle {
            Lifecycle::Done => {
                state.lifecycle = Lifecycle::Dirty {
                    needs_rebuild: kind == DirtyKind::Rebuild,
                };
                state.check_group = 0;
                let had_value = state.value.is_some();
                let rdeps: Vec<NodeKey> = state.rdeps.iter().cloned().collect();
                drop(state);
                if had_value {
                    self.observer.invalidated(key, InvalidationState::Dirty);
                }
                rdeps
            }
            Lifecycle::Dirty { needs_rebuild: false } if kind == DirtyKind::Rebuild => {
                // Already propagated to rdeps; only escalate this node.
                state.lifecycle = Lifecycle::Dirty { needs_rebuild: true };
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Mark the seeds and the transitive closure of their rdeps deleted,
    /// clear their payload, then drop them from the store and unlink them
    /// from surviving deps.
    ///
    /// Entries leave the store only after the whole closure is marked.
    pub(crate) fn delete(&self, seeds: Vec<NodeKey>, parallelism: usize) {
        debug!(seeds = seeds.len(), "deleting");
        let unlinks: Mutex<Vec<(NodeKey, Vec<NodeKey>)>> = Mutex::new(Vec::new());
        propagate(parallelism, seeds, |key| {
            let (rdeps, deps) = self.mark_deleted(&key);
            if let Some(deps) = deps {
                unlinks.lock().push((key, deps));
            }
            rdeps
        });

        let unlinks = unlinks.into_inner();
        for (key, _) in &unlinks {
            self.graph.remove(key);
        }
        for (key, deps) in &unlinks {
            for dep in deps {
                if let Some(entry) = self.graph.get(dep) {
                    entry.lock().rdeps.shift_remove(key);
                }
            }
        }
    }

    /// Returns (rdeps to continue through, deps to unlink from) - deps is
    /// `None` when the node was already deleted.
    fn mark_deleted(&self, key: &NodeKey) -> (Vec<NodeKey>, Option<Vec<NodeKey>>) {
        let Some(entry) = self.graph.get(key) else {
            return (Vec::new(), None);
        };
        let mut state = entry.lock();
        if state.lifecycle == Lifecycle::Deleted {
            return (Vec::new(), None);
        }
        let had_value = state.value.is_some();
        let rdeps: Vec<NodeKey> = state.rdeps.iter().cloned().collect();
        let deps: Vec<NodeKey> = state.flat_deps().cloned().collect();
        state.lifecycle = Lifecycle::Deleted;
        state.value = None;
        state.error = None;
        state.deps.clear();
        state.building_deps.clear();
        state.rdeps.clear();
        state.waiters.clear();
        drop(state);
        if had_value {
            self.observer.invalidated(key, InvalidationState::Deleted);
        }
        (rdeps, Some(deps))
    }
}

/// Drive a worklist to quiescence over a small pool of threads.
///
/// `process` returns the follow-on items discovered for an item. Returns
/// once the queue is drained and every in-flight item has been processed.
fn propagate<T, F>(parallelism: usize, seeds: Vec<T>, process: F)
where
    T: Send,
    F: Fn(T) -> Vec<T> + Sync,
{
    if seeds.is_empty() {
        return;
    }
    enum Msg<T> {
        Work(T),
        Stop,
    }
    let (tx, rx) = crossbeam::channel::unbounded();
    let inflight = AtomicUsize::new(seeds.len());
    for seed in seeds {
        let _ = tx.send(Msg::Work(seed));
    }
    let workers = parallelism.max(1);
    let inflight = &inflight;
    let process = &process;
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let rx = rx.clone();
            scope.spawn(move || {
                while let Ok(Msg::Work(item)) = rx.recv() {
                    let next = process(item);
                    inflight.fetch_add(next.len(), Ordering::AcqRel);
                    for item in next {
                        let _ = tx.send(Msg::Work(item));
                    }
                    if inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
                        for _ in 0..workers {
                            let _ = tx.send(Msg::Stop);
                        }
                    }
                }
            });
        }
    });
}

/// Collect delete seeds: nodes matching the predicate plus every node that
/// is already dirty. Deletion is the hammer that guarantees freshness for
/// nodes the caller no longer trusts.
pub(crate) fn delete_seeds(
    graph: &InMemoryGraph,
    predicate: &(dyn Fn(&NodeKey) -> bool + Send + Sync),
) -> Vec<NodeKey> {
    graph
        .entries()
        .into_iter()
        .filter(|entry| {
            predicate(entry.key()) || matches!(entry.lock().lifecycle, Lifecycle::Dirty { .. })
        })
        .map(|entry| entry.key().clone())
        .collect()
}
