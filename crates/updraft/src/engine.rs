//! The engine façade: an auto-updating graph of cached node values.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::debug;

use crate::builder::NodeBuilder;
use crate::entry::{Lifecycle, NodeSnapshot};
use crate::error::{ErrorInfo, UpdateError};
use crate::eval::{Abort, BuilderRegistry, Evaluator};
use crate::graph::InMemoryGraph;
use crate::invalidate::{delete_seeds, DirtyKind, Invalidator};
use crate::key::NodeKey;
use crate::node::Node;
use crate::observer::{NoopObserver, ProgressObserver};
use crate::reporter::Reporter;
use crate::result::{RootOutcome, UpdateResult};
use crate::version::IntVersion;

type DeletePredicate = Box<dyn Fn(&NodeKey) -> bool + Send + Sync>;

/// Mutations issued since the last update, drained at the start of the next.
#[derive(Default)]
struct PendingOps {
    invalidations: Vec<NodeKey>,
    invalidate_errors: bool,
    deletions: Vec<DeletePredicate>,
    injections: Vec<(NodeKey, Arc<dyn Node>)>,
}

/// A graph, defined by a set of builders that can construct node values
/// from node keys.
///
/// Builders can declare dependencies on prerequisite nodes; the graph makes
/// sure those are computed beforehand. Previously computed values are
/// cached; arbitrary nodes can be invalidated between calls to
/// [`update`](UpdatingGraph::update) and will be recomputed the next time
/// they are requested.
///
/// # Example
///
/// ```ignore
/// let graph = UpdatingGraph::builder()
///     .register("leaf", |_key: &NodeKey, _env: &mut BuildEnv| {
///         Ok(Some(Arc::new("c".to_string()) as Arc<dyn Node>))
///     })
///     .build();
/// let root = NodeKey::new("leaf", ());
/// let result = graph.update(&[root.clone()], true, 4, &NullReporter)?;
/// assert_eq!(result.value_of::<String>(&root).unwrap(), "c");
/// ```
pub struct UpdatingGraph {
    graph: InMemoryGraph,
    builders: BuilderRegistry,
    observer: Arc<dyn ProgressObserver>,
    pending: Mutex<PendingOps>,
    /// Current graph version; the lock also serializes update passes.
    version: Mutex<IntVersion>,
    interrupted: Arc<AtomicBool>,
}

/// Configures and creates an [`UpdatingGraph`].
pub struct UpdatingGraphBuilder {
    builders: BuilderRegistry,
    observer: Arc<dyn ProgressObserver>,
}

impl UpdatingGraphBuilder {
    /// Register the builder for one node-type tag.
    pub fn register(mut self, tag: &'static str, builder: impl NodeBuilder) -> Self {
        self.builders.insert(tag, Arc::new(builder));
        self
    }

    /// Install a progress observer. Defaults to [`NoopObserver`].
    pub fn observer(mut self, observer: impl ProgressObserver) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Install an already-shared progress observer.
    pub fn observer_arc(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> UpdatingGraph {
        UpdatingGraph {
            graph: InMemoryGraph::new(),
            builders: self.builders,
            observer: self.observer,
            pending: Mutex::new(PendingOps::default()),
            version: Mutex::new(IntVersion::MINIMAL),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Cancels an in-flight (or upcoming) update pass from another thread or
/// from inside a builder.
#[derive(Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl UpdatingGraph {
    pub fn builder() -> UpdatingGraphBuilder {
        UpdatingGraphBuilder {
            builders: BuilderRegistry::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Invalidate the cached values of the given nodes.
    ///
    /// They and everything transitively depending on them will be
    /// reconsidered on the next update; values are retained so unchanged
    /// dependents can be revalidated without a rebuild.
    pub fn invalidate(&self, keys: impl IntoIterator<Item = NodeKey>) {
        self.pending.lock().invalidations.extend(keys);
    }

    /// Invalidate the cached values of any nodes in error.
    pub fn invalidate_errors(&self) {
        self.pending.lock().invalidate_errors = true;
    }

    /// After the next completed update, nodes matching the predicate (and
    /// everything transitively depending on them) will have been removed
    /// from the cache, along with every node that was already dirty.
    pub fn delete(&self, predicate: impl Fn(&NodeKey) -> bool + Send + Sync + 'static) {
        self.pending.lock().deletions.push(Box::new(predicate));
    }

    /// Install the given values before the next update, bypassing builders.
    ///
    /// Existing nodes with the same keys are overwritten and their
    /// transitive dependents invalidated. Overwriting a node with known
    /// dependencies fails the next update with
    /// [`UpdateError::InjectConflict`]: injected and derived nodes must not
    /// blend.
    pub fn inject(&self, values: impl IntoIterator<Item = (NodeKey, Arc<dyn Node>)>) {
        self.pending.lock().injections.extend(values);
    }

    /// A handle with which another thread (or a builder) can interrupt the
    /// current pass.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flag: self.interrupted.clone(),
        }
    }

    /// Compute the transitive closure of the given roots: drain pending
    /// invalidations, deletions, and injections, then run builders until
    /// every root is computed, proven erroneous, or - under fail-fast - a
    /// first error aborts the pass.
    ///
    /// Concurrent callers are serialized; each completed call advances the
    /// graph version by one.
    pub fn update(
        &self,
        roots: &[NodeKey],
        keep_going: bool,
        parallelism: usize,
        reporter: &dyn Reporter,
    ) -> Result<UpdateResult, UpdateError> {
        let mut version_guard = self.version.lock();
        *version_guard = version_guard.next();
        let version = *version_guard;
        debug!(version = version.0, roots = roots.len(), keep_going, "update");

        let ops = mem::take(&mut *self.pending.lock());
        self.drain_pending(ops, version, parallelism)?;

        let roots: Vec<NodeKey> = {
            let unique: IndexSet<NodeKey, ahash::RandomState> =
                roots.iter().cloned().collect();
            unique.into_iter().collect()
        };

        let evaluator = Evaluator::new(
            &self.graph,
            &self.builders,
            self.observer.as_ref(),
            reporter,
            version,
            keep_going,
            parallelism,
            &self.interrupted,
        );
        let abort = evaluator.run(&roots);

        match abort {
            Some(Abort::Interrupted) => {
                self.reset_in_flight();
                self.interrupted.store(false, Ordering::Release);
                Err(UpdateError::Interrupted)
            }
            Some(Abort::FailFast { key, info }) => {
                self.reset_in_flight();
                reporter.error(&format!("update aborted by error in {key}"));
                let mut result = self.collect_results(&roots);
                result.push_error(key, info);
                Ok(result)
            }
            None => {
                // An interrupt that landed after the last worker checked
                // still surfaces; completed builds stay committed.
                if self.interrupted.swap(false, Ordering::AcqRel) {
                    self.reset_in_flight();
                    return Err(UpdateError::Interrupted);
                }
                evaluator.detect_cycles(&roots);
                Ok(self.collect_results(&roots))
            }
        }
    }

    fn drain_pending(
        &self,
        ops: PendingOps,
        version: IntVersion,
        parallelism: usize,
    ) -> Result<(), UpdateError> {
        let invalidator = Invalidator::new(&self.graph, self.observer.as_ref());

        if !ops.invalidations.is_empty() {
            invalidator.dirty(ops.invalidations, DirtyKind::Rebuild, parallelism);
        }
        if ops.invalidate_errors {
            let seeds: Vec<NodeKey> = self
                .graph
                .entries()
                .into_iter()
                .filter(|entry| entry.lock().error.is_some())
                .map(|entry| entry.key().clone())
                .collect();
            if !seeds.is_empty() {
                invalidator.dirty(seeds, DirtyKind::Rebuild, parallelism);
            }
        }

        if !ops.deletions.is_empty() {
            let deletions = ops.deletions;
            let matches = move |key: &NodeKey| deletions.iter().any(|pred| pred(key));
            let seeds = delete_seeds(&self.graph, &matches);
            if !seeds.is_empty() {
                invalidator.delete(seeds, parallelism);
            }
        }

        if !ops.injections.is_empty() {
            // Validate the whole batch before applying any of it.
            for (key, _) in &ops.injections {
                if let Some(entry) = self.graph.get(key) {
                    if !entry.lock().deps.is_empty() {
                        return Err(UpdateError::InjectConflict(key.clone()));
                    }
                }
            }
            let mut downstream = Vec::new();
            for (key, value) in ops.injections {
                let entry = self.graph.get_or_create(&key);
                let mut state = entry.lock();
                let changed = match &state.value {
                    Some(old) => !old.node_eq(value.as_ref()),
                    None => true,
                };
                state.value = Some(value);
                state.error = None;
                state.lifecycle = Lifecycle::Done;
                // An overwrite invalidates the transitive closure regardless
                // of value equality; the retained change version still lets
                // unchanged dependents revalidate without a rebuild.
                if changed {
                    state.last_changed = version;
                }
                state.last_evaluated = version;
                downstream.extend(state.rdeps.iter().cloned());
            }
            if !downstream.is_empty() {
                invalidator.dirty(downstream, DirtyKind::Check, parallelism);
            }
        }
        Ok(())
    }

    /// Roll entries an aborted pass left mid-flight back to a restartable
    /// dirty state.
    fn reset_in_flight(&self) {
        for entry in self.graph.entries() {
            let mut state = entry.lock();
            match state.lifecycle {
                Lifecycle::Done | Lifecycle::Deleted => continue,
                Lifecycle::Rebuilding => {
                    state.lifecycle = if state.value.is_some() {
                        Lifecycle::Dirty { needs_rebuild: true }
                    } else {
                        Lifecycle::New
                    };
                }
                Lifecycle::CheckDependencies => {
                    state.lifecycle = Lifecycle::Dirty { needs_rebuild: false };
                }
                Lifecycle::New | Lifecycle::Dirty { .. } => {}
            }
            state.scheduled = false;
            state.pending_signals = 0;
            state.waiters.clear();
            state.building_deps.clear();
            state.check_group = 0;
        }
    }

    fn collect_results(&self, roots: &[NodeKey]) -> UpdateResult {
        let mut result = UpdateResult::default();
        for root in roots {
            let Some(entry) = self.graph.get(root) else {
                continue;
            };
            let state = entry.lock();
            if !state.is_done() {
                continue;
            }
            if let Some(info) = &state.error {
                result.insert(root.clone(), RootOutcome::Error(info.clone()));
            } else if let Some(value) = &state.value {
                result.insert(root.clone(), RootOutcome::Value(value.clone()));
            }
        }
        result
    }

    /// The version the last update pass ran at.
    pub fn current_version(&self) -> IntVersion {
        *self.version.lock()
    }

    /// Snapshots of all nodes in the graph.
    pub fn nodes(&self) -> Vec<NodeSnapshot> {
        self.graph
            .entries()
            .into_iter()
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// The done (without error) nodes and their values.
    pub fn done_nodes(&self) -> Vec<(NodeKey, Arc<dyn Node>)> {
        self.graph
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let state = entry.lock();
                match (&state.lifecycle, &state.error, &state.value) {
                    (Lifecycle::Done, None, Some(value)) => {
                        Some((entry.key().clone(), value.clone()))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Snapshot of one node, if an earlier update created it.
    pub fn snapshot(&self, key: &NodeKey) -> Option<NodeSnapshot> {
        self.graph.get(key).map(|entry| entry.snapshot())
    }

    /// The value a node currently holds, if any.
    pub fn existing_value(&self, key: &NodeKey) -> Option<Arc<dyn Node>> {
        self.graph.get(key).and_then(|entry| entry.lock().value.clone())
    }

    /// The error a node currently holds, if any.
    pub fn existing_error(&self, key: &NodeKey) -> Option<ErrorInfo> {
        self.graph.get(key).and_then(|entry| entry.lock().error.clone())
    }

    /// Write a human-readable dump of the graph. Not thread-safe; use only
    /// for debugging.
    pub fn dump(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "graph version {}", self.version.lock().0)?;
        let mut snapshots = self.nodes();
        snapshots.sort_by(|a, b| a.key.debug_repr().cmp(b.key.debug_repr()));
        for snap in snapshots {
            writeln!(
                out,
                "{} state={:?} changed=v{} evaluated=v{}",
                snap.key, snap.state, snap.last_changed.0, snap.last_evaluated.0
            )?;
            if let Some(value) = &snap.value {
                writeln!(out, "  value: {value:?}")?;
            }
            if let Some(error) = &snap.error {
                writeln!(out, "  error: {error}")?;
            }
            for (i, group) in snap.deps.iter().enumerate() {
                writeln!(out, "  deps[{i}]: {group:?}")?;
            }
            if !snap.rdeps.is_empty() {
                writeln!(out, "  rdeps: {:?}", snap.rdeps)?;
            }
        }
        Ok(())
    }
}
