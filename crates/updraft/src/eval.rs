//! The parallel evaluator.
//!
//! A pool of workers drains a shared queue of nodes ready to attempt
//! progress. A node attempt either completes the node (value or error),
//! continues immediately (all of its awaited deps raced to completion), or
//! parks the node until the last outstanding dep completion signals it back
//! onto the queue. Once the queue drains with unfinished roots remaining,
//! the stuck subgraph is scanned for cycles.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::builder::NodeBuilder;
use crate::cycle::CycleInfo;
use crate::entry::{Lifecycle, NodeEntry};
use crate::env::BuildEnv;
use crate::error::{BuildError, ErrorInfo};
use crate::graph::InMemoryGraph;
use crate::key::NodeKey;
use crate::node::Node;
use crate::observer::{EvaluationState, ProgressObserver};
use crate::reporter::Reporter;
use crate::version::{changed_since, IntVersion};

/// Why a pass ended early.
pub(crate) enum Abort {
    Interrupted,
    FailFast { key: NodeKey, info: ErrorInfo },
}

enum Msg {
    Process(Arc<NodeEntry>),
    Stop,
}

/// Result of one node attempt on a worker.
enum Attempt {
    /// Deps the attempt awaited all completed already; go again now.
    RetryNow,
    /// Subscribed to outstanding deps; the last signal re-enqueues the node.
    Parked,
    /// The node reached `Done` (or the pass aborted).
    Finished,
}

enum Action {
    Build,
    Check,
    Settled,
}

enum Subscribed {
    Ready,
    Parked,
}

pub(crate) type BuilderRegistry = HashMap<&'static str, Arc<dyn NodeBuilder>, ahash::RandomState>;

pub(crate) struct Evaluator<'a> {
    graph: &'a InMemoryGraph,
    builders: &'a BuilderRegistry,
    observer: &'a dyn ProgressObserver,
    reporter: &'a dyn Reporter,
    version: IntVersion,
    keep_going: bool,
    parallelism: usize,
    interrupted: &'a AtomicBool,
    tx: Sender<Msg>,
    rx: Receiver<Msg>,
    /// Nodes queued or being processed. The worker that drops it to zero
    /// stops the pool.
    inflight: AtomicUsize,
    abort: Mutex<Option<Abort>>,
}

impl<'a> Evaluator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        graph: &'a InMemoryGraph,
        builders: &'a BuilderRegistry,
        observer: &'a dyn ProgressObserver,
        reporter: &'a dyn Reporter,
        version: IntVersion,
        keep_going: bool,
        parallelism: usize,
        interrupted: &'a AtomicBool,
    ) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        Self {
            graph,
            builders,
            observer,
            reporter,
            version,
            keep_going,
            parallelism: parallelism.max(1),
            interrupted,
            tx,
            rx,
            inflight: AtomicUsize::new(0),
            abort: Mutex::new(None),
        }
    }

    /// Drive the given roots to quiescence. Returns the abort cause if the
    /// pass was cut short.
    pub(crate) fn run(&self, roots: &[NodeKey]) -> Option<Abort> {
        let mut to_enqueue = Vec::new();
        for key in roots {
            let entry = self.graph.get_or_create(key);
            let mut state = entry.lock();
            if state.is_done() || state.scheduled || state.pending_signals > 0 {
                continue;
            }
            state.scheduled = true;
            drop(state);
            to_enqueue.push(entry);
        }
        if to_enqueue.is_empty() {
            return self.abort.lock().take();
        }
        debug!(roots = to_enqueue.len(), workers = self.parallelism, "evaluating");
        for entry in to_enqueue {
            self.enqueue(entry);
        }
        std::thread::scope(|scope| {
            for _ in 0..self.parallelism {
                scope.spawn(|| self.worker());
            }
        });
        self.abort.lock().take()
    }

    fn worker(&self) {
        while let Ok(Msg::Process(entry)) = self.rx.recv() {
            self.process(&entry);
            if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.stop_pool();
            }
        }
    }

    fn stop_pool(&self) {
        for _ in 0..self.parallelism {
            let _ = self.tx.send(Msg::Stop);
        }
    }

    fn enqueue(&self, entry: Arc<NodeEntry>) {
        self.observer.enqueueing(entry.key());
        self.inflight.fetch_add(1, Ordering::AcqRel);
        let _ = self.tx.send(Msg::Process(entry));
    }

    fn aborted(&self) -> bool {
        self.abort.lock().is_some()
    }

    fn set_abort(&self, abort: Abort) {
        let mut slot = self.abort.lock();
        if slot.is_none() {
            *slot = Some(abort);
            drop(slot);
            self.stop_pool();
        }
    }

    /// Run one node until it completes, parks, or the pass aborts.
    fn process(&self, entry: &Arc<NodeEntry>) {
        loop {
            if self.interrupted.load(Ordering::Acquire) {
                self.set_abort(Abort::Interrupted);
            }
            if self.aborted() {
                entry.lock().scheduled = false;
                return;
            }
            let action = {
                let mut state = entry.lock();
                match state.lifecycle {
                    Lifecycle::Done | Lifecycle::Deleted => {
                        state.scheduled = false;
                        Action::Settled
                    }
                    Lifecycle::New => {
                        state.lifecycle = Lifecycle::Rebuilding;
                        state.building_deps.clear();
                        Action::Build
                    }
                    Lifecycle::Dirty { needs_rebuild } => {
                        // An errored node has no value to revalidate.
                        if needs_rebuild || state.value.is_none() {
                            state.lifecycle = Lifecycle::Rebuilding;
                            state.building_deps.clear();
                            Action::Build
                        } else {
                            state.lifecycle = Lifecycle::CheckDependencies;
                            state.check_group = 0;
                            Action::Check
                        }
                    }
                    Lifecycle::Rebuilding => Action::Build,
                    Lifecycle::CheckDependencies => Action::Check,
                }
            };
            let attempt = match action {
                Action::Settled => return,
                Action::Build => self.attempt_build(entry),
                Action::Check => self.attempt_check(entry),
            };
            match attempt {
                Attempt::RetryNow => continue,
                Attempt::Parked | Attempt::Finished => return,
            }
        }
    }

    /// Re-check recorded dep groups in declaration order. Members of a group
    /// are requested together; groups are sequenced so revalidation never
    /// widens the fan-out beyond what the prior build observed.
    fn attempt_check(&self, entry: &Arc<NodeEntry>) -> Attempt {
        loop {
            let (group, baseline) = {
                let state = entry.lock();
                if state.check_group >= state.deps.len() {
                    drop(state);
                    return self.finish_clean(entry);
                }
                (state.deps[state.check_group].clone(), state.last_evaluated)
            };
            if let Subscribed::Parked = self.subscribe(entry, &group) {
                return Attempt::Parked;
            }
            let mut outdated = false;
            for dep in &group {
                let dep_changed = match self.graph.get(dep) {
                    Some(dep_entry) => {
                        let dep_state = dep_entry.lock();
                        !dep_state.is_done() || changed_since(baseline, dep_state.last_changed)
                    }
                    None => true,
                };
                if dep_changed {
                    outdated = true;
                    break;
                }
            }
            let mut state = entry.lock();
            if outdated {
                trace!(node = %entry.key(), "dependency changed, rebuilding");
                state.lifecycle = Lifecycle::Rebuilding;
                state.building_deps.clear();
                return Attempt::RetryNow;
            }
            state.check_group += 1;
        }
    }

    /// Every dep across every group is unchanged: the cached value stands.
    fn finish_clean(&self, entry: &Arc<NodeEntry>) -> Attempt {
        let (value, waiters) = {
            let mut state = entry.lock();
            state.lifecycle = Lifecycle::Done;
            state.last_evaluated = self.version;
            state.check_group = 0;
            state.scheduled = false;
            (state.value.clone(), mem::take(&mut state.waiters))
        };
        trace!(node = %entry.key(), "revalidated");
        self.observer
            .evaluated(entry.key(), value.as_ref(), EvaluationState::Clean);
        self.signal(waiters);
        Attempt::Finished
    }

    /// Run the builder once and act on what it produced.
    fn attempt_build(&self, entry: &Arc<NodeEntry>) -> Attempt {
        let key = entry.key();
        let mut env = BuildEnv::new(self.graph, self.reporter, self.interrupted);
        let result = match self.builders.get(key.tag()) {
            Some(builder) => builder.build(key, &mut env),
            None => Err(BuildError::msg(format!(
                "no builder registered for node type `{}`",
                key.tag()
            ))),
        };
        let outcome = env.into_outcome();
        entry.lock().building_deps = outcome.groups;

        if !self.keep_going {
            // An errored dep ends a fail-fast pass no matter what this
            // builder made of the absence.
            if let Some((dep, info)) = outcome.dep_errors.first() {
                entry.lock().scheduled = false;
                self.set_abort(Abort::FailFast {
                    key: dep.clone(),
                    info: info.clone(),
                });
                return Attempt::Finished;
            }
        }

        match result {
            Ok(Some(value)) => {
                self.commit_value(entry, value);
                Attempt::Finished
            }
            Ok(None) if !outcome.missing.is_empty() => {
                match self.subscribe(entry, &outcome.missing) {
                    Subscribed::Ready => Attempt::RetryNow,
                    Subscribed::Parked => Attempt::Parked,
                }
            }
            Ok(None) if !outcome.dep_errors.is_empty() => {
                // Nothing is missing, but deps this builder needed are in
                // error: the failure is transitive.
                let info = ErrorInfo::transitive(outcome.dep_errors.iter().map(|(_, i)| i));
                self.commit_error(entry, info);
                Attempt::Finished
            }
            Ok(None) => {
                let info = ErrorInfo::from_exception(
                    key.clone(),
                    BuildError::msg("builder returned no value but requested no missing deps"),
                );
                self.commit_error(entry, info);
                Attempt::Finished
            }
            Err(err) => {
                let info = ErrorInfo::from_exception(key.clone(), err);
                self.commit_error(entry, info);
                Attempt::Finished
            }
        }
    }

    /// Subscribe `entry` to the completion of every not-yet-done key in
    /// `deps`, enqueueing any that are idle. `Ready` means nothing needed
    /// registering and the caller should proceed at once.
    ///
    /// A guard signal is held for the duration of registration so deps
    /// completing mid-loop cannot drive the pending count to zero and wake
    /// the node twice; late-added subscriptions on already-done deps are
    /// simply not registered, which is the immediate-signal case.
    fn subscribe(&self, entry: &Arc<NodeEntry>, deps: &[NodeKey]) -> Subscribed {
        entry.lock().pending_signals += 1;
        let mut to_enqueue = Vec::new();
        for dep_key in deps {
            let dep = self.graph.get_or_create(dep_key);
            entry.lock().pending_signals += 1;
            let mut dep_state = dep.lock();
            if dep_state.is_done() {
                drop(dep_state);
                entry.lock().pending_signals -= 1;
                continue;
            }
            dep_state.waiters.push(entry.key().clone());
            if !dep_state.scheduled && dep_state.pending_signals == 0 {
                dep_state.scheduled = true;
                drop(dep_state);
                to_enqueue.push(dep);
            }
        }
        for dep in to_enqueue {
            self.enqueue(dep);
        }
        let mut state = entry.lock();
        state.pending_signals -= 1;
        if state.pending_signals == 0 {
            // Queue token stays held; the caller continues in-worker.
            Subscribed::Ready
        } else {
            state.scheduled = false;
            Subscribed::Parked
        }
    }

    /// Deliver one completion signal to each parked waiter, re-enqueueing
    /// any whose last outstanding dep this was.
    fn signal(&self, waiters: Vec<NodeKey>) {
        for waiter in waiters {
            let Some(entry) = self.graph.get(&waiter) else {
                continue;
            };
            let mut state = entry.lock();
            debug_assert!(state.pending_signals > 0, "unexpected signal for {waiter}");
            state.pending_signals = state.pending_signals.saturating_sub(1);
            let wake = state.pending_signals == 0 && !state.scheduled && !state.is_done();
            if wake {
                state.scheduled = true;
            }
            drop(state);
            if wake {
                self.enqueue(entry);
            }
        }
    }

    fn commit_value(&self, entry: &Arc<NodeEntry>, value: Arc<dyn Node>) {
        let key = entry.key();
        let (changed, waiters, old_deps, new_deps) = {
            let mut state = entry.lock();
            let changed = match (&state.error, &state.value) {
                (Some(_), _) => true,
                (None, Some(old)) => !old.node_eq(value.as_ref()),
                (None, None) => true,
            };
            let old_deps: Vec<NodeKey> = state.flat_deps().cloned().collect();
            state.deps = mem::take(&mut state.building_deps);
            let new_deps: Vec<NodeKey> = state.flat_deps().cloned().collect();
            state.value = Some(value.clone());
            state.error = None;
            if changed {
                state.last_changed = self.version;
            }
            state.last_evaluated = self.version;
            state.lifecycle = Lifecycle::Done;
            state.check_group = 0;
            state.scheduled = false;
            (changed, mem::take(&mut state.waiters), old_deps, new_deps)
        };
        self.reconcile_edges(key, old_deps, new_deps);
        trace!(node = %key, changed, "built");
        self.observer
            .evaluated(key, Some(&value), EvaluationState::Built);
        self.signal(waiters);
    }

    fn commit_error(&self, entry: &Arc<NodeEntry>, info: ErrorInfo) {
        self.settle_error(entry, info.clone(), true);
        if !self.keep_going {
            self.set_abort(Abort::FailFast {
                key: entry.key().clone(),
                info,
            });
        }
    }

    fn settle_error(&self, entry: &Arc<NodeEntry>, info: ErrorInfo, notify: bool) {
        let key = entry.key();
        let (waiters, old_deps, new_deps) = {
            let mut state = entry.lock();
            let old_deps: Vec<NodeKey> = state.flat_deps().cloned().collect();
            state.deps = mem::take(&mut state.building_deps);
            let new_deps: Vec<NodeKey> = state.flat_deps().cloned().collect();
            state.value = None;
            state.error = Some(info.clone());
            state.last_changed = self.version;
            state.last_evaluated = self.version;
            state.lifecycle = Lifecycle::Done;
            state.check_group = 0;
            state.scheduled = false;
            state.pending_signals = 0;
            (mem::take(&mut state.waiters), old_deps, new_deps)
        };
        self.reconcile_edges(key, old_deps, new_deps);
        self.reporter.error(&format!("error building {key}: {info}"));
        debug!(node = %key, %info, "build failed");
        if notify {
            self.signal(waiters);
        }
    }

    /// Bring deps' rdep sets in line with this node's committed deps. Kept
    /// consistent only at completion; rebuilds may diverge transiently.
    fn reconcile_edges(&self, key: &NodeKey, old_deps: Vec<NodeKey>, new_deps: Vec<NodeKey>) {
        let old: ahash::HashSet<NodeKey> = old_deps.into_iter().collect();
        let new: ahash::HashSet<NodeKey> = new_deps.into_iter().collect();
        for dep in new.difference(&old) {
            self.graph
                .get_or_create(dep)
                .lock()
                .rdeps
                .insert(key.clone());
        }
        for dep in old.difference(&new) {
            if let Some(dep_entry) = self.graph.get(dep) {
                dep_entry.lock().rdeps.shift_remove(key);
            }
        }
    }

    /// After the queue drained with unfinished roots: walk the stuck
    /// subgraph depth-first, discover cycles, and mark every implicated
    /// node as done-with-cycle-error. Done nodes terminate a branch.
    pub(crate) fn detect_cycles(&self, roots: &[NodeKey]) {
        let mut memo: HashMap<NodeKey, Vec<CycleInfo>, ahash::RandomState> = HashMap::default();
        for root in roots {
            let stuck = self
                .graph
                .get(root)
                .is_some_and(|entry| !entry.lock().is_done());
            if stuck {
                let mut path = Vec::new();
                self.cycles_from(root.clone(), &mut path, &mut memo);
            }
        }
        for (key, cycles) in memo {
            if cycles.is_empty() {
                continue;
            }
            let Some(entry) = self.graph.get(&key) else {
                continue;
            };
            if entry.lock().is_done() {
                continue;
            }
            debug!(node = %key, cycles = cycles.len(), "cycle participant");
            let info = ErrorInfo::from_cycles(key.clone(), cycles);
            // Waiters are all in the stuck subgraph and get their own cycle
            // error here; there is no one left to signal.
            self.settle_error(&entry, info, false);
        }
    }

    /// Cycles reachable from `key`, normalized for `key`, memoized.
    ///
    /// The memo holds post-order results only, so entries are independent of
    /// the path by which a node was first reached.
    fn cycles_from(
        &self,
        key: NodeKey,
        path: &mut Vec<NodeKey>,
        memo: &mut HashMap<NodeKey, Vec<CycleInfo>, ahash::RandomState>,
    ) -> Vec<CycleInfo> {
        if let Some(cached) = memo.get(&key) {
            return cached.clone();
        }
        let Some(entry) = self.graph.get(&key) else {
            return Vec::new();
        };
        let children: Vec<NodeKey> = {
            let state = entry.lock();
            if state.is_done() {
                memo.insert(key, Vec::new());
                return Vec::new();
            }
            // First occurrence per child: a node never reports the same
            // cycle twice via the same first step.
            let mut seen = ahash::HashSet::default();
            state
                .stuck_edges()
                .filter(|k| seen.insert((*k).clone()))
                .cloned()
                .collect()
        };
        path.push(key.clone());
        let mut collected = Vec::new();
        for child in children {
            if let Some(pos) = path.iter().position(|k| k == &child) {
                // Back edge into the active path: the slice from the child
                // onward is a cycle ending at this node.
                let raw = CycleInfo::new(Vec::new(), path[pos..].to_vec());
                collected.extend(CycleInfo::prepare_for(&key, &[raw]));
            } else {
                let child_cycles = self.cycles_from(child, path, memo);
                collected.extend(CycleInfo::prepare_for(&key, &child_cycles));
            }
        }
        path.pop();
        memo.insert(key, collected.clone());
        collected
    }
}
