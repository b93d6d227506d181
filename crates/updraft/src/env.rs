//! The environment a builder sees during one attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::entry::DepGroup;
use crate::error::{BuildError, ErrorInfo};
use crate::graph::InMemoryGraph;
use crate::key::NodeKey;
use crate::node::Node;
use crate::reporter::Reporter;

/// Outcome of one dependency lookup.
enum DepLookup {
    Value(Arc<dyn Node>),
    Errored(ErrorInfo),
    Missing,
}

/// Narrow view of the engine handed to a builder.
///
/// Every lookup records a dependency: a single [`get_value`](Self::get_value)
/// records a singleton dep-group, a bulk [`get_values`](Self::get_values)
/// records one group for the whole batch. Group order is the declaration
/// order and is preserved for later revalidation.
///
/// A lookup returning `None` means the dep is absent - either not computed
/// yet, or in error under keep-going. The builder should finish declaring
/// the deps it can and return `Ok(None)`; the engine restarts it when the
/// missing deps are done.
pub struct BuildEnv<'a> {
    graph: &'a InMemoryGraph,
    reporter: &'a dyn Reporter,
    interrupted: &'a AtomicBool,
    groups: Vec<DepGroup>,
    missing: IndexSet<NodeKey, ahash::RandomState>,
    dep_errors: Vec<(NodeKey, ErrorInfo)>,
}

impl<'a> BuildEnv<'a> {
    pub(crate) fn new(
        graph: &'a InMemoryGraph,
        reporter: &'a dyn Reporter,
        interrupted: &'a AtomicBool,
    ) -> Self {
        Self {
            graph,
            reporter,
            interrupted,
            groups: Vec::new(),
            missing: IndexSet::default(),
            dep_errors: Vec::new(),
        }
    }

    fn lookup(&self, key: &NodeKey) -> DepLookup {
        let entry = self.graph.get_or_create(key);
        let state = entry.lock();
        if !state.is_done() {
            return DepLookup::Missing;
        }
        match (&state.value, &state.error) {
            (_, Some(info)) => DepLookup::Errored(info.clone()),
            (Some(value), None) => DepLookup::Value(value.clone()),
            (None, None) => DepLookup::Missing,
        }
    }

    fn resolve(&mut self, key: &NodeKey) -> Option<Arc<dyn Node>> {
        match self.lookup(key) {
            DepLookup::Value(value) => Some(value),
            DepLookup::Errored(info) => {
                self.dep_errors.push((key.clone(), info));
                None
            }
            DepLookup::Missing => {
                self.missing.insert(key.clone());
                None
            }
        }
    }

    /// Request a single dependency. Declares a singleton dep-group.
    pub fn get_value(&mut self, key: &NodeKey) -> Option<Arc<dyn Node>> {
        self.groups.push(vec![key.clone()]);
        self.resolve(key)
    }

    /// Request a batch of dependencies as one dep-group.
    ///
    /// Results are aligned with `keys`; absent deps yield `None`.
    pub fn get_values(&mut self, keys: &[NodeKey]) -> Vec<Option<Arc<dyn Node>>> {
        self.groups.push(keys.to_vec());
        keys.iter().map(|key| self.resolve(key)).collect()
    }

    /// Error-transparent single lookup.
    ///
    /// If the dep is done with an error carrying a builder exception, that
    /// exception is returned for the builder to inspect (and possibly
    /// recover from via [`BuildError::downcast_ref`]); a caught error does
    /// not by itself fail this node.
    pub fn get_value_or_err(&mut self, key: &NodeKey) -> Result<Option<Arc<dyn Node>>, BuildError> {
        self.groups.push(vec![key.clone()]);
        match self.lookup(key) {
            DepLookup::Value(value) => Ok(Some(value)),
            DepLookup::Errored(info) => match info.exception() {
                Some(err) => Err(err.clone()),
                // No exception to hand over (e.g. a cycle): treat as an
                // uncaught dependency failure.
                None => {
                    self.dep_errors.push((key.clone(), info));
                    Ok(None)
                }
            },
            DepLookup::Missing => {
                self.missing.insert(key.clone());
                Ok(None)
            }
        }
    }

    /// True if any lookup so far returned an absent value.
    pub fn values_missing(&self) -> bool {
        !self.missing.is_empty() || !self.dep_errors.is_empty()
    }

    /// The event reporter scoped to this build attempt.
    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter
    }

    /// True once the caller has interrupted the pass. Long-running builders
    /// should poll this and bail out.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn into_outcome(self) -> EnvOutcome {
        EnvOutcome {
            groups: self.groups,
            missing: self.missing.into_iter().collect(),
            dep_errors: self.dep_errors,
        }
    }
}

/// What the environment accumulated over one builder attempt.
pub(crate) struct EnvOutcome {
    pub groups: Vec<DepGroup>,
    pub missing: Vec<NodeKey>,
    pub dep_errors: Vec<(NodeKey, ErrorInfo)>,
}
