//! Results of an update pass.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::cycle::CycleInfo;
use crate::error::ErrorInfo;
use crate::key::NodeKey;
use crate::node::{node_downcast, Node};

/// What one root came to.
#[derive(Debug, Clone)]
pub enum RootOutcome {
    Value(Arc<dyn Node>),
    Error(ErrorInfo),
}

/// The outcome of one `update` call: per-root values or errors, plus the
/// pass-wide error bundle.
///
/// Under keep-going every requested root has an outcome; under fail-fast
/// roots the abort cut off are absent.
#[derive(Debug, Default)]
pub struct UpdateResult {
    results: IndexMap<NodeKey, RootOutcome, ahash::RandomState>,
    errors: Vec<(NodeKey, ErrorInfo)>,
}

impl UpdateResult {
    pub(crate) fn insert(&mut self, key: NodeKey, outcome: RootOutcome) {
        if let RootOutcome::Error(info) = &outcome {
            self.errors.push((key.clone(), info.clone()));
        }
        self.results.insert(key, outcome);
    }

    pub(crate) fn push_error(&mut self, key: NodeKey, info: ErrorInfo) {
        if !self.errors.iter().any(|(k, _)| k == &key) {
            self.errors.push((key, info));
        }
    }

    pub fn get(&self, key: &NodeKey) -> Option<&RootOutcome> {
        self.results.get(key)
    }

    /// The computed value for a root, if it has one.
    pub fn value(&self, key: &NodeKey) -> Option<&Arc<dyn Node>> {
        match self.results.get(key)? {
            RootOutcome::Value(value) => Some(value),
            RootOutcome::Error(_) => None,
        }
    }

    /// The computed value for a root, downcast to `T`.
    pub fn value_of<T: 'static>(&self, key: &NodeKey) -> Option<&T> {
        self.value(key).and_then(node_downcast)
    }

    /// The error recorded against a root, if any.
    pub fn error(&self, key: &NodeKey) -> Option<&ErrorInfo> {
        match self.results.get(key)? {
            RootOutcome::Error(info) => Some(info),
            RootOutcome::Value(_) => None,
        }
    }

    /// Cycles reported against a root; empty when it has none.
    pub fn cycles(&self, key: &NodeKey) -> &[CycleInfo] {
        match self.error(key) {
            Some(info) => info.cycles(),
            None => &[],
        }
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Every error the pass surfaced, in discovery order. Under fail-fast
    /// this includes the node that aborted the pass even when it is not a
    /// requested root.
    pub fn errors(&self) -> &[(NodeKey, ErrorInfo)] {
        &self.errors
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.results.keys()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
