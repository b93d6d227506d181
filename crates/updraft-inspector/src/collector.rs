//! Event collector for testing.
//!
//! `EventCollector` accumulates progress events for later inspection and
//! assertion. This is the primary tool for testing engine behavior: install
//! it as the graph's observer and assert on the trace afterwards.

use std::sync::Arc;

use parking_lot::Mutex;

use updraft::{EvaluationState, InvalidationState, Node, NodeKey, ProgressObserver};

use crate::events::{EvaluationKind, GraphEvent, InvalidationKind};

/// Accumulates [`GraphEvent`]s emitted by an updating graph.
///
/// # Example
///
/// ```ignore
/// let collector = Arc::new(EventCollector::new());
/// let graph = UpdatingGraph::builder()
///     .observer_arc(collector.clone())
///     .register("leaf", leaf_builder)
///     .build();
///
/// graph.update(&[key.clone()], true, 4, &NullReporter)?;
/// assert_eq!(
///     collector.evaluations_of(key.debug_repr()),
///     vec![EvaluationKind::Built],
/// );
/// ```
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<GraphEvent>>,
}

impl EventCollector {
    /// Create a new empty event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected events as a vector.
    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take collected events, clearing the collector.
    pub fn take(&self) -> Vec<GraphEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Get the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// The evaluation outcomes recorded for one node, in order.
    pub fn evaluations_of(&self, node: &str) -> Vec<EvaluationKind> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                GraphEvent::Evaluated { node: n, state } if n == node => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// The invalidation outcomes recorded for one node, in order.
    pub fn invalidations_of(&self, node: &str) -> Vec<InvalidationKind> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                GraphEvent::Invalidated { node: n, state } if n == node => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn emit(&self, event: GraphEvent) {
        self.events.lock().push(event);
    }
}

impl ProgressObserver for EventCollector {
    fn invalidated(&self, node: &NodeKey, state: InvalidationState) {
        self.emit(GraphEvent::Invalidated {
            node: node.debug_repr().to_string(),
            state: state.into(),
        });
    }

    fn enqueueing(&self, node: &NodeKey) {
        self.emit(GraphEvent::Enqueueing {
            node: node.debug_repr().to_string(),
        });
    }

    fn evaluated(&self, node: &NodeKey, _value: Option<&Arc<dyn Node>>, state: EvaluationState) {
        self.emit(GraphEvent::Evaluated {
            node: node.debug_repr().to_string(),
            state: state.into(),
        });
    }
}
