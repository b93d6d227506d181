//! Progress observation.
//!
//! The engine reports node transitions to an injected [`ProgressObserver`].
//! All methods have default empty implementations, so implementations only
//! override the events they care about; [`NoopObserver`] uses all defaults
//! for zero cost when observation is not needed.

use std::sync::Arc;

use crate::key::NodeKey;
use crate::node::Node;

/// New state of a node entry after invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationState {
    /// The node is dirty, although it might get re-validated again.
    Dirty,
    /// The node is dirty and got deleted, cannot get re-validated again.
    Deleted,
}

/// New state of a node entry after evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationState {
    /// The node was re-evaluated by its builder.
    Built,
    /// The node is clean or was re-validated without a rebuild.
    Clean,
}

/// Receiver informed of invalidations, enqueues, and evaluations.
///
/// # Thread safety
///
/// All methods may be called concurrently from multiple threads, possibly
/// with the same node from multiple propagation paths. Implementations must
/// be idempotent; the engine makes no de-duplication promise.
pub trait ProgressObserver: Send + Sync + 'static {
    /// `node` has been invalidated into `state`.
    ///
    /// Not called for invalidation of nodes which do not have a value
    /// (usually because they are in error).
    fn invalidated(&self, _node: &NodeKey, _state: InvalidationState) {}

    /// `node` is about to get queued for evaluation.
    ///
    /// A best-effort hint, not a guarantee: the node may still never run,
    /// e.g. when the pass is interrupted first.
    fn enqueueing(&self, _node: &NodeKey) {}

    /// `node` has been evaluated into `state` with the given value.
    ///
    /// Not called when the node's builder failed.
    fn evaluated(&self, _node: &NodeKey, _value: Option<&Arc<dyn Node>>, _state: EvaluationState) {}
}

/// Observer that discards all events.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        evaluated: AtomicUsize,
    }

    impl ProgressObserver for CountingObserver {
        fn evaluated(
            &self,
            _node: &NodeKey,
            _value: Option<&Arc<dyn Node>>,
            _state: EvaluationState,
        ) {
            self.evaluated.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let obs = CountingObserver {
            evaluated: AtomicUsize::new(0),
        };
        let key = NodeKey::new("n", 1u32);
        obs.invalidated(&key, InvalidationState::Dirty);
        obs.enqueueing(&key);
        obs.evaluated(&key, None, EvaluationState::Built);
        assert_eq!(obs.evaluated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_observer_is_object_safe() {
        let _: Arc<dyn ProgressObserver> = Arc::new(NoopObserver);
    }
}
