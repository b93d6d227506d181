//! The node builder interface.

use std::sync::Arc;

use crate::env::BuildEnv;
use crate::error::BuildError;
use crate::key::NodeKey;
use crate::node::Node;

/// What one builder attempt produced.
///
/// - `Ok(Some(value))` - the node is built.
/// - `Ok(None)` - some requested deps were absent; restart this builder once
///   they are done ([`BuildEnv::values_missing`] must be true).
/// - `Err(err)` - a semantic failure; recorded against the node.
pub type BuildResult = Result<Option<Arc<dyn Node>>, BuildError>;

/// Computes a node's value from its declared dependencies.
///
/// One builder serves a whole family of keys (all keys sharing its tag).
/// Builders declare deps by calling the environment, and are re-run from the
/// top after parking rather than suspended mid-flight, so they must tolerate
/// re-invocation with previously seen deps now present. For the same version
/// and the same input values a builder must produce the same value and
/// request the same deps; non-determinism is a builder bug.
pub trait NodeBuilder: Send + Sync + 'static {
    fn build(&self, key: &NodeKey, env: &mut BuildEnv<'_>) -> BuildResult;
}

impl<F> NodeBuilder for F
where
    F: Fn(&NodeKey, &mut BuildEnv<'_>) -> BuildResult + Send + Sync + 'static,
{
    fn build(&self, key: &NodeKey, env: &mut BuildEnv<'_>) -> BuildResult {
        self(key, env)
    }
}
