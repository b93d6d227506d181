//! Error types for evaluation.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use thiserror::Error;

use crate::cycle::CycleInfo;
use crate::key::NodeKey;

/// A semantic failure reported by a node builder.
///
/// The underlying error value is type-erased and shared; builders that catch
/// a dependency's failure via the error-transparent lookup can recover the
/// concrete type with [`downcast_ref`](BuildError::downcast_ref).
#[derive(Clone)]
pub struct BuildError {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl BuildError {
    /// Wrap a concrete error value.
    pub fn new<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
        }
    }

    /// A builder error carrying only a message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::new(MessageError(msg.into()))
    }

    /// The underlying error, if it has type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl fmt::Debug for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildError({})", self.inner)
    }
}

impl StdError for BuildError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

/// Why a node is in error: the failure itself, the erroneous dependencies
/// that contributed, and any cycles involving the node.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    exception: Option<BuildError>,
    root_causes: Vec<NodeKey>,
    cycles: Vec<CycleInfo>,
}

impl ErrorInfo {
    /// A direct builder failure at `key`.
    pub(crate) fn from_exception(key: NodeKey, err: BuildError) -> Self {
        Self {
            exception: Some(err),
            root_causes: vec![key],
            cycles: Vec::new(),
        }
    }

    /// A transitive failure: the node could not be built because the given
    /// dependencies are in error. Root causes are merged in order, first
    /// occurrence wins.
    pub(crate) fn transitive<'a>(deps: impl IntoIterator<Item = &'a ErrorInfo>) -> Self {
        let mut causes: IndexSet<NodeKey, ahash::RandomState> = IndexSet::default();
        let mut exception = None;
        let mut cycles = Vec::new();
        for info in deps {
            if exception.is_none() {
                exception.clone_from(&info.exception);
            }
            causes.extend(info.root_causes.iter().cloned());
            cycles.extend(info.cycles.iter().cloned());
        }
        Self {
            exception,
            root_causes: causes.into_iter().collect(),
            cycles,
        }
    }

    /// A node that participates in (or depends on) the given cycles.
    pub(crate) fn from_cycles(key: NodeKey, cycles: Vec<CycleInfo>) -> Self {
        Self {
            exception: None,
            root_causes: vec![key],
            cycles,
        }
    }

    /// The builder's error value, absent for pure cycle errors and for
    /// transitive errors whose causes carried no exception.
    pub fn exception(&self) -> Option<&BuildError> {
        self.exception.as_ref()
    }

    /// The ordered transitive erroneous dependencies that contributed.
    pub fn root_causes(&self) -> &[NodeKey] {
        &self.root_causes
    }

    /// Cycles involving this node.
    pub fn cycles(&self) -> &[CycleInfo] {
        &self.cycles
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exception {
            Some(err) => write!(f, "{err}")?,
            None if self.has_cycles() => write!(f, "dependency cycle")?,
            None => write!(f, "transitively failed")?,
        }
        if !self.root_causes.is_empty() {
            write!(f, " (caused by ")?;
            for (i, key) in self.root_causes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Failures of an `update` pass as a whole, as opposed to failures of
/// individual nodes.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The caller interrupted the pass. In-flight builds that completed
    /// before noticing the interrupt were committed normally.
    #[error("update interrupted")]
    Interrupted,

    /// An injection tried to overwrite a node with known dependencies.
    /// Injected and derived nodes must not blend.
    #[error("cannot inject over derived node {0}")]
    InjectConflict(NodeKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitive_merges_root_causes_in_order() {
        let b = NodeKey::new("t", "b".to_string());
        let c = NodeKey::new("t", "c".to_string());
        let e1 = ErrorInfo::from_exception(b.clone(), BuildError::msg("boom"));
        let e2 = ErrorInfo::from_exception(c.clone(), BuildError::msg("bang"));
        let merged = ErrorInfo::transitive([&e1, &e2, &e1]);
        assert_eq!(merged.root_causes(), &[b, c]);
        assert_eq!(merged.exception().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_downcast() {
        #[derive(Debug, Error)]
        #[error("missing input")]
        struct MissingInput;

        let err = BuildError::new(MissingInput);
        assert!(err.downcast_ref::<MissingInput>().is_some());
        assert!(err.downcast_ref::<MessageError>().is_none());
    }

    #[test]
    fn test_display_includes_causes() {
        let b = NodeKey::new("t", "b".to_string());
        let info = ErrorInfo::from_exception(b, BuildError::msg("boom"));
        assert_eq!(info.to_string(), "boom (caused by t(\"b\"))");
    }
}
