//! Node identity.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Trait bound for node key arguments.
///
/// Arguments must be hashable, comparable, thread-safe, and printable.
pub trait KeyArg: Hash + Eq + fmt::Debug + Send + Sync + 'static {}

// Blanket implementation for all types that satisfy the bounds
impl<T> KeyArg for T where T: Hash + Eq + fmt::Debug + Send + Sync + 'static {}

struct KeyInner {
    /// Names the builder family this key belongs to.
    tag: &'static str,
    /// Hash of the argument, computed once at construction.
    arg_hash: u64,
    /// The opaque argument, recovered by builders via downcast.
    arg: Arc<dyn Any + Send + Sync>,
    /// Debug representation for dumps and error messages.
    debug_repr: Arc<str>,
}

/// The identity of a node: a builder-family tag plus an opaque argument.
///
/// Two keys are equal iff both the tag and the argument hash are equal.
/// Cloning is cheap; the payload is shared behind an `Arc`.
#[derive(Clone)]
pub struct NodeKey {
    inner: Arc<KeyInner>,
}

impl NodeKey {
    /// Create a key for the builder family `tag` with the given argument.
    pub fn new<A: KeyArg>(tag: &'static str, arg: A) -> Self {
        let mut hasher = ahash::AHasher::default();
        arg.hash(&mut hasher);
        let arg_hash = hasher.finish();
        let debug_repr = Arc::from(format!("{tag}({arg:?})"));
        Self {
            inner: Arc::new(KeyInner {
                tag,
                arg_hash,
                arg: Arc::new(arg),
                debug_repr,
            }),
        }
    }

    /// The builder-family tag.
    pub fn tag(&self) -> &'static str {
        self.inner.tag
    }

    /// Recover the argument, if it has type `A`.
    pub fn arg<A: KeyArg>(&self) -> Option<&A> {
        self.inner.arg.downcast_ref::<A>()
    }

    /// Debug representation, e.g. `file("/etc/hosts")`.
    pub fn debug_repr(&self) -> &str {
        &self.inner.debug_repr
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.debug_repr)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.debug_repr)
    }
}

impl Hash for NodeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.tag.hash(state);
        self.inner.arg_hash.hash(state);
    }
}

impl PartialEq for NodeKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.tag == other.inner.tag && self.inner.arg_hash == other.inner.arg_hash
    }
}

impl Eq for NodeKey {}
