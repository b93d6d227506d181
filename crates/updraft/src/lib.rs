//! Updraft: an incremental evaluation engine for keyed dependency graphs.
//!
//! Node builders construct values from node keys, declaring dependencies on
//! prerequisite nodes as they go. The graph caches every computed value,
//! tracks the dependency edges that produced it, and on later updates
//! recomputes only the portion actually affected by what changed.
//!
//! # Key features
//!
//! - **Parallel evaluation**: a configurable pool of workers discovers and
//!   satisfies dependencies on demand
//! - **Change pruning**: a dirtied node whose dependencies turn out
//!   unchanged is revalidated without invoking its builder, and an equal
//!   rebuilt value stops propagation upstream
//! - **Cycle reporting**: dependency cycles are detected lazily and
//!   surfaced as normalized [`CycleInfo`] reports
//! - **Keep-going or fail-fast**: one node's failure either becomes an
//!   absent value for its dependents or aborts the whole pass
//! - **Injection**: values can be installed directly, bypassing builders
//!
//! # Example
//!
//! ```ignore
//! use updraft::{BuildEnv, Node, NodeKey, NullReporter, UpdatingGraph};
//!
//! let graph = UpdatingGraph::builder()
//!     .register("greeting", |key: &NodeKey, env: &mut BuildEnv| {
//!         let Some(name) = env.get_value(&NodeKey::new("name", ())) else {
//!             return Ok(None); // parked until `name` is done
//!         };
//!         let name = updraft::node_downcast::<String>(&name).unwrap();
//!         Ok(Some(Arc::new(format!("hello {name}")) as Arc<dyn Node>))
//!     })
//!     .register("name", |_: &NodeKey, _: &mut BuildEnv| {
//!         Ok(Some(Arc::new("world".to_string()) as Arc<dyn Node>))
//!     })
//!     .build();
//!
//! let root = NodeKey::new("greeting", ());
//! let result = graph.update(&[root.clone()], true, 4, &NullReporter)?;
//! assert_eq!(result.value_of::<String>(&root).unwrap(), "hello world");
//! ```

mod builder;
mod cycle;
mod engine;
mod entry;
mod env;
mod error;
mod eval;
mod graph;
mod invalidate;
mod key;
mod node;
mod observer;
mod reporter;
mod result;
mod version;

pub use builder::{BuildResult, NodeBuilder};
pub use cycle::CycleInfo;
pub use engine::{InterruptHandle, UpdatingGraph, UpdatingGraphBuilder};
pub use entry::{NodeSnapshot, NodeState};
pub use env::BuildEnv;
pub use error::{BuildError, ErrorInfo, UpdateError};
pub use key::{KeyArg, NodeKey};
pub use node::{downcast_eq, node_downcast, Node};
pub use observer::{EvaluationState, InvalidationState, NoopObserver, ProgressObserver};
pub use reporter::{NullReporter, Reporter};
pub use result::{RootOutcome, UpdateResult};
pub use version::{IntVersion, Version, VersionRelation};
