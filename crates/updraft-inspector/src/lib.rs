//! Event collection and trace inspection for the updraft engine.
//!
//! The engine reports progress through its observer interface; this crate
//! provides [`EventCollector`], an observer that records every event for
//! later assertion, plus serializable event types so traces can be written
//! out and diffed.

mod collector;
mod events;

pub use collector::EventCollector;
pub use events::{EvaluationKind, GraphEvent, InvalidationKind};
