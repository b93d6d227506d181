//! The event reporter passed through to builders.

/// Sink for user-facing diagnostics emitted during an update pass.
///
/// Injected per `update` call; the engine forwards it to builders through
/// the build environment and reports node failures and cycles on it itself.
/// Must tolerate concurrent calls.
pub trait Reporter: Send + Sync {
    fn info(&self, _msg: &str) {}

    fn warn(&self, _msg: &str) {}

    fn error(&self, _msg: &str) {}
}

/// Reporter that discards everything.
pub struct NullReporter;

impl Reporter for NullReporter {}
