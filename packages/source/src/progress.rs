//! Row and plan counters reported while a run streams files.
//!
//! The runner only talks to [`ProgressCallback`]; the binary plugs in
//! terminal bars, tests and library callers get [`NullProgress`].

use std::sync::Arc;

/// Receives counts as plans and rows are processed.
pub trait ProgressCallback: Send + Sync {
    /// Number of units expected, when known up front (plans, not rows).
    fn set_total(&self, total: u64);

    /// Counts `delta` more units as processed.
    fn inc(&self, delta: u64);

    /// Label for what is being processed now, usually a plan id.
    fn set_message(&self, msg: String);

    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// A shared [`NullProgress`], used until a caller supplies real bars.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
