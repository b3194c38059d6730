#![forbid(unsafe_code)]

//! Scheduling errors.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A registration was attempted after the queue or scheduler closed.
///
/// Every rejected registration receives the same reason that was given to
/// the close call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerClosed {
    reason: Arc<str>,
}

impl SchedulerClosed {
    /// Create a closed error with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<Arc<str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the scheduler was closed.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for SchedulerClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scheduler closed: {}", self.reason)
    }
}

impl std::error::Error for SchedulerClosed {}

/// An end-of-frame action panicked during dispatch.
///
/// The panic is contained; actions after it in the same flush still run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    /// Position of the action within its flush (0-based, FIFO order).
    pub sequence: usize,
    /// Panic message, or `"unknown panic"` for non-string payloads.
    pub message: String,
}

impl DispatchFailure {
    pub(crate) fn from_panic(sequence: usize, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { sequence, message }
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "end-of-frame action #{} panicked: {}",
            self.sequence, self.message
        )
    }
}

impl std::error::Error for DispatchFailure {}
