#![forbid(unsafe_code)]

//! One-shot cancellation handles.
//!
//! # Design
//!
//! [`CancellationHandle`] wraps a cancel action behind an atomic
//! compare-and-set. Only the first successful [`cancel`](CancellationHandle::cancel)
//! runs the action; every later call (from any thread, on any clone) is a
//! no-op. This is the single idiom every cancellable registration in the
//! runtime uses: awaiter removal, frame-end deregistration, observer
//! detachment.
//!
//! The handle owns no resource itself. It holds whatever the action
//! captured (typically a weak reference to the queue it can remove from).
//!
//! # Invariants
//!
//! 1. The wrapped action runs at most once, even under concurrent `cancel`.
//! 2. `is_cancelled()` is true after the first `cancel` returns.
//! 3. Cancelling a handle whose registration already fired is not an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type CancelAction = Box<dyn FnOnce() + Send>;

struct HandleInner {
    fired: AtomicBool,
    action: Mutex<Option<CancelAction>>,
}

/// Idempotent, thread-safe cancellation capability.
///
/// Cloning creates another handle to the **same** registration; cancelling
/// any clone cancels all of them.
#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<HandleInner>,
}

impl CancellationHandle {
    /// Wrap `action` so it runs on the first `cancel()` only.
    #[must_use]
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                fired: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// A handle with nothing to cancel. `cancel()` only flips the flag.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                fired: AtomicBool::new(false),
                action: Mutex::new(None),
            }),
        }
    }

    /// Cancel the registration.
    ///
    /// Returns `true` if this call won the race and ran the action, `false`
    /// if the handle was already cancelled.
    pub fn cancel(&self) -> bool {
        if self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let action = self
            .inner
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            action();
        }
        true
    }

    /// Whether `cancel()` has been called on this handle or a clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Convert into a guard that cancels when dropped.
    #[must_use]
    pub fn cancel_on_drop(self) -> CancelGuard {
        CancelGuard { handle: Some(self) }
    }
}

impl fmt::Debug for CancellationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// RAII guard that cancels its handle on drop.
#[must_use = "dropping the guard cancels the registration immediately"]
pub struct CancelGuard {
    handle: Option<CancellationHandle>,
}

impl CancelGuard {
    /// Release the guard without cancelling, returning the handle.
    pub fn disarm(mut self) -> CancellationHandle {
        // `handle` is only `None` after this call or after drop.
        self.handle.take().unwrap_or_else(CancellationHandle::empty)
    }

    /// Borrow the guarded handle.
    pub fn handle(&self) -> Option<&CancellationHandle> {
        self.handle.as_ref()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }
}

impl fmt::Debug for CancelGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelGuard")
            .field("handle", &self.handle)
            .finish()
    }
}
