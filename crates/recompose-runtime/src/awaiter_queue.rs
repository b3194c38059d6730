#![forbid(unsafe_code)]

//! Thread-safe, cancellable FIFO of pending awaiters.
//!
//! # Design
//!
//! [`AwaiterQueue<T>`] holds the awaiters registered since the last flush.
//! A flush swaps the whole pending list out under the lock, so registrations
//! made while the flushed batch is being dispatched start a fresh generation
//! and wait for the next flush.
//!
//! Each awaiter carries an atomic state (`pending`, `dispatched`,
//! `cancelled`). Whichever of flush or cancel moves it out of `pending`
//! first wins; the loser does nothing. An awaiter is therefore never both
//! dispatched and successfully cancelled, and cancelling after dispatch is
//! a no-op.
//!
//! # Invariants
//!
//! 1. Awaiters are dispatched in registration order.
//! 2. The first-awaiter hook runs exactly once per empty → non-empty
//!    transition, outside the lock.
//! 3. After [`fail`](AwaiterQueue::fail) the queue is closed: pending
//!    awaiters are rejected and every later registration fails with the
//!    same [`SchedulerClosed`].
//!
//! # Failure Modes
//!
//! - **Panicking resume**: if the `resume` callback passed to
//!   [`flush_and_dispatch`](AwaiterQueue::flush_and_dispatch) panics, the
//!   rest of that batch is dropped undispatched. Callers that need
//!   isolation (the frame-end scheduler) catch panics per awaiter.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use recompose_core::cancel::CancellationHandle;

use crate::error::SchedulerClosed;

const PENDING: u8 = 0;
const DISPATCHED: u8 = 1;
const CANCELLED: u8 = 2;

struct Slot<T> {
    id: u64,
    state: Arc<AtomicU8>,
    value: T,
}

impl<T> Slot<T> {
    /// Claim the slot for dispatch. Fails if it was cancelled first.
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(PENDING, DISPATCHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct QueueState<T> {
    pending: VecDeque<Slot<T>>,
    next_id: u64,
    closed: Option<SchedulerClosed>,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        let removed = {
            let mut state = self.lock();
            match state.pending.iter().position(|slot| slot.id == id) {
                Some(index) => state.pending.remove(index),
                None => None,
            }
        };
        // Dropped outside the lock: `T` may run arbitrary code on drop.
        drop(removed);
    }
}

/// Registry of pending awaiters with bulk dispatch and bulk failure.
///
/// Cloning shares the same queue.
pub struct AwaiterQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AwaiterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> AwaiterQueue<T> {
    /// Create an open, empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    next_id: 0,
                    closed: None,
                }),
            }),
        }
    }

    /// Append `awaiter` to the queue.
    ///
    /// If the queue was empty, `on_first_awaiter` runs once after the
    /// awaiter is visible (used to wake the scheduler only when needed).
    ///
    /// # Errors
    ///
    /// Returns the close reason if the queue was closed by
    /// [`fail`](Self::fail); the awaiter is dropped.
    pub fn add_awaiter(
        &self,
        awaiter: T,
        on_first_awaiter: impl FnOnce(),
    ) -> Result<CancellationHandle, SchedulerClosed> {
        let (handle, was_empty) = {
            let mut state = self.shared.lock();
            if let Some(closed) = &state.closed {
                return Err(closed.clone());
            }
            let was_empty = state.pending.is_empty();
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);

            let flag = Arc::new(AtomicU8::new(PENDING));
            state.pending.push_back(Slot {
                id,
                state: Arc::clone(&flag),
                value: awaiter,
            });

            let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
            let handle = CancellationHandle::new(move || {
                let won = flag
                    .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if won {
                    if let Some(shared) = weak.upgrade() {
                        shared.remove(id);
                    }
                }
            });
            (handle, was_empty)
        };

        if was_empty {
            on_first_awaiter();
        }
        Ok(handle)
    }

    /// Whether at least one awaiter is pending.
    #[must_use]
    pub fn has_awaiters(&self) -> bool {
        !self.shared.lock().pending.is_empty()
    }

    /// Number of pending awaiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Whether no awaiter is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_awaiters()
    }

    /// Whether [`fail`](Self::fail) has closed the queue.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed.is_some()
    }

    /// The error registrations fail with, if closed.
    #[must_use]
    pub fn close_reason(&self) -> Option<SchedulerClosed> {
        self.shared.lock().closed.clone()
    }

    /// Swap out every pending awaiter and hand each to `resume` in FIFO
    /// order, skipping any cancelled concurrently. Returns how many were
    /// resumed.
    pub fn flush_and_dispatch(&self, mut resume: impl FnMut(T)) -> usize {
        let batch = std::mem::take(&mut self.shared.lock().pending);
        let mut resumed = 0;
        for slot in batch {
            if slot.claim() {
                resume(slot.value);
                resumed += 1;
            }
        }
        resumed
    }

    /// Close the queue and reject every pending awaiter with `error`.
    ///
    /// Later registrations fail with the same error. If the queue was
    /// already closed, the original reason is kept and only awaiters still
    /// pending are rejected (there are none). Returns how many were
    /// rejected.
    pub fn fail(&self, error: SchedulerClosed, mut reject: impl FnMut(T, &SchedulerClosed)) -> usize {
        let (batch, reason) = {
            let mut state = self.shared.lock();
            let reason = state.closed.get_or_insert(error).clone();
            (std::mem::take(&mut state.pending), reason)
        };
        let mut rejected = 0;
        for slot in batch {
            if slot.claim() {
                reject(slot.value, &reason);
                rejected += 1;
            }
        }
        rejected
    }
}

impl<T: Send + 'static> Default for AwaiterQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AwaiterQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("AwaiterQueue")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}
