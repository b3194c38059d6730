#![forbid(unsafe_code)]

//! Broadcast frame clock.
//!
//! Callers register one-shot callbacks with [`FrameClock::with_frame`]; the
//! host delivers a frame with [`FrameClock::send_frame`], which resumes every
//! callback registered before it with the frame time. The host's "frame
//! requested" hook runs only when the first callback arrives after a flush,
//! so a burst of registrations costs one wake-up.

use std::fmt;
use std::sync::Arc;

use recompose_core::cancel::CancellationHandle;
use tracing::{info, trace};

use crate::awaiter_queue::AwaiterQueue;
use crate::error::SchedulerClosed;

type FrameCallback = Box<dyn FnOnce(Result<u64, SchedulerClosed>) + Send>;

/// One-shot frame callbacks resumed together with the frame time.
#[derive(Clone)]
pub struct FrameClock {
    awaiters: AwaiterQueue<FrameCallback>,
    on_frame_requested: Arc<dyn Fn() + Send + Sync>,
}

impl FrameClock {
    /// Create a clock that calls `on_frame_requested` when it needs a frame.
    #[must_use]
    pub fn new(on_frame_requested: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            awaiters: AwaiterQueue::new(),
            on_frame_requested: Arc::new(on_frame_requested),
        }
    }

    /// Run `on_frame` with the next frame's time in nanoseconds, or with the
    /// close error if the clock is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerClosed`] if the clock was already cancelled.
    pub fn with_frame(
        &self,
        on_frame: impl FnOnce(Result<u64, SchedulerClosed>) + Send + 'static,
    ) -> Result<CancellationHandle, SchedulerClosed> {
        let request = Arc::clone(&self.on_frame_requested);
        self.awaiters
            .add_awaiter(Box::new(on_frame), move || request())
    }

    /// Whether any callback is waiting for a frame.
    #[must_use]
    pub fn has_awaiters(&self) -> bool {
        self.awaiters.has_awaiters()
    }

    /// Deliver a frame to every pending callback. Returns how many ran.
    pub fn send_frame(&self, frame_time_nanos: u64) -> usize {
        let resumed = self
            .awaiters
            .flush_and_dispatch(|callback| callback(Ok(frame_time_nanos)));
        trace!(frame_time_nanos, resumed, "frame sent");
        resumed
    }

    /// Fail every pending and future callback with `reason`.
    pub fn cancel(&self, reason: impl Into<Arc<str>>) -> usize {
        let failed = self
            .awaiters
            .fail(SchedulerClosed::new(reason), |callback, err| {
                callback(Err(err.clone()));
            });
        info!(failed, "frame clock cancelled");
        failed
    }
}

impl fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameClock")
            .field("awaiters", &self.awaiters)
            .finish_non_exhaustive()
    }
}
