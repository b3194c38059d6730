#![forbid(unsafe_code)]

//! End-of-frame checkpoint driven by an external frame pump.
//!
//! # State machine
//!
//! ```text
//!           mark_frame_started()
//!   ┌──────┐ ─────────────────► ┌──────────┐
//!   │ idle │                    │ in-frame │
//!   └──────┘ ◄───────────────── └──────────┘
//!           mark_frame_complete()
//!           (then flush + dispatch)
//!
//!   cancel(reason) ──► closed (terminal, from either phase)
//! ```
//!
//! While idle, the first pending registration calls the host's "new work
//! available" hook so it can request a frame. While in-frame the hook is
//! suppressed: the frame in flight will flush the registration when it
//! completes. Whatever is pending when `mark_frame_complete` runs is
//! dispatched, in registration order.
//!
//! # Failure Modes
//!
//! - **Panicking action**: caught per action. Later actions in the same
//!   flush still run. Failures are returned in [`FrameReport`] and, under
//!   [`FailurePolicy::LogAndContinue`], logged at `warn`.
//! - **Registration after cancel**: fails with [`SchedulerClosed`].
//! - **Pending at cancel**: actions registered with
//!   [`schedule_end_of_frame_with`](FrameEndScheduler::schedule_end_of_frame_with)
//!   receive the close reason. Plain actions are dropped without running.
//! - **Frames after cancel**: `mark_frame_complete` dispatches nothing and
//!   the frame counter stops.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use recompose_core::cancel::CancellationHandle;
use tracing::{debug, debug_span, info, warn};

use crate::awaiter_queue::AwaiterQueue;
use crate::config::{FailurePolicy, FrameConfig, NotifyPolicy};
use crate::error::{DispatchFailure, SchedulerClosed};

type FrameAction = Box<dyn FnOnce(Result<(), SchedulerClosed>) + Send>;
type NewWorkHook = Box<dyn Fn() + Send + Sync>;

struct SchedulerState {
    in_frame: AtomicBool,
    frames_completed: AtomicU64,
    on_new_work: NewWorkHook,
    config: FrameConfig,
}

impl SchedulerState {
    fn notify_if_idle(&self) {
        if !self.in_frame.load(Ordering::Acquire) {
            (self.on_new_work)();
        }
    }
}

/// Outcome of one [`FrameEndScheduler::mark_frame_complete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// 1-based index of the completed frame.
    pub frame: u64,
    /// Actions that ran (including those that panicked).
    pub dispatched: usize,
    /// Actions that panicked, in dispatch order.
    pub failures: Vec<DispatchFailure>,
}

impl FrameReport {
    /// Actions that ran to completion.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.dispatched - self.failures.len()
    }

    /// Whether every dispatched action completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cancellable "run after this frame" registry.
///
/// Cloning shares the same scheduler.
#[derive(Clone)]
pub struct FrameEndScheduler {
    queue: AwaiterQueue<FrameAction>,
    state: Arc<SchedulerState>,
}

impl FrameEndScheduler {
    /// Create an idle scheduler with default settings.
    ///
    /// `on_new_work` is the host hook that requests a frame.
    #[must_use]
    pub fn new(on_new_work: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_config(FrameConfig::default(), on_new_work)
    }

    /// Create an idle scheduler with explicit settings.
    #[must_use]
    pub fn with_config(config: FrameConfig, on_new_work: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            queue: AwaiterQueue::new(),
            state: Arc::new(SchedulerState {
                in_frame: AtomicBool::new(false),
                frames_completed: AtomicU64::new(0),
                on_new_work: Box::new(on_new_work),
                config,
            }),
        }
    }

    /// Run `action` when the current (or next) frame completes.
    ///
    /// If the scheduler is cancelled first, `action` is dropped without
    /// running. Use [`schedule_end_of_frame_with`](Self::schedule_end_of_frame_with)
    /// to observe the close reason.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerClosed`] after [`cancel`](Self::cancel).
    pub fn schedule_end_of_frame(
        &self,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<CancellationHandle, SchedulerClosed> {
        self.schedule_end_of_frame_with(move |outcome| {
            if outcome.is_ok() {
                action();
            }
        })
    }

    /// Run `on_end` with `Ok(())` when the current (or next) frame completes,
    /// or with the close reason if the scheduler is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerClosed`] after [`cancel`](Self::cancel); `on_end`
    /// is not called in that case.
    pub fn schedule_end_of_frame_with(
        &self,
        on_end: impl FnOnce(Result<(), SchedulerClosed>) + Send + 'static,
    ) -> Result<CancellationHandle, SchedulerClosed> {
        let state = &self.state;
        match state.config.notify_policy {
            NotifyPolicy::IdleTransition => self
                .queue
                .add_awaiter(Box::new(on_end), || state.notify_if_idle()),
            NotifyPolicy::Always => {
                let handle = self.queue.add_awaiter(Box::new(on_end), || {})?;
                (state.on_new_work)();
                Ok(handle)
            }
        }
    }

    /// Whether any action is waiting for a frame end.
    #[must_use]
    pub fn has_awaiters(&self) -> bool {
        self.queue.has_awaiters()
    }

    /// Whether a frame is in progress.
    #[must_use]
    pub fn is_in_frame(&self) -> bool {
        self.state.in_frame.load(Ordering::Acquire)
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Number of frames completed so far.
    #[must_use]
    pub fn frames_completed(&self) -> u64 {
        self.state.frames_completed.load(Ordering::Acquire)
    }

    /// Enter the in-frame phase.
    pub fn mark_frame_started(&self) {
        self.state.in_frame.store(true, Ordering::Release);
    }

    /// Return to idle, then dispatch everything pending in FIFO order.
    ///
    /// Once the scheduler is closed this only returns to idle; the report
    /// repeats the last completed frame number.
    pub fn mark_frame_complete(&self) -> FrameReport {
        if self.queue.is_closed() {
            self.state.in_frame.store(false, Ordering::Release);
            return FrameReport {
                frame: self.frames_completed(),
                ..FrameReport::default()
            };
        }

        let frame = self.state.frames_completed.fetch_add(1, Ordering::AcqRel) + 1;
        let _span = debug_span!("mark_frame_complete", frame).entered();

        self.state.in_frame.store(false, Ordering::Release);

        let mut failures = Vec::new();
        let mut sequence = 0;
        let dispatched = self.queue.flush_and_dispatch(|action| {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || action(Ok(())))) {
                failures.push(DispatchFailure::from_panic(sequence, &*payload));
            }
            sequence += 1;
        });

        if self.state.config.failure_policy == FailurePolicy::LogAndContinue {
            for failure in &failures {
                warn!(
                    frame,
                    sequence = failure.sequence,
                    message = %failure.message,
                    "end-of-frame action panicked"
                );
            }
        }
        debug!(frame, dispatched, failed = failures.len(), "frame complete");

        FrameReport {
            frame,
            dispatched,
            failures,
        }
    }

    /// Close permanently. Every pending registration is failed with
    /// `reason`, and so is every later one. Returns how many pending
    /// registrations were failed.
    pub fn cancel(&self, reason: impl Into<Arc<str>>) -> usize {
        let error = SchedulerClosed::new(reason);
        let mut sequence = 0;
        let failed = self.queue.fail(error, |on_end, closed| {
            let closed = closed.clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || on_end(Err(closed)))) {
                let failure = DispatchFailure::from_panic(sequence, &*payload);
                if self.state.config.failure_policy == FailurePolicy::LogAndContinue {
                    warn!(
                        sequence = failure.sequence,
                        message = %failure.message,
                        "end-of-frame action panicked on cancel"
                    );
                }
            }
            sequence += 1;
        });
        info!(failed, "frame-end scheduler closed");
        failed
    }
}

impl fmt::Debug for FrameEndScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameEndScheduler")
            .field("queue", &self.queue)
            .field("in_frame", &self.is_in_frame())
            .field("frames_completed", &self.frames_completed())
            .field("config", &self.state.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn counting_scheduler(config: FrameConfig) -> (FrameEndScheduler, Arc<AtomicUsize>) {
        let wakes = Arc::new(AtomicUsize::new(0));
        let wakes_clone = Arc::clone(&wakes);
        let scheduler = FrameEndScheduler::with_config(config, move || {
            wakes_clone.fetch_add(1, Ordering::SeqCst);
        });
        (scheduler, wakes)
    }

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl FnOnce() + Send + 'static {
        let log = Arc::clone(log);
        move || log.lock().unwrap().push(name)
    }

    #[test]
    fn idle_registration_notifies_once() {
        let (scheduler, wakes) = counting_scheduler(FrameConfig::default());
        let log = recorder();

        scheduler.schedule_end_of_frame(push(&log, "a")).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        scheduler.schedule_end_of_frame(push(&log, "b")).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        scheduler.mark_frame_started();
        let report = scheduler.mark_frame_complete();
        assert_eq!(report.dispatched, 2);
        assert!(report.is_clean());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert!(!scheduler.has_awaiters());
    }

    #[test]
    fn in_frame_registration_does_not_notify_but_runs() {
        let (scheduler, wakes) = counting_scheduler(FrameConfig::default());
        let log = recorder();

        scheduler.mark_frame_started();
        assert!(scheduler.is_in_frame());
        scheduler.schedule_end_of_frame(push(&log, "mid")).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 0);

        scheduler.mark_frame_complete();
        assert!(!scheduler.is_in_frame());
        assert_eq!(*log.lock().unwrap(), vec!["mid"]);
    }

    #[test]
    fn registration_after_complete_notifies_again() {
        let (scheduler, wakes) = counting_scheduler(FrameConfig::default());
        scheduler.schedule_end_of_frame(|| {}).unwrap();
        scheduler.mark_frame_started();
        scheduler.mark_frame_complete();
        scheduler.schedule_end_of_frame(|| {}).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn action_scheduled_during_dispatch_runs_next_frame() {
        let (scheduler, wakes) = counting_scheduler(FrameConfig::default());
        let log = recorder();

        let inner = scheduler.clone();
        let inner_log = Arc::clone(&log);
        scheduler
            .schedule_end_of_frame(move || {
                inner_log.lock().unwrap().push("outer");
                let log = Arc::clone(&inner_log);
                inner
                    .schedule_end_of_frame(move || log.lock().unwrap().push("inner"))
                    .unwrap();
            })
            .unwrap();

        scheduler.mark_frame_started();
        assert_eq!(scheduler.mark_frame_complete().dispatched, 1);
        assert_eq!(*log.lock().unwrap(), vec!["outer"]);
        // Scheduled while idle, so the host was asked for another frame.
        assert_eq!(wakes.load(Ordering::SeqCst), 2);

        scheduler.mark_frame_started();
        scheduler.mark_frame_complete();
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn cancelled_action_does_not_run() {
        let (scheduler, _) = counting_scheduler(FrameConfig::default());
        let log = recorder();
        scheduler.schedule_end_of_frame(push(&log, "a")).unwrap();
        let b = scheduler.schedule_end_of_frame(push(&log, "b")).unwrap();
        b.cancel();
        scheduler.mark_frame_complete();
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn panicking_action_does_not_stop_dispatch() {
        let (scheduler, _) = counting_scheduler(
            FrameConfig::default().with_failure_policy(FailurePolicy::Silent),
        );
        let log = recorder();
        scheduler.schedule_end_of_frame(push(&log, "a")).unwrap();
        scheduler.schedule_end_of_frame(|| panic!("kaboom")).unwrap();
        scheduler.schedule_end_of_frame(push(&log, "c")).unwrap();

        let report = scheduler.mark_frame_complete();
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].sequence, 1);
        assert_eq!(report.failures[0].message, "kaboom");
        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn cancel_closes_scheduler() {
        let (scheduler, _) = counting_scheduler(FrameConfig::default());
        let log = recorder();
        scheduler.schedule_end_of_frame(push(&log, "never")).unwrap();

        assert_eq!(scheduler.cancel("shutdown"), 1);
        assert!(scheduler.is_closed());

        let err = scheduler.schedule_end_of_frame(|| {}).unwrap_err();
        assert_eq!(err.reason(), "shutdown");

        let report = scheduler.mark_frame_complete();
        assert_eq!(report.dispatched, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_delivers_reason_to_pending_registrations() {
        let (scheduler, _) = counting_scheduler(FrameConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            scheduler
                .schedule_end_of_frame_with(move |outcome| seen.lock().unwrap().push(outcome))
                .unwrap();
        }

        assert_eq!(scheduler.cancel("host gone"), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for outcome in seen.iter() {
            assert_eq!(outcome.as_ref().unwrap_err().reason(), "host gone");
        }
    }

    #[test]
    fn panicking_rejection_does_not_stop_cancel() {
        let (scheduler, _) = counting_scheduler(
            FrameConfig::default().with_failure_policy(FailurePolicy::Silent),
        );
        let rejected = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_end_of_frame_with(|_| panic!("teardown failed"))
            .unwrap();
        let rejected_clone = Arc::clone(&rejected);
        scheduler
            .schedule_end_of_frame_with(move |outcome| {
                assert!(outcome.is_err());
                rejected_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(scheduler.cancel("stop"), 2);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completed_frames_report_ok() {
        let (scheduler, _) = counting_scheduler(FrameConfig::default());
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        scheduler
            .schedule_end_of_frame_with(move |outcome| *seen_clone.lock().unwrap() = Some(outcome))
            .unwrap();
        scheduler.mark_frame_complete();
        assert_eq!(*seen.lock().unwrap(), Some(Ok(())));
    }

    #[test]
    fn frame_counter_stops_after_cancel() {
        let (scheduler, _) = counting_scheduler(FrameConfig::default());
        assert_eq!(scheduler.mark_frame_complete().frame, 1);
        scheduler.cancel("done");
        scheduler.mark_frame_started();
        let report = scheduler.mark_frame_complete();
        assert_eq!(report.frame, 1);
        assert_eq!(report.dispatched, 0);
        assert_eq!(scheduler.frames_completed(), 1);
        assert!(!scheduler.is_in_frame());
    }

    #[test]
    fn always_policy_notifies_every_registration() {
        let (scheduler, wakes) =
            counting_scheduler(FrameConfig::default().with_notify_policy(NotifyPolicy::Always));
        scheduler.schedule_end_of_frame(|| {}).unwrap();
        scheduler.schedule_end_of_frame(|| {}).unwrap();
        scheduler.mark_frame_started();
        scheduler.schedule_end_of_frame(|| {}).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.mark_frame_complete().dispatched, 3);
    }

    #[test]
    fn frame_counter_advances() {
        let (scheduler, _) = counting_scheduler(FrameConfig::default());
        assert_eq!(scheduler.mark_frame_complete().frame, 1);
        assert_eq!(scheduler.mark_frame_complete().frame, 2);
        assert_eq!(scheduler.frames_completed(), 2);
    }
}
