#![forbid(unsafe_code)]

//! Retained-state lifecycle contract and ordered notification dispatch.
//!
//! # State machine
//!
//! ```text
//! Unretained ──► Retained ──► Entered ◄──► Exited
//!                   │                        │
//!                   └────────► Retired ◄─────┘
//! ```
//!
//! `Retired` is terminal. An object abandoned before it ever entered the
//! tree goes straight from `Retained` to `Retired`. Re-entry can happen any
//! number of times, so [`StateLifecycleObserver::on_retired`] is the only
//! safe point to release owned resources.
//!
//! # Ordering
//!
//! [`LifecycleDispatcher`] collects notifications during an update pass and
//! drains them when the pass is applied:
//!
//! 1. `on_exited_composition` for everything leaving, in **reverse** of the
//!    order it was recorded (children before parents).
//! 2. `on_retained` for new objects, in recorded order.
//! 3. `on_entered_composition` for everything entering or re-entering, in
//!    recorded order.
//!
//! Retirements are not part of the ordered drain. They move into a
//! [`RetireBatch`] the host delivers whenever it likes; a batch that is
//! dropped undelivered delivers on drop, so every retirement eventually
//! fires.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "tracing")]
use tracing::{trace, warn};

/// Callbacks for objects whose state is retained by the runtime.
///
/// All methods default to no-ops so implementors only override what they
/// care about.
pub trait StateLifecycleObserver: Send + Sync {
    /// The object was retained for the first time.
    fn on_retained(&self) {}

    /// The object's content became part of the live tree.
    fn on_entered_composition(&self) {}

    /// The object's content left the live tree. It may enter again.
    fn on_exited_composition(&self) {}

    /// The object will never be used again.
    fn on_retired(&self) {}
}

/// Position of a retained object in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created but not yet retained.
    Unretained,
    /// Retained, never entered.
    Retained,
    /// Currently part of the live tree.
    Entered,
    /// Retained but not part of the live tree.
    Exited,
    /// Terminal.
    Retired,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unretained, Self::Retained)
                | (Self::Retained, Self::Entered)
                | (Self::Retained, Self::Retired)
                | (Self::Entered, Self::Exited)
                | (Self::Exited, Self::Entered)
                | (Self::Exited, Self::Retired)
        )
    }

    /// Whether this state is [`LifecycleState::Retired`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Retired)
    }

    /// Whether this state is [`LifecycleState::Entered`].
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Entered)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unretained => "unretained",
            Self::Retained => "retained",
            Self::Entered => "entered",
            Self::Exited => "exited",
            Self::Retired => "retired",
        };
        f.write_str(name)
    }
}

/// A notification was requested that the object's state does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleError {
    /// Id of the retained object.
    pub object: u64,
    /// State the object was in.
    pub from: LifecycleState,
    /// State the notification would have moved it to.
    pub to: LifecycleState,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal lifecycle transition for object #{}: {} -> {}",
            self.object, self.from, self.to
        )
    }
}

impl std::error::Error for LifecycleError {}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

struct RetainedInner {
    id: u64,
    state: Mutex<LifecycleState>,
    observer: Arc<dyn StateLifecycleObserver>,
}

/// An observer paired with its tracked lifecycle state.
///
/// Cloning shares the same object; identity is [`RetainedObject::id`].
#[derive(Clone)]
pub struct RetainedObject {
    inner: Arc<RetainedInner>,
}

impl RetainedObject {
    /// Track a new, unretained object.
    #[must_use]
    pub fn new(observer: Arc<dyn StateLifecycleObserver>) -> Self {
        Self {
            inner: Arc::new(RetainedInner {
                id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(LifecycleState::Unretained),
                observer,
            }),
        }
    }

    /// Track an observer by value.
    #[must_use]
    pub fn from_observer(observer: impl StateLifecycleObserver + 'static) -> Self {
        Self::new(Arc::new(observer))
    }

    /// Process-unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the object is currently in the live tree.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// The wrapped observer.
    #[must_use]
    pub fn observer(&self) -> &Arc<dyn StateLifecycleObserver> {
        &self.inner.observer
    }

    /// Move to `next` and invoke the matching callback.
    ///
    /// The state lock is released before the callback runs.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] and invokes nothing if the transition is
    /// illegal from the current state.
    pub fn advance(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.can_transition_to(next) {
                return Err(LifecycleError {
                    object: self.inner.id,
                    from: *state,
                    to: next,
                });
            }
            *state = next;
        }
        let observer = &self.inner.observer;
        match next {
            LifecycleState::Retained => observer.on_retained(),
            LifecycleState::Entered => observer.on_entered_composition(),
            LifecycleState::Exited => observer.on_exited_composition(),
            LifecycleState::Retired => observer.on_retired(),
            LifecycleState::Unretained => {}
        }
        Ok(())
    }
}

impl fmt::Debug for RetainedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedObject")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for RetainedObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RetainedObject {}

/// Counts from one [`LifecycleDispatcher::dispatch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    /// `on_exited_composition` calls delivered.
    pub exited: usize,
    /// `on_retained` calls delivered.
    pub retained: usize,
    /// `on_entered_composition` calls delivered.
    pub entered: usize,
    /// Notifications skipped because the transition was illegal.
    pub errors: Vec<LifecycleError>,
}

/// Ordered pending notifications for one update pass.
#[derive(Debug, Default)]
pub struct LifecycleDispatcher {
    retaining: Vec<RetainedObject>,
    entering: Vec<RetainedObject>,
    exiting: Vec<RetainedObject>,
    retiring: Vec<RetainedObject>,
}

impl LifecycleDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `on_retained` for a new object.
    pub fn record_retained(&mut self, object: RetainedObject) {
        self.retaining.push(object);
    }

    /// Queue `on_entered_composition`.
    pub fn record_entered(&mut self, object: RetainedObject) {
        self.entering.push(object);
    }

    /// Queue `on_exited_composition`. Record in structural order; the drain
    /// reverses it.
    pub fn record_exited(&mut self, object: RetainedObject) {
        self.exiting.push(object);
    }

    /// Queue `on_retired` for the next [`RetireBatch`].
    pub fn record_retired(&mut self, object: RetainedObject) {
        self.retiring.push(object);
    }

    /// Whether any ordered notification is waiting for [`dispatch`](Self::dispatch).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !(self.retaining.is_empty() && self.entering.is_empty() && self.exiting.is_empty())
    }

    /// Number of retirements waiting for [`take_retirements`](Self::take_retirements).
    #[must_use]
    pub fn pending_retirements(&self) -> usize {
        self.retiring.len()
    }

    /// Deliver exits (reverse), then retains and enters (forward).
    pub fn dispatch(&mut self) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        for object in self.exiting.drain(..).rev() {
            match object.advance(LifecycleState::Exited) {
                Ok(()) => report.exited += 1,
                Err(err) => report.errors.push(err),
            }
        }
        for object in self.retaining.drain(..) {
            match object.advance(LifecycleState::Retained) {
                Ok(()) => report.retained += 1,
                Err(err) => report.errors.push(err),
            }
        }
        for object in self.entering.drain(..) {
            match object.advance(LifecycleState::Entered) {
                Ok(()) => report.entered += 1,
                Err(err) => report.errors.push(err),
            }
        }

        #[cfg(feature = "tracing")]
        {
            for err in &report.errors {
                warn!(object = err.object, from = %err.from, to = %err.to, "skipped lifecycle notification");
            }
            trace!(
                exited = report.exited,
                retained = report.retained,
                entered = report.entered,
                "lifecycle dispatch"
            );
        }

        report
    }

    /// Move queued retirements into a batch the caller delivers later.
    #[must_use]
    pub fn take_retirements(&mut self) -> RetireBatch {
        RetireBatch {
            objects: std::mem::take(&mut self.retiring),
        }
    }
}

/// Retirements detached from the pass that produced them.
///
/// Delivered by [`RetireBatch::dispatch`], or on drop if never dispatched.
#[derive(Debug, Default)]
pub struct RetireBatch {
    objects: Vec<RetainedObject>,
}

impl RetireBatch {
    /// Number of objects waiting to retire.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Merge another batch into this one.
    pub fn extend(&mut self, mut other: RetireBatch) {
        self.objects.append(&mut other.objects);
    }

    /// Deliver `on_retired` to every object. Returns how many retired.
    pub fn dispatch(mut self) -> usize {
        self.drain()
    }

    fn drain(&mut self) -> usize {
        let mut retired = 0;
        for object in self.objects.drain(..) {
            match object.advance(LifecycleState::Retired) {
                Ok(()) => retired += 1,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    warn!(object = _err.object, from = %_err.from, "skipped retirement");
                }
            }
        }
        retired
    }
}

impl Drop for RetireBatch {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn push(&self, event: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.name, event));
        }
    }

    impl StateLifecycleObserver for Recorder {
        fn on_retained(&self) {
            self.push("retained");
        }
        fn on_entered_composition(&self) {
            self.push("entered");
        }
        fn on_exited_composition(&self) {
            self.push("exited");
        }
        fn on_retired(&self) {
            self.push("retired");
        }
    }

    fn object(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> RetainedObject {
        RetainedObject::from_observer(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn transition_table() {
        use LifecycleState::*;
        assert!(Unretained.can_transition_to(Retained));
        assert!(Retained.can_transition_to(Entered));
        assert!(Retained.can_transition_to(Retired));
        assert!(Entered.can_transition_to(Exited));
        assert!(Exited.can_transition_to(Entered));
        assert!(Exited.can_transition_to(Retired));
        assert!(!Entered.can_transition_to(Retired));
        assert!(!Retired.can_transition_to(Entered));
        assert!(!Unretained.can_transition_to(Entered));
        assert!(Retired.is_terminal());
        assert!(Entered.is_active());
    }

    #[test]
    fn advance_rejects_illegal_transition() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let obj = object("a", &log);
        let err = obj.advance(LifecycleState::Entered).unwrap_err();
        assert_eq!(err.from, LifecycleState::Unretained);
        assert_eq!(err.to, LifecycleState::Entered);
        assert!(log.lock().unwrap().is_empty());
        assert!(err.to_string().contains("unretained -> entered"));
    }

    #[test]
    fn enter_forward_exit_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = object("a", &log);
        let b = object("b", &log);
        let c = object("c", &log);

        let mut dispatcher = LifecycleDispatcher::new();
        for obj in [&a, &b, &c] {
            dispatcher.record_retained(obj.clone());
            dispatcher.record_entered(obj.clone());
        }
        let report = dispatcher.dispatch();
        assert_eq!(report.retained, 3);
        assert_eq!(report.entered, 3);

        for obj in [&a, &b, &c] {
            dispatcher.record_exited(obj.clone());
        }
        assert!(dispatcher.has_pending());
        dispatcher.dispatch();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:retained", "b:retained", "c:retained", "a:entered", "b:entered",
                "c:entered", "c:exited", "b:exited", "a:exited",
            ]
        );
    }

    #[test]
    fn re_entry_is_allowed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = object("a", &log);
        a.advance(LifecycleState::Retained).unwrap();
        a.advance(LifecycleState::Entered).unwrap();
        a.advance(LifecycleState::Exited).unwrap();
        a.advance(LifecycleState::Entered).unwrap();
        assert!(a.is_active());
    }

    #[test]
    fn retirements_wait_for_batch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = object("a", &log);
        a.advance(LifecycleState::Retained).unwrap();

        let mut dispatcher = LifecycleDispatcher::new();
        dispatcher.record_retired(a.clone());
        assert!(!dispatcher.has_pending());
        assert_eq!(dispatcher.pending_retirements(), 1);
        dispatcher.dispatch();
        assert_eq!(a.state(), LifecycleState::Retained);

        let batch = dispatcher.take_retirements();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.dispatch(), 1);
        assert_eq!(a.state(), LifecycleState::Retired);
    }

    #[test]
    fn dropped_batch_still_retires() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = object("a", &log);
        a.advance(LifecycleState::Retained).unwrap();

        let mut dispatcher = LifecycleDispatcher::new();
        dispatcher.record_retired(a.clone());
        drop(dispatcher.take_retirements());
        assert_eq!(*log.lock().unwrap(), vec!["a:retained", "a:retired"]);
    }

    #[test]
    fn double_retire_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = object("a", &log);
        a.advance(LifecycleState::Retained).unwrap();

        let mut first = RetireBatch::default();
        first.objects.push(a.clone());
        let mut second = RetireBatch::default();
        second.objects.push(a.clone());
        first.extend(second);
        assert_eq!(first.dispatch(), 1);
        assert_eq!(
            log.lock().unwrap().iter().filter(|e| e.ends_with("retired")).count(),
            1
        );
    }

    #[test]
    fn identity_is_by_allocation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = object("a", &log);
        let b = object("a", &log);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }
}
