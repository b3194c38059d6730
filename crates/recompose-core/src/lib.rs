#![forbid(unsafe_code)]

//! Core: position identity, cancellation, and retained-state lifecycle.
//!
//! # Role in Recompose
//! `recompose-core` is the leaf layer. It owns the pure pieces the rest of
//! the runtime is built from: the hash algebra used to name tree positions,
//! the one-shot cancellation handle shared by every cancellable
//! registration, and the lifecycle contract retained objects implement.
//!
//! # Primary responsibilities
//! - **PositionHash**: invertible rotate/xor combination of path segments,
//!   with top-down and bottom-up variants that agree on the final value.
//! - **CancellationHandle**: idempotent, thread-safe, fires its action once.
//! - **StateLifecycleObserver**: retain/enter/exit/retire callbacks, plus an
//!   ordered dispatcher that drains exits in reverse and enters forward.
//!
//! # How it fits in the system
//! The runtime (`recompose-runtime`) builds its awaiter queues and frame
//! scheduling on [`cancel::CancellationHandle`], and its relocation pool on
//! [`lifecycle::LifecycleDispatcher`]. The tree builder computes
//! [`position_hash::PositionHash`] values that key the relocation space.

pub mod cancel;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod position_hash;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};

pub use cancel::{CancelGuard, CancellationHandle};
pub use error::InvalidArgument;
pub use lifecycle::{
    LifecycleDispatcher, LifecycleError, LifecycleReport, LifecycleState, RetainedObject, RetireBatch,
    StateLifecycleObserver,
};
pub use position_hash::{PositionHash, PositionHasher, Segment, Shift};
