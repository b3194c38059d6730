#![forbid(unsafe_code)]

//! Runtime: frame-end scheduling, awaiter queues, and content relocation.
//!
//! # Role in Recompose
//! `recompose-runtime` sits between the host's frame loop and the tree
//! builder. It decides when deferred work runs relative to frames, and how
//! retained content survives being moved within the tree during one pass.
//!
//! # Primary responsibilities
//! - **AwaiterQueue**: FIFO one-shot registrations with cancellation, an
//!   idle → pending hook, and a terminal failed state.
//! - **FrameEndScheduler**: actions that run after the current frame, with
//!   a single wake-up per idle transition and panic isolation per action.
//! - **FrameClock**: one-shot callbacks resumed with the next frame time.
//! - **RelocationPool**: matches departing content to placements of the
//!   same descriptor, disposing what nobody claims.
//!
//! # How it fits in the system
//! The host drives [`FrameEndScheduler::mark_frame_complete`] and
//! [`FrameClock::send_frame`] from its frame loop. The tree builder owns one
//! [`RelocationPool`] and feeds it departures and placements keyed by
//! [`DescriptorId`] and [`recompose_core::PositionHash`]. Settings come from
//! [`RuntimeConfig`], usually via [`RuntimeConfig::from_env`].

pub mod awaiter_queue;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod frame_clock;
pub mod frame_end;
pub mod relocation;

pub use awaiter_queue::AwaiterQueue;
pub use config::{
    ConfigError, FailurePolicy, FrameConfig, NotifyPolicy, RelocationConfig, RuntimeConfig,
    RuntimeConfigParse,
};
pub use descriptor::{ContentDescriptor, DescriptorArena, DescriptorId, ParamPacking, ParamShape};
pub use error::{DispatchFailure, SchedulerClosed};
pub use frame_clock::FrameClock;
pub use frame_end::{FrameEndScheduler, FrameReport};
pub use relocation::{
    PassOutcome, Placement, PlacementRequest, PlacementTicket, PoolStats, RelocationEntry,
    RelocationPool,
};
