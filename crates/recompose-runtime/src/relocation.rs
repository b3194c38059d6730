#![forbid(unsafe_code)]

//! Movable-content relocation across one update pass.
//!
//! # Protocol
//!
//! The tree builder drives a [`RelocationPool`] once per update pass:
//!
//! 1. **Departures.** Instead of disposing a retained occurrence of
//!    relocatable content it is tearing down, the builder hands it to
//!    [`report_departure`](RelocationPool::report_departure). Departures are
//!    indexed by [`DescriptorId`]; one descriptor may have several.
//! 2. **Placements.** When the builder needs content for a descriptor it
//!    calls [`request_placement`](RelocationPool::request_placement). A
//!    waiting departure is claimed and returned for re-parenting
//!    ([`Placement::Moved`]), unless an earlier placement for the same
//!    descriptor is still deferred, in which case the new request queues
//!    behind it. Otherwise the request is deferred, because a departure
//!    later in the same pass may still supply it. With usage
//!    tracking on, a descriptor that has never departed is answered with
//!    [`Placement::InsertNow`] since no match can exist.
//! 3. **End of pass.** [`end_pass`](RelocationPool::end_pass) pairs deferred
//!    placements with leftover departures, hands back unmatched placements
//!    for fresh insertion, disposes unmatched departures, and drains
//!    lifecycle notifications.
//!
//! Matching is by descriptor identity only, first come first served on
//! both sides: the n-th placement for a descriptor receives the n-th
//! departure reported for it.
//!
//! # Lifecycle
//!
//! Notifications are recorded in a [`LifecycleDispatcher`] during the pass
//! and drained by `end_pass`: exits of disposed content in reverse
//! structural order (departures are disposed in report order across all
//! descriptors, so the last reported exits first), then retains and enters of new or re-entering content
//! in structural order. A moved entry that was active stays active and
//! receives nothing. Retirements of disposed objects are collected by
//! [`take_retirements`](RelocationPool::take_retirements) and delivered
//! whenever the host chooses.
//!
//! # Invariants
//!
//! 1. An entry is returned by at most one claim; claims remove it from the
//!    departure index.
//! 2. A placement is answered exactly once: immediately, or in the
//!    `PassOutcome` of the pass it was made in.
//! 3. No departure survives `end_pass`.
//! 4. Disposed objects never receive `on_entered_composition` again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use recompose_core::lifecycle::{LifecycleDispatcher, LifecycleReport, RetainedObject, RetireBatch};
use recompose_core::position_hash::PositionHash;
use tracing::{debug, debug_span, trace};

use crate::config::RelocationConfig;
use crate::descriptor::DescriptorId;

/// One retained occurrence of relocatable content.
///
/// Holds the builder's structural handle for the retained subtree, the last
/// parameter value, and the lifecycle-observing objects retained inside it
/// in structural order.
pub struct RelocationEntry<H, P> {
    descriptor: DescriptorId,
    handle: H,
    parameter: P,
    position: PositionHash,
    objects: Vec<RetainedObject>,
    active: bool,
}

impl<H, P> RelocationEntry<H, P> {
    /// Descriptor this entry instantiates.
    #[must_use]
    pub fn descriptor(&self) -> DescriptorId {
        self.descriptor
    }

    /// Structural handle of the retained subtree.
    #[must_use]
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Mutable structural handle.
    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// Last parameter value supplied.
    #[must_use]
    pub fn parameter(&self) -> &P {
        &self.parameter
    }

    /// Position the entry was last placed at.
    #[must_use]
    pub fn position(&self) -> PositionHash {
        self.position
    }

    /// Retained objects in structural order.
    #[must_use]
    pub fn objects(&self) -> &[RetainedObject] {
        &self.objects
    }

    /// Whether the content is part of the live tree.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Split into handle and parameter, dropping the bookkeeping.
    pub fn into_parts(self) -> (H, P) {
        (self.handle, self.parameter)
    }
}

impl<H: fmt::Debug, P: fmt::Debug> fmt::Debug for RelocationEntry<H, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelocationEntry")
            .field("descriptor", &self.descriptor)
            .field("handle", &self.handle)
            .field("parameter", &self.parameter)
            .field("position", &self.position)
            .field("objects", &self.objects.len())
            .field("active", &self.active)
            .finish()
    }
}

/// Identifies a deferred placement request within its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlacementTicket(u64);

impl PlacementTicket {
    /// Raw sequence number.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A request to place content for a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest<P> {
    /// Ticket issued when the request was made.
    pub ticket: PlacementTicket,
    /// Requested descriptor.
    pub descriptor: DescriptorId,
    /// Parameter value for the new position.
    pub parameter: P,
    /// Target position.
    pub position: PositionHash,
}

/// Immediate answer to [`RelocationPool::request_placement`].
#[derive(Debug)]
pub enum Placement<H, P> {
    /// A departure was claimed; re-parent it at the new position. The
    /// entry already carries the new parameter.
    Moved(RelocationEntry<H, P>),
    /// No match can occur; insert fresh now via
    /// [`RelocationPool::instantiate`].
    InsertNow(PlacementRequest<P>),
    /// Resolved by [`RelocationPool::end_pass`].
    Deferred(PlacementTicket),
}

/// Resolution of one update pass.
#[derive(Debug)]
pub struct PassOutcome<H, P> {
    /// Deferred placements matched to a departure, in request order.
    pub moved: Vec<(PlacementTicket, RelocationEntry<H, P>)>,
    /// Deferred placements instantiated by `end_pass_with`, in request order.
    pub inserted: Vec<(PlacementTicket, RelocationEntry<H, P>)>,
    /// Deferred placements left for the builder to insert fresh
    /// (`end_pass` only), in request order.
    pub fresh: Vec<PlacementRequest<P>>,
    /// Handles of disposed departures, in report order.
    pub disposed: Vec<H>,
    /// Notifications delivered while ending the pass.
    pub lifecycle: LifecycleReport,
}

impl<H, P> Default for PassOutcome<H, P> {
    fn default() -> Self {
        Self {
            moved: Vec::new(),
            inserted: Vec::new(),
            fresh: Vec::new(),
            disposed: Vec::new(),
            lifecycle: LifecycleReport::default(),
        }
    }
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Passes ended.
    pub passes: u64,
    /// Departures reported.
    pub departures: u64,
    /// Placements satisfied by moving a departure.
    pub moves: u64,
    /// Placements answered with [`Placement::InsertNow`].
    pub immediate_inserts: u64,
    /// Deferred placements that found no match.
    pub unmatched_placements: u64,
    /// Departures disposed at end of pass.
    pub disposed: u64,
}

/// Reconciles relocatable content leaving and re-entering the tree.
pub struct RelocationPool<H, P> {
    config: RelocationConfig,
    /// Unclaimed departures per descriptor, tagged with their report sequence.
    departures: HashMap<DescriptorId, VecDeque<(u64, RelocationEntry<H, P>)>>,
    deferred: Vec<PlacementRequest<P>>,
    /// Descriptors with at least one deferred placement this pass.
    deferred_descriptors: HashSet<DescriptorId>,
    ever_departed: HashSet<DescriptorId>,
    dispatcher: LifecycleDispatcher,
    next_ticket: u64,
    next_departure: u64,
    stats: PoolStats,
}

impl<H, P> RelocationPool<H, P> {
    /// Create an empty pool with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelocationConfig::default())
    }

    /// Create an empty pool.
    #[must_use]
    pub fn with_config(config: RelocationConfig) -> Self {
        Self {
            config,
            departures: HashMap::new(),
            deferred: Vec::new(),
            deferred_descriptors: HashSet::new(),
            ever_departed: HashSet::new(),
            dispatcher: LifecycleDispatcher::new(),
            next_ticket: 0,
            next_departure: 0,
            stats: PoolStats::default(),
        }
    }

    /// Pool settings.
    #[must_use]
    pub fn config(&self) -> RelocationConfig {
        self.config
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Departures waiting for a claim, across all descriptors.
    #[must_use]
    pub fn pending_departures(&self) -> usize {
        self.departures.values().map(VecDeque::len).sum()
    }

    /// Departures waiting for a claim for `descriptor`.
    #[must_use]
    pub fn pending_departures_for(&self, descriptor: DescriptorId) -> usize {
        self.departures.get(&descriptor).map_or(0, VecDeque::len)
    }

    /// Deferred placement requests in this pass.
    #[must_use]
    pub fn pending_placements(&self) -> usize {
        self.deferred.len()
    }

    /// Whether `descriptor` has ever been reported as departing.
    #[must_use]
    pub fn has_departed(&self, descriptor: DescriptorId) -> bool {
        self.ever_departed.contains(&descriptor)
    }

    /// Create a fresh entry for `descriptor` at `position`.
    ///
    /// `objects` are the lifecycle-observing objects created inside the new
    /// content, in structural order. Each receives `on_retained` and then
    /// `on_entered_composition` when the pass's notifications are drained.
    pub fn instantiate(
        &mut self,
        descriptor: DescriptorId,
        handle: H,
        parameter: P,
        position: PositionHash,
        objects: Vec<RetainedObject>,
    ) -> RelocationEntry<H, P> {
        for object in &objects {
            self.dispatcher.record_retained(object.clone());
        }
        for object in &objects {
            self.dispatcher.record_entered(object.clone());
        }
        trace!(%descriptor, %position, objects = objects.len(), "instantiate");
        RelocationEntry {
            descriptor,
            handle,
            parameter,
            position,
            objects,
            active: true,
        }
    }

    /// Take `entry` out of the live tree while keeping its state.
    ///
    /// Its objects receive `on_exited_composition` at the next drain. A
    /// later move re-enters them.
    pub fn deactivate(&mut self, entry: &mut RelocationEntry<H, P>) {
        if !entry.active {
            return;
        }
        entry.active = false;
        for object in &entry.objects {
            self.dispatcher.record_exited(object.clone());
        }
    }

    /// Hand a departing entry to the pool instead of disposing it.
    ///
    /// `descriptor` must be the descriptor the entry was instantiated for.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `descriptor` differs from
    /// [`RelocationEntry::descriptor`].
    pub fn report_departure(&mut self, descriptor: DescriptorId, entry: RelocationEntry<H, P>) {
        debug_assert_eq!(
            entry.descriptor, descriptor,
            "departure reported under a different descriptor"
        );
        let descriptor = entry.descriptor;
        trace!(%descriptor, position = %entry.position, "departure");

        self.ever_departed.insert(descriptor);
        let sequence = self.next_departure;
        self.next_departure = self.next_departure.wrapping_add(1);
        self.departures
            .entry(descriptor)
            .or_default()
            .push_back((sequence, entry));
        self.stats.departures += 1;
    }

    /// Claim the oldest waiting departure for `descriptor`, if any.
    pub fn claim(&mut self, descriptor: DescriptorId) -> Option<RelocationEntry<H, P>> {
        let (_, entry) = self.departures.get_mut(&descriptor)?.pop_front()?;
        trace!(%descriptor, from = %entry.position, "claim");
        Some(entry)
    }

    /// Ask for content for `descriptor` at `position` with `parameter`.
    pub fn request_placement(
        &mut self,
        descriptor: DescriptorId,
        parameter: P,
        position: PositionHash,
    ) -> Placement<H, P> {
        // An older deferred placement for this descriptor has first claim on
        // any departure, so later requests queue behind it.
        if !self.deferred_descriptors.contains(&descriptor) {
            if let Some(entry) = self.claim(descriptor) {
                self.stats.moves += 1;
                return Placement::Moved(self.adopt(entry, parameter, position));
            }
        }

        let request = PlacementRequest {
            ticket: self.issue_ticket(),
            descriptor,
            parameter,
            position,
        };

        if self.config.track_usage && !self.has_departed(descriptor) {
            self.stats.immediate_inserts += 1;
            trace!(%descriptor, %position, "insert immediately");
            return Placement::InsertNow(request);
        }

        let ticket = request.ticket;
        trace!(%descriptor, %position, ticket = ticket.raw(), "placement deferred");
        self.deferred.push(request);
        self.deferred_descriptors.insert(descriptor);
        Placement::Deferred(ticket)
    }

    /// Resolve the pass. Unmatched placements come back in
    /// [`PassOutcome::fresh`]; notifications for entries the builder
    /// instantiates from them are drained by
    /// [`dispatch_lifecycle`](Self::dispatch_lifecycle) or the next pass.
    pub fn end_pass(&mut self) -> PassOutcome<H, P> {
        self.resolve(None::<fn(&PlacementRequest<P>) -> (H, Vec<RetainedObject>)>)
    }

    /// Resolve the pass, instantiating unmatched placements through
    /// `insert` so their notifications share the pass's ordered drain.
    pub fn end_pass_with<F>(&mut self, insert: F) -> PassOutcome<H, P>
    where
        F: FnMut(&PlacementRequest<P>) -> (H, Vec<RetainedObject>),
    {
        self.resolve(Some(insert))
    }

    /// Drain notifications recorded since the last drain.
    pub fn dispatch_lifecycle(&mut self) -> LifecycleReport {
        self.dispatcher.dispatch()
    }

    /// Retirements of disposed objects, for delivery at any later point.
    #[must_use]
    pub fn take_retirements(&mut self) -> RetireBatch {
        self.dispatcher.take_retirements()
    }

    fn issue_ticket(&mut self) -> PlacementTicket {
        let ticket = PlacementTicket(self.next_ticket);
        self.next_ticket = self.next_ticket.wrapping_add(1);
        ticket
    }

    /// Install a claimed entry at its new position.
    fn adopt(
        &mut self,
        mut entry: RelocationEntry<H, P>,
        parameter: P,
        position: PositionHash,
    ) -> RelocationEntry<H, P> {
        entry.parameter = parameter;
        entry.position = position;
        if !entry.active {
            entry.active = true;
            for object in &entry.objects {
                self.dispatcher.record_entered(object.clone());
            }
        }
        entry
    }

    fn dispose(&mut self, entry: RelocationEntry<H, P>) -> H {
        if entry.active {
            for object in &entry.objects {
                self.dispatcher.record_exited(object.clone());
            }
        }
        for object in entry.objects {
            self.dispatcher.record_retired(object);
        }
        entry.handle
    }

    fn resolve<F>(&mut self, mut insert: Option<F>) -> PassOutcome<H, P>
    where
        F: FnMut(&PlacementRequest<P>) -> (H, Vec<RetainedObject>),
    {
        let pass = self.stats.passes + 1;
        let _span = debug_span!("end_pass", pass).entered();
        let mut outcome = PassOutcome::default();

        self.deferred_descriptors.clear();
        for request in std::mem::take(&mut self.deferred) {
            if let Some(entry) = self.claim(request.descriptor) {
                self.stats.moves += 1;
                let entry = self.adopt(entry, request.parameter, request.position);
                outcome.moved.push((request.ticket, entry));
                continue;
            }

            self.stats.unmatched_placements += 1;
            match insert.as_mut() {
                Some(insert) => {
                    let (handle, objects) = insert(&request);
                    let entry = self.instantiate(
                        request.descriptor,
                        handle,
                        request.parameter,
                        request.position,
                        objects,
                    );
                    outcome.inserted.push((request.ticket, entry));
                }
                None => outcome.fresh.push(request),
            }
        }

        outcome.disposed = self.dispose_departures();
        outcome.lifecycle = self.dispatcher.dispatch();
        self.stats.passes = pass;

        debug!(
            pass,
            moved = outcome.moved.len(),
            inserted = outcome.inserted.len(),
            fresh = outcome.fresh.len(),
            disposed = outcome.disposed.len(),
            pending_retirements = self.dispatcher.pending_retirements(),
            "pass resolved"
        );
        outcome
    }

    /// Dispose every unclaimed departure in report order, across descriptors.
    fn dispose_departures(&mut self) -> Vec<H> {
        let mut leftovers: Vec<(u64, RelocationEntry<H, P>)> =
            self.departures.drain().flat_map(|(_, queue)| queue).collect();
        leftovers.sort_unstable_by_key(|(sequence, _)| *sequence);

        let mut disposed = Vec::with_capacity(leftovers.len());
        for (_, entry) in leftovers {
            trace!(descriptor = %entry.descriptor, position = %entry.position, "dispose");
            self.stats.disposed += 1;
            disposed.push(self.dispose(entry));
        }
        disposed
    }
}

impl<H, P> Default for RelocationPool<H, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, P> fmt::Debug for RelocationPool<H, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelocationPool")
            .field("config", &self.config)
            .field("pending_departures", &self.pending_departures())
            .field("pending_placements", &self.deferred.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<H, P> Drop for RelocationPool<H, P> {
    fn drop(&mut self) {
        // Departures abandoned mid-pass still owe their objects an exit and a
        // retirement.
        let abandoned = self.dispose_departures();
        drop(abandoned);
        self.dispatcher.dispatch();
        drop(self.dispatcher.take_retirements());
    }
}
