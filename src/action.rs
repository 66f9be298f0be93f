use crate::{
    sync::*,
    types::{Clock, NodeId, SyncUnsafeCell},
    utils::window_index,
};
use derive_more::Debug;
use std::sync::Arc;

/// Work that an `Action` executes when the scheduler runs it.
///
/// Implementors own an [`ActionRing`]; an action only names one of its
/// records.
pub trait Runnable: Send + Sync {
    /// Node the records belong to.
    fn id(&self) -> NodeId;

    /// Clock currently bound to ring record `slot`.
    fn bound_clock(&self, slot: usize) -> Clock;

    /// Execute the clock bound to ring record `slot`.
    fn run(&self, slot: usize);
}

/// Handle on one ring record of a node, submitted to a scheduler.
///
/// The record stays bound to the same clock until that clock retires, so
/// [`Action::clock`] is stable for as long as the action is pending.
#[must_use]
#[derive(Debug)]
pub struct Action {
    slot: usize,
    #[debug(skip)]
    process: Arc<dyn Runnable>,
}

impl Action {
    pub(crate) fn new(slot: usize, process: Arc<dyn Runnable>) -> Self {
        Self { slot, process }
    }

    /// Node this action executes.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.process.id()
    }

    /// Clock this action executes.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.process.bound_clock(self.slot)
    }

    /// Execute the bound clock on the bound node.
    pub fn run(self) {
        self.process.run(self.slot);
    }
}

/// Fixed ring of action records, one per in-flight clock, indexed by
/// `clock mod slices`.
#[derive(Debug, Default)]
pub(crate) struct ActionRing {
    #[debug(skip)]
    slots: Box<[SyncUnsafeCell<Clock>]>,
}

impl ActionRing {
    pub(crate) fn new(slices: usize) -> Self {
        Self {
            slots: (0..slices).map(|_| SyncUnsafeCell::new(0)).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Bind `clock`'s record and return its index.
    ///
    /// # Safety
    ///
    /// - No other thread binds the same record concurrently. Serial nodes
    ///   serialize binding through the frontier; parallel nodes bind distinct
    ///   clocks, which map to distinct records while fewer than `slices`
    ///   clocks are in flight.
    /// - The previous occupant (`clock - slices`) has retired.
    pub(crate) unsafe fn bind(&self, clock: Clock) -> usize {
        let slot = window_index(clock, self.slots.len());
        // SAFETY: exclusive access per the contract above.
        unsafe {
            self.slots[slot].get_mut().with(|ptr| *ptr = clock);
        }
        slot
    }

    /// Clock bound to record `slot`.
    ///
    /// # Safety
    ///
    /// The record is bound, and its clock has not retired yet.
    pub(crate) unsafe fn clock(&self, slot: usize) -> Clock {
        // SAFETY: the record is only rebound after its clock retired.
        unsafe { self.slots[slot].get().with(|ptr| *ptr) }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn records_wrap_around_the_window() {
        let ring = ActionRing::new(3);
        // SAFETY: single-threaded, every clock retires before its slot wraps.
        unsafe {
            assert_eq!(ring.bind(1), 1);
            assert_eq!(ring.clock(1), 1);
            assert_eq!(ring.bind(5), 2);
            assert_eq!(ring.bind(4), 1);
            assert_eq!(ring.clock(1), 4);
            assert_eq!(ring.clock(2), 5);
        }
    }
}
