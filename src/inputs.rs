use crate::{
    config::{Config, PortValue},
    sync::*,
    types::{Clock, Kind, SyncUnsafeCell, Value},
    utils::window_index,
};
use derive_more::Debug;

/// Stamp of an entry holding no value for any clock.
const EMPTY: u64 = 0;

#[inline]
const fn stamp(clock: Clock, blank: bool) -> u64 {
    ((clock + 1) << 1) | blank as u64
}

#[inline]
const fn stamp_clock(stamp: u64) -> u64 {
    stamp >> 1
}

#[inline]
const fn stamp_is_blank(stamp: u64) -> bool {
    stamp & 1 == 1
}

/// One pending value of one slot.
///
/// `stamp` encodes `(clock + 1) << 1 | blank`. It is published with `Release`
/// after `value` is written, so observing the stamp of clock `c` with
/// `Acquire` makes the value of `c` visible.
#[derive(Debug)]
struct Entry<C: Config> {
    stamp: AtomicU64,
    #[debug(skip)]
    value: SyncUnsafeCell<Option<Value<C>>>,
}

impl<C: Config> Entry<C> {
    fn new() -> Self {
        Self {
            stamp: AtomicU64::new(EMPTY),
            value: SyncUnsafeCell::new(None),
        }
    }
}

#[derive(Debug)]
struct InputSlot<C: Config> {
    kind: Kind<C>,
    connected: bool,
    window: Box<[Entry<C>]>,
}

/// Input port set of a node.
///
/// Holds, per slot, a window of `slices` entries indexed by `clock mod slices`,
/// and answers readiness queries for single clocks.
#[must_use]
#[derive(Debug)]
pub struct Inputs<C: Config> {
    slots: Box<[InputSlot<C>]>,
    /// Total number of writes seen per window index. A clock is complete
    /// when its write brings the counter to a multiple of the slot count.
    arrivals: Box<[AtomicUsize]>,
    slices: usize,
}

impl<C: Config> Inputs<C> {
    pub(crate) fn new(kinds: &[Kind<C>]) -> Self {
        Self {
            slots: kinds
                .iter()
                .map(|&kind| InputSlot {
                    kind,
                    connected: false,
                    window: Box::default(),
                })
                .collect(),
            arrivals: Box::default(),
            slices: 0,
        }
    }

    /// Number of input slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Currently configured window size.
    #[must_use]
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Mark `slot` as wired to an upstream output. Returns `false` if it
    /// already was.
    pub(crate) fn mark_connected(&mut self, slot: usize) -> bool {
        !core::mem::replace(&mut self.slots[slot].connected, true)
    }

    /// Index of the first slot with no upstream connection.
    pub(crate) fn first_unconnected(&self) -> Option<usize> {
        self.slots.iter().position(|slot| !slot.connected)
    }

    /// Whether every slot is wired to an upstream output.
    #[must_use]
    pub fn is_fully_connected(&self) -> bool {
        self.first_unconnected().is_none()
    }

    /// (Re)configure the window size, dropping every pending entry.
    pub(crate) fn set_slices(&mut self, slices: usize) {
        self.slices = slices;
        for slot in &mut self.slots {
            slot.window = (0..slices).map(|_| Entry::new()).collect();
        }
        self.arrivals = (0..slices).map(|_| AtomicUsize::new(0)).collect();
    }

    /// Record `value` (`None` is the blank sentinel) for `slot` at `clock`.
    ///
    /// Returns `true` iff this write completed the arrivals of `clock`, which
    /// happens exactly once per clock.
    ///
    /// Writing the same `(slot, clock)` twice is a wiring error: it is
    /// asserted in debug builds and silently overwrites in release builds.
    pub fn write(&self, slot: usize, clock: Clock, value: Option<Value<C>>) -> bool {
        if self.slices == 0 {
            debug_assert!(false, "Inputs::write: window size is not configured");
            return false;
        }
        let index = window_index(clock, self.slices);
        let input = &self.slots[slot];
        debug_assert!(
            value.as_ref().is_none_or(|value| value.kind() == input.kind),
            "Inputs::write: slot {slot} expects {:?}",
            input.kind
        );
        let entry = &input.window[index];
        debug_assert_ne!(
            stamp_clock(entry.stamp.load(Ordering::Relaxed)),
            clock + 1,
            "Inputs::write: slot {slot} written twice at clock {clock}"
        );
        let blank = value.is_none();
        // SAFETY: the upstream producer of `clock` is the only writer of this
        // entry, and the previous occupant (`clock - slices`) has retired before
        // the network emitted `clock`, so nothing reads the value concurrently.
        unsafe {
            entry.value.get_mut().with(|ptr| *ptr = value);
        }
        entry.stamp.store(stamp(clock, blank), Ordering::Release);
        // SeqCst pairs with the frontier: a completing writer that then reads
        // a stale `next_clock` is seen by the claimer's readiness scan.
        let arrived = self.arrivals[index].fetch_add(1, Ordering::SeqCst) + 1;
        arrived % self.slots.len() == 0
    }

    /// Whether every slot holds an entry (value or blank) for `clock`.
    #[must_use]
    pub fn is_ready_at(&self, clock: Clock) -> bool {
        if self.slices == 0 || self.slots.is_empty() {
            return false;
        }
        let index = window_index(clock, self.slices);
        // Clocks sharing a window index arrive one after another, so `clock`
        // is complete once its index has counted every write up to it.
        let expected = (clock / self.slices as Clock + 1) as usize * self.slots.len();
        self.arrivals[index].load(Ordering::SeqCst) >= expected
            && self.slots.iter().all(|slot| {
                stamp_clock(slot.window[index].stamp.load(Ordering::Acquire)) == clock + 1
            })
    }

    /// Whether no slot holds the blank sentinel for `clock`.
    ///
    /// Meaningful only once `is_ready_at(clock)` holds.
    #[must_use]
    pub fn is_none_blank_at(&self, clock: Clock) -> bool {
        if self.slices == 0 {
            return false;
        }
        let index = window_index(clock, self.slices);
        self.slots
            .iter()
            .all(|slot| !stamp_is_blank(slot.window[index].stamp.load(Ordering::Acquire)))
    }

    /// Exclusive access to the values of `clock`, for its execution.
    pub(crate) fn view(&self, clock: Clock) -> InputView<'_, C> {
        InputView {
            inputs: self,
            index: window_index(clock, self.slices),
            clock,
        }
    }
}

/// Read access to the input values of one clock, handed to node bodies.
///
/// Dropping the view releases the consumed values.
#[derive(Debug)]
pub struct InputView<'a, C: Config> {
    inputs: &'a Inputs<C>,
    index: usize,
    clock: Clock,
}

impl<C: Config> InputView<'_, C> {
    /// Clock being executed.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Number of input slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.slots.len()
    }

    /// Whether the node has no input slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.slots.is_empty()
    }

    fn entry(&self, slot: usize) -> &Entry<C> {
        &self.inputs.slots[slot].window[self.index]
    }

    /// Whether `slot` was written as blank at this clock.
    #[must_use]
    pub fn is_blank(&self, slot: usize) -> bool {
        stamp_is_blank(self.entry(slot).stamp.load(Ordering::Acquire))
    }

    /// Value of `slot`, or `None` if it is blank or already taken.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Value<C>> {
        // SAFETY: the execution of `self.clock` owns this entry until the view
        // is dropped; no write for this window index happens meanwhile.
        unsafe { self.entry(slot).value.get().with(|ptr| (&*ptr).as_ref()) }
    }

    /// Move the value of `slot` out of the window.
    pub fn take(&mut self, slot: usize) -> Option<Value<C>> {
        // SAFETY: see `get`; `&mut self` rules out outstanding borrows.
        unsafe { self.entry(slot).value.get_mut().with(|ptr| (*ptr).take()) }
    }
}

impl<C: Config> Drop for InputView<'_, C> {
    fn drop(&mut self) {
        for slot in 0..self.len() {
            drop(self.take(slot));
        }
    }
}
