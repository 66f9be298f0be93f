use crate::{
    config::Config,
    failure::ClockFailure,
    listener::ClockListener,
    network::Network,
    outputs::Outputs,
    sync::*,
    types::Clock,
    utils::window_index,
};
use tracing::{debug, trace};

/// Counts, per window index, the processing nodes that have yet to retire
/// the clock last emitted at that index.
#[derive(Debug)]
pub(crate) struct ClockTracker {
    remaining: Box<[AtomicUsize]>,
    nodes: usize,
}

impl ClockTracker {
    pub(crate) fn new(slices: usize, nodes: usize) -> Self {
        Self {
            remaining: (0..slices).map(|_| AtomicUsize::new(0)).collect(),
            nodes,
        }
    }

    fn counter(&self, clock: Clock) -> &AtomicUsize {
        &self.remaining[window_index(clock, self.remaining.len())]
    }

    /// Wait until the previous clock sharing `clock`'s index fully retired,
    /// then start counting `clock`.
    fn admit(&self, clock: Clock) {
        let counter = self.counter(clock);
        spin_until(|| counter.load(Ordering::Acquire) == 0);
        counter.store(self.nodes, Ordering::Release);
    }

    fn wait_idle(&self) {
        for counter in &self.remaining {
            spin_until(|| counter.load(Ordering::Acquire) == 0);
        }
    }
}

impl ClockListener for ClockTracker {
    fn on_clock(&self, clock: Clock) {
        let previous = self.counter(clock).fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(previous, 0, "ClockTracker: clock {clock} retired too often");
    }
}

/// Outcome of [`Network::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Clocks emitted by this run.
    pub emitted: u64,
    /// Whether a source reported exhaustion.
    pub exhausted: bool,
    /// Failures recorded during the run, ordered by clock then node.
    pub failures: Vec<ClockFailure>,
}

impl<C: Config> Network<C> {
    /// Emit the next clock: wait until the clock `slices` ticks earlier has
    /// retired everywhere, then run every source once on this thread.
    ///
    /// Returns the emitted clock, or `None` if a source was exhausted before.
    /// The clock on which a source reports exhaustion is still emitted, with
    /// blank on every output of that source.
    pub fn step(&mut self) -> Option<Clock> {
        if self.exhausted {
            return None;
        }
        let clock = self.clock;
        self.tracker.admit(clock);
        for source in &mut self.sources {
            let mut outputs = Outputs::new(source.outputs.kinds());
            if !(source.body)(clock, &mut outputs) {
                debug!(source = %source.id, clock, "source exhausted");
                outputs.clear();
                self.exhausted = true;
            }
            source.outputs.deliver(clock, outputs);
            for listener in &source.listeners {
                listener.on_clock(clock);
            }
        }
        trace!(clock, "clock emitted");
        self.clock += 1;
        Some(clock)
    }

    /// Emit up to `clocks` clocks, then wait until all of them retired.
    pub fn run(&mut self, clocks: u64) -> RunReport {
        let first = self.clock;
        for _ in 0..clocks {
            if self.step().is_none() {
                break;
            }
        }
        self.wait_idle();
        RunReport {
            emitted: self.clock - first,
            exhausted: self.exhausted,
            failures: self.failures(),
        }
    }

    /// Emit clocks until a source is exhausted, then wait until all of them
    /// retired.
    pub fn run_to_end(&mut self) -> RunReport {
        let first = self.clock;
        while self.step().is_some() {}
        self.wait_idle();
        RunReport {
            emitted: self.clock - first,
            exhausted: self.exhausted,
            failures: self.failures(),
        }
    }

    /// Wait until every emitted clock retired on every node.
    pub fn wait_idle(&self) {
        self.tracker.wait_idle();
    }
}
