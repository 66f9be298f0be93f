use crate::{
    action::Action,
    config::Config,
    failure::FailureReason,
    node::{Execution, Node, NodeState},
    scheduler::ScheduleError,
    sync::*,
    types::Clock,
    utils::window_index,
};
use std::sync::Arc;
use tracing::{trace, warn};

impl<C: Config> Node<C> {
    /// Clock-readiness notification: admit every newly claimable clock.
    ///
    /// Called by [`Node::deliver`] on the thread whose write made `clock`
    /// ready. Safe to call concurrently, and with clocks that are not ready:
    /// every ready clock is submitted exactly once.
    ///
    /// Serial nodes claim runs of consecutive ready clocks from the frontier
    /// and submit them to their queue in clock order. Parallel nodes claim
    /// `clock` alone and spawn it.
    pub fn on_clock(self: &Arc<Self>, clock: Clock) {
        match self.state() {
            NodeState::Unconfigured | NodeState::Stopped => return,
            NodeState::Configured => {
                if self
                    .state
                    .compare_exchange(
                        NodeState::Configured as u8,
                        NodeState::Running as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    trace!(node = %self.id, "node running");
                }
            }
            NodeState::Running => {}
        }
        match self.execution {
            Execution::Serial => self.advance(),
            Execution::Parallel => self.claim_one(clock),
        }
    }

    /// Claim and submit ranges of ready clocks until none is left.
    fn advance(self: &Arc<Self>) {
        let slices = self.ring.len() as Clock;
        let next = &*self.frontier.next;
        let queued = &*self.frontier.queued;
        loop {
            // SeqCst on `next` and on the arrival counters: a writer completing
            // a clock after our scan sees our claim and scans the clock itself.
            let start = next.load(Ordering::SeqCst);
            let end = (start..start + slices)
                .find(|&clock| !self.inputs.is_ready_at(clock))
                .unwrap_or(start + slices);
            if end == start {
                return;
            }
            if next
                .compare_exchange(start, end, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }
            trace!(node = %self.id, start, end, "claimed clocks");
            // The owner of the preceding range must finish submitting first.
            spin_until(|| queued.load(Ordering::Acquire) >= start);
            for clock in start..end {
                // SAFETY: this thread exclusively owns `[start, end)`, and the
                // previous occupant of each record, `clock - slices`, retired
                // before the inputs of `clock` could complete.
                let slot = unsafe { self.ring.bind(clock) };
                let action = Action::new(slot, self.clone());
                if let Err(error) = self.scheduler.enqueue(self.queue, action, self.policy) {
                    self.reject(clock, error);
                }
            }
            queued.store(end, Ordering::Release);
        }
    }

    /// Claim `clock` for a parallel node and spawn it.
    fn claim_one(self: &Arc<Self>, clock: Clock) {
        if !self.inputs.is_ready_at(clock) {
            return;
        }
        let claim = &self.claims[window_index(clock, self.claims.len())];
        let mut current = claim.load(Ordering::Acquire);
        loop {
            if current > clock {
                return;
            }
            match claim.compare_exchange_weak(
                current,
                clock + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        trace!(node = %self.id, clock, "claimed clock");
        // SAFETY: the claim makes this thread the only binder of `clock`, and
        // network backpressure retires `clock - slices` before `clock` is
        // emitted.
        let slot = unsafe { self.ring.bind(clock) };
        let action = Action::new(slot, self.clone());
        if let Err(error) = self.scheduler.spawn(action, self.policy) {
            self.reject(clock, error);
        }
    }

    /// Record a refused submission and retire the clock as blank on the
    /// calling thread, so that downstream nodes and listeners stay aligned.
    fn reject(&self, clock: Clock, error: ScheduleError) {
        warn!(node = %self.id, clock, %error, "submission rejected, retiring clock as blank");
        self.failures
            .record(self.id, clock, FailureReason::Rejected(error));
        self.retire(clock, true);
    }
}
