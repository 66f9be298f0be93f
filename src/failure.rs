use crate::{
    scheduler::ScheduleError,
    types::{Clock, NodeId},
};
use crossbeam::queue::SegQueue;
use thiserror::Error;

/// Why a clock failed on a node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailureReason {
    /// The node's body returned an error.
    #[error("computation failed: {0}")]
    Computation(String),
    /// The scheduler refused to admit the clock's action.
    #[error("submission rejected: {0}")]
    Rejected(ScheduleError),
    /// The clock's plugin task could not be started.
    #[error("plugin task failed: {0}")]
    Plugin(ScheduleError),
}

/// A clock that failed on one node. Later clocks are unaffected, and the
/// failed clock's outputs are delivered as blank.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{node} failed at clock {clock}: {reason}")]
pub struct ClockFailure {
    /// Failing node.
    pub node: NodeId,
    /// Failing clock.
    pub clock: Clock,
    /// Failure cause.
    pub reason: FailureReason,
}

/// Lock-free collection of clock failures, shared by the nodes of a network.
#[derive(Debug, Default)]
pub struct FailureLog {
    entries: SegQueue<ClockFailure>,
}

impl FailureLog {
    pub(crate) fn record(&self, node: NodeId, clock: Clock, reason: FailureReason) {
        self.entries.push(ClockFailure {
            node,
            clock,
            reason,
        });
    }

    /// Number of failures not drained yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no failure is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every recorded failure, ordered by clock then node.
    #[must_use]
    pub fn drain(&self) -> Vec<ClockFailure> {
        let mut failures: Vec<_> = core::iter::from_fn(|| self.entries.pop()).collect();
        failures.sort_by_key(|failure| (failure.clock, failure.node));
        failures
    }
}
