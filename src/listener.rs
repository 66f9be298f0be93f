use crate::types::Clock;

/// Callback observing the retirement of clocks on a node.
///
/// A node invokes every listener registered on it, in registration order,
/// once per clock after the clock's outputs were delivered downstream. This
/// happens for every clock, including blank or failed ones.
pub trait ClockListener: Send + Sync {
    /// Clock `clock` has been retired by the node.
    fn on_clock(&self, clock: Clock);
}
