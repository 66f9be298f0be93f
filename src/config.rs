use crate::{node::Execution, scheduler::Policy};
use core::{fmt::Debug, num::NonZeroUsize};

/// A value that can travel along the edges of a network.
///
/// Networks carry a single value type, usually an enum with one variant per
/// payload type. `kind` names the variant so that ports can be typed: an
/// output can only be connected to an input declaring the same kind.
pub trait PortValue: Clone + Debug + Send + Sync + 'static {
    /// Discriminant used to type ports.
    type Kind: Copy + Eq + Debug + Send + Sync + 'static;
    /// Kind of this value.
    fn kind(&self) -> Self::Kind;
}

/// Configuration entry-point for instantiating a network.
///
/// A concrete `Config` binds the value type carried by every port of the
/// network.
pub trait Config: Sized + 'static {
    /// Tagged union of every payload type flowing through the network.
    type Value: PortValue;
}

/// Network-wide settings applied when the graph is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Pipeline depth: how many clocks may be in flight at once.
    pub slices: usize,
    /// Scheduling policy of nodes that don't override it.
    pub policy: Policy,
    /// Execution mode of nodes that don't override it.
    pub execution: Execution,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            slices: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            policy: Policy::default(),
            execution: Execution::default(),
        }
    }
}

impl NetworkConfig {
    /// Set the pipeline depth.
    #[must_use]
    pub const fn with_slices(mut self, slices: usize) -> Self {
        self.slices = slices;
        self
    }

    /// Set the default scheduling policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the default execution mode.
    #[must_use]
    pub const fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }
}
