mod build;
mod drive;

pub use crate::network::{
    build::{NetworkBuilder, NetworkError},
    drive::RunReport,
};
use crate::{
    config::Config,
    failure::{ClockFailure, FailureLog},
    listener::ClockListener,
    network::drive::ClockTracker,
    node::Node,
    outputs::{OutputPorts, Outputs},
    types::{Clock, NodeId},
};
use derive_more::Debug;
use std::sync::Arc;

/// Body of a source: fills the outputs of one clock and returns `false` once
/// exhausted.
pub type SourceFn<C> = dyn FnMut(Clock, &mut Outputs<'_, C>) -> bool + Send;

#[derive(Debug)]
struct Source<C: Config> {
    id: NodeId,
    name: String,
    outputs: OutputPorts<C>,
    #[debug(skip)]
    body: Box<SourceFn<C>>,
    #[debug(skip)]
    listeners: Vec<Arc<dyn ClockListener>>,
}

/// A validated, running dataflow network.
///
/// The network owns every node and drives the global clock: each
/// [`step`](Network::step) runs the sources once on the calling thread, and
/// the produced values flow through the nodes on the scheduler. At most
/// `slices` clocks are in flight: clock `c` is emitted only once every node
/// retired clock `c - slices`.
///
/// Dropping the network waits for every in-flight clock to retire.
#[must_use]
#[derive(Debug)]
pub struct Network<C: Config> {
    sources: Vec<Source<C>>,
    /// Processing nodes, upstream first.
    nodes: Vec<Arc<Node<C>>>,
    tracker: Arc<ClockTracker>,
    failures: Arc<FailureLog>,
    slices: usize,
    /// Next clock to emit.
    clock: Clock,
    exhausted: bool,
}

impl<C: Config> Network<C> {
    /// Pipeline depth.
    #[must_use]
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Next clock to be emitted, which is also the number of clocks emitted
    /// so far.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Whether a source reported exhaustion. No clock is emitted afterwards.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Processing node `id`, for inspection.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node<C>> {
        self.nodes
            .iter()
            .find(|node| node.id() == id)
            .map(|node| &**node)
    }

    /// Name of source or node `id`.
    #[must_use]
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.sources
            .iter()
            .find(|source| source.id == id)
            .map(|source| source.name.as_str())
            .or_else(|| self.node(id).map(Node::name))
    }

    /// Drain the failures recorded so far, ordered by clock then node.
    #[must_use]
    pub fn failures(&self) -> Vec<ClockFailure> {
        self.failures.drain()
    }
}

impl<C: Config> Drop for Network<C> {
    fn drop(&mut self) {
        // A clock whose body panicked never retires.
        if !std::thread::panicking() {
            self.wait_idle();
        }
        for node in &self.nodes {
            node.stop();
        }
    }
}
