use crate::{
    config::{Config, NetworkConfig},
    failure::FailureLog,
    inputs::InputView,
    listener::ClockListener,
    network::{Network, Source, SourceFn, drive::ClockTracker},
    node::{Body, Node, NodeOptions},
    outputs::{OutputPorts, Outputs, Target},
    plugin::JobId,
    scheduler::Scheduler,
    types::{Clock, HashSet, InPort, IndexMap, IndexSet, Kind, MAX_SLOTS, NodeId, OutPort, Value},
};
use rustc_hash::FxBuildHasher;
use std::{collections::VecDeque, sync::Arc};
use thiserror::Error;
use tracing::debug;

/// Error raised while assembling a network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NetworkError {
    /// The pipeline depth is zero.
    #[error("pipeline depth must be positive")]
    ZeroSlices,
    /// No source feeds the network.
    #[error("network has no source")]
    NoSources,
    /// A node is declared with slot counts its kind does not support.
    #[error("{kind} node cannot have {inputs} input(s) and {outputs} output(s)")]
    Arity {
        /// Node kind.
        kind: &'static str,
        /// Declared input slots.
        inputs: usize,
        /// Declared output slots.
        outputs: usize,
    },
    /// A port named in a connection does not exist.
    #[error("no such port: {0}")]
    NoSuchPort(String),
    /// The two ends of a connection carry different kinds.
    #[error("cannot connect {from} ({output}) to {to} ({input})")]
    KindMismatch {
        /// Upstream end.
        from: OutPort,
        /// Downstream end.
        to: InPort,
        /// Kind of the output.
        output: String,
        /// Kind of the input.
        input: String,
    },
    /// The input already has an upstream connection.
    #[error("{0} is already connected")]
    AlreadyConnected(InPort),
    /// A slot is left unwired.
    #[error("{name} ({node}) has an unconnected {direction} slot {slot}")]
    NotFullyConnected {
        /// Offending node.
        node: NodeId,
        /// Its name.
        name: String,
        /// `input` or `output`.
        direction: &'static str,
        /// Slot index.
        slot: usize,
    },
    /// The graph contains cycle(s).
    #[error("graph contains cycle(s)")]
    Cycle,
    /// No processing node (or, for `observe`, no node) with this id exists.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// More nodes than `NodeId` can address.
    #[error("too many nodes")]
    TooManyNodes,
}

enum Plan<C: Config> {
    Source {
        outputs: Vec<Kind<C>>,
        body: Box<SourceFn<C>>,
    },
    Node {
        inputs: Vec<Kind<C>>,
        outputs: Vec<Kind<C>>,
        body: Body<C>,
        options: NodeOptions,
    },
}

struct Entry<C: Config> {
    name: String,
    plan: Plan<C>,
    listeners: Vec<Arc<dyn ClockListener>>,
}

impl<C: Config> Entry<C> {
    fn inputs(&self) -> &[Kind<C>] {
        match &self.plan {
            Plan::Source { .. } => &[],
            Plan::Node { inputs, .. } => inputs,
        }
    }

    fn outputs(&self) -> &[Kind<C>] {
        match &self.plan {
            Plan::Source { outputs, .. } | Plan::Node { outputs, .. } => outputs,
        }
    }
}

/// Assembles sources, nodes and edges, then validates and freezes them into
/// a [`Network`].
#[must_use]
pub struct NetworkBuilder<C: Config> {
    config: NetworkConfig,
    scheduler: Arc<dyn Scheduler>,
    entries: IndexMap<NodeId, Entry<C>>,
    edges: Vec<(OutPort, InPort)>,
    wired_inputs: HashSet<InPort>,
}

impl<C: Config> core::fmt::Debug for NetworkBuilder<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetworkBuilder")
            .field("config", &self.config)
            .field("nodes", &self.entries.len())
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}

impl<C: Config> NetworkBuilder<C> {
    /// Start an empty network running on `scheduler`.
    pub fn new(config: NetworkConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            config,
            scheduler,
            entries: IndexMap::default(),
            edges: vec![],
            wired_inputs: HashSet::default(),
        }
    }

    fn add(&mut self, name: String, plan: Plan<C>) -> Result<NodeId, NetworkError> {
        let raw = u16::try_from(self.entries.len()).map_err(|_| NetworkError::TooManyNodes)?;
        let id = NodeId::new(raw);
        self.entries.insert(
            id,
            Entry {
                name,
                plan,
                listeners: vec![],
            },
        );
        Ok(id)
    }

    fn add_node(
        &mut self,
        name: impl Into<String>,
        body: Body<C>,
        inputs: &[Kind<C>],
        outputs: &[Kind<C>],
    ) -> Result<NodeId, NetworkError> {
        body.check_arity(inputs.len(), outputs.len())?;
        let plan = Plan::Node {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            body,
            options: NodeOptions::default(),
        };
        self.add(name.into(), plan)
    }

    /// Add a source. It runs on the thread driving the network, once per
    /// clock, and returns `false` once exhausted.
    ///
    /// # Errors
    /// If `outputs` is empty or has more than [`MAX_SLOTS`] slots.
    pub fn source(
        &mut self,
        name: impl Into<String>,
        outputs: &[Kind<C>],
        body: impl FnMut(Clock, &mut Outputs<'_, C>) -> bool + Send + 'static,
    ) -> Result<NodeId, NetworkError> {
        if !(1..=MAX_SLOTS).contains(&outputs.len()) {
            return Err(NetworkError::Arity {
                kind: "source",
                inputs: 0,
                outputs: outputs.len(),
            });
        }
        let plan = Plan::Source {
            outputs: outputs.to_vec(),
            body: Box::new(body),
        };
        self.add(name.into(), plan)
    }

    /// Add a process node.
    ///
    /// # Errors
    /// If either side has no slot or more than [`MAX_SLOTS`] slots.
    pub fn process(
        &mut self,
        name: impl Into<String>,
        inputs: &[Kind<C>],
        outputs: &[Kind<C>],
        body: impl Fn(Clock, &mut InputView<'_, C>, &mut Outputs<'_, C>) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Result<NodeId, NetworkError> {
        self.add_node(name, Body::process(body), inputs, outputs)
    }

    /// Add a sink node.
    ///
    /// # Errors
    /// If `inputs` is empty or has more than [`MAX_SLOTS`] slots.
    pub fn sink(
        &mut self,
        name: impl Into<String>,
        inputs: &[Kind<C>],
        body: impl Fn(Clock, &mut InputView<'_, C>) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Result<NodeId, NetworkError> {
        self.add_node(name, Body::sink(body), inputs, &[])
    }

    /// Add a switch: inputs `[control, value]`, outputs `[on_true, on_false]`.
    ///
    /// # Errors
    /// If the network already holds as many nodes as `NodeId` can address.
    pub fn switch(
        &mut self,
        name: impl Into<String>,
        control: Kind<C>,
        value: Kind<C>,
        condition: impl Fn(&Value<C>) -> bool + Send + Sync + 'static,
    ) -> Result<NodeId, NetworkError> {
        self.add_node(name, Body::switch(condition), &[control, value], &[value, value])
    }

    /// Add a select: inputs `[control, on_true, on_false]`, output `[out]`.
    ///
    /// # Errors
    /// If the network already holds as many nodes as `NodeId` can address.
    pub fn select(
        &mut self,
        name: impl Into<String>,
        control: Kind<C>,
        value: Kind<C>,
        condition: impl Fn(&Value<C>) -> bool + Send + Sync + 'static,
    ) -> Result<NodeId, NetworkError> {
        self.add_node(name, Body::select(condition), &[control, value, value], &[value])
    }

    /// Add a sink starting one plugin task of `job` per non-blank clock.
    ///
    /// # Errors
    /// If `inputs` is empty or has more than [`MAX_SLOTS`] slots.
    pub fn job_sink(
        &mut self,
        name: impl Into<String>,
        inputs: &[Kind<C>],
        job: JobId,
    ) -> Result<NodeId, NetworkError> {
        self.add_node(name, Body::job(job), inputs, &[])
    }

    /// Override the network defaults for one processing node.
    ///
    /// # Errors
    /// If `node` is unknown or is a source.
    pub fn configure(&mut self, node: NodeId, options: NodeOptions) -> Result<(), NetworkError> {
        match self.entries.get_mut(&node).map(|entry| &mut entry.plan) {
            Some(Plan::Node { options: current, .. }) => {
                *current = options;
                Ok(())
            }
            _ => Err(NetworkError::UnknownNode(node)),
        }
    }

    /// Register `listener` on `node`. Sources notify their listeners once
    /// their outputs for a clock are delivered.
    ///
    /// # Errors
    /// If `node` is unknown.
    pub fn observe(
        &mut self,
        node: NodeId,
        listener: Arc<dyn ClockListener>,
    ) -> Result<(), NetworkError> {
        let entry = self
            .entries
            .get_mut(&node)
            .ok_or(NetworkError::UnknownNode(node))?;
        entry.listeners.push(listener);
        Ok(())
    }

    /// Wire output `from` to input `to`. An output may feed several inputs;
    /// an input accepts a single upstream output.
    ///
    /// # Errors
    /// If either node or slot is unknown, the kinds differ, or `to` is
    /// already wired.
    pub fn connect(&mut self, from: OutPort, to: InPort) -> Result<(), NetworkError> {
        let upstream = self
            .entries
            .get(&from.node)
            .ok_or(NetworkError::UnknownNode(from.node))?;
        let downstream = self
            .entries
            .get(&to.node)
            .ok_or(NetworkError::UnknownNode(to.node))?;
        let &output = upstream
            .outputs()
            .get(from.index)
            .ok_or_else(|| NetworkError::NoSuchPort(from.to_string()))?;
        let &input = downstream
            .inputs()
            .get(to.index)
            .ok_or_else(|| NetworkError::NoSuchPort(to.to_string()))?;
        if output != input {
            return Err(NetworkError::KindMismatch {
                from,
                to,
                output: format!("{output:?}"),
                input: format!("{input:?}"),
            });
        }
        if !self.wired_inputs.insert(to) {
            return Err(NetworkError::AlreadyConnected(to));
        }
        self.edges.push((from, to));
        Ok(())
    }

    /// Validate the graph and materialize it.
    ///
    /// # Panics
    /// In case of internal invariant violations. Impossible if there are no
    /// bugs in the code.
    ///
    /// # Errors
    /// If the depth is zero, there is no source, a slot is unwired, or the
    /// graph has a cycle.
    pub fn build(self) -> Result<Network<C>, NetworkError> {
        let Self {
            config,
            scheduler,
            mut entries,
            edges,
            wired_inputs,
        } = self;
        if config.slices == 0 {
            return Err(NetworkError::ZeroSlices);
        }
        if !entries
            .values()
            .any(|entry| matches!(entry.plan, Plan::Source { .. }))
        {
            return Err(NetworkError::NoSources);
        }
        let wired_outputs: HashSet<OutPort> = edges.iter().map(|&(from, _)| from).collect();
        for (&node, entry) in &entries {
            let unwired = |direction, slot| NetworkError::NotFullyConnected {
                node,
                name: entry.name.clone(),
                direction,
                slot,
            };
            if let Some(slot) = (0..entry.inputs().len()).find(|&slot| !wired_inputs.contains(&node.input(slot))) {
                return Err(unwired("input", slot));
            }
            if let Some(slot) =
                (0..entry.outputs().len()).find(|&slot| !wired_outputs.contains(&node.output(slot)))
            {
                return Err(unwired("output", slot));
            }
        }

        let order = topological_order(&entries, &edges)?;
        debug!(nodes = order.len(), edges = edges.len(), slices = config.slices, "network validated");

        // Materialize downstream first, so that every edge target exists when
        // its upstream node is built.
        let failures = Arc::new(FailureLog::default());
        let processing = entries
            .values()
            .filter(|entry| matches!(entry.plan, Plan::Node { .. }))
            .count();
        let tracker = Arc::new(ClockTracker::new(config.slices, processing));
        let mut built: IndexMap<NodeId, Arc<Node<C>>> =
            IndexMap::with_capacity_and_hasher(processing, FxBuildHasher);
        let mut sources = vec![];
        for &id in order.iter().rev() {
            let Entry {
                name,
                plan,
                listeners,
            } = entries.swap_remove(&id).expect("NetworkBuilder::build: [1]");
            let targets = edges.iter().filter(|(from, _)| from.node == id);
            match plan {
                Plan::Source { outputs, body } => {
                    let mut ports = OutputPorts::new(&outputs);
                    for &(from, to) in targets {
                        let node = built[&to.node].clone();
                        ports.attach(from.index, Target { node, slot: to.index });
                    }
                    sources.push(Source {
                        id,
                        name,
                        outputs: ports,
                        body,
                        listeners,
                    });
                }
                Plan::Node {
                    inputs,
                    outputs,
                    body,
                    options,
                } => {
                    let options = NodeOptions {
                        execution: Some(options.execution.unwrap_or(config.execution)),
                        policy: Some(options.policy.unwrap_or(config.policy)),
                    };
                    let mut node =
                        Node::new(id, name, body, &inputs, &outputs, scheduler.clone(), options)?;
                    node.set_slices(config.slices);
                    node.with_failure_log(failures.clone());
                    for &(from, to) in targets {
                        let target = built[&to.node].clone();
                        node.connect_output(from.index, target, to.index);
                    }
                    for slot in 0..inputs.len() {
                        let fresh = node.mark_input_connected(slot);
                        assert!(fresh, "NetworkBuilder::build: [2]");
                    }
                    for listener in listeners {
                        node.observe(listener);
                    }
                    node.observe(tracker.clone());
                    assert!(node.is_fully_connected(), "NetworkBuilder::build: [3]");
                    built.insert(id, Arc::new(node));
                }
            }
        }
        assert!(entries.is_empty(), "NetworkBuilder::build: [4]");
        sources.sort_unstable_by_key(|source| source.id);
        // Topological order, upstream first.
        let mut nodes: Vec<_> = built.into_values().collect();
        nodes.reverse();

        debug!(sources = sources.len(), nodes = nodes.len(), "network built");
        Ok(Network {
            sources,
            nodes,
            tracker,
            failures,
            slices: config.slices,
            clock: 0,
            exhausted: false,
        })
    }
}

/// Kahn's ordering with progress detection: sources first, then every node
/// after all of its upstream nodes.
fn topological_order<C: Config>(
    entries: &IndexMap<NodeId, Entry<C>>,
    edges: &[(OutPort, InPort)],
) -> Result<Vec<NodeId>, NetworkError> {
    let mut child_to_parents: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::default();
    let mut parent_to_children: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::default();
    for &(from, to) in edges {
        child_to_parents.entry(to.node).or_default().insert(from.node);
        parent_to_children.entry(from.node).or_default().insert(to.node);
    }

    let mut placed: IndexSet<NodeId> = entries
        .keys()
        .filter(|id| !child_to_parents.contains_key(*id))
        .copied()
        .collect();
    if placed.is_empty() && !entries.is_empty() {
        return Err(NetworkError::Cycle);
    }

    let mut pending_queue = VecDeque::with_capacity(entries.len() - placed.len());
    let mut pending_set = HashSet::default();
    for id in &placed {
        for &child in parent_to_children.get(id).into_iter().flatten() {
            if pending_set.insert(child) {
                pending_queue.push_back(child);
            }
        }
    }

    // Without a cycle, some pending node gets placed within as many pops as
    // the queue held at the last placement.
    let mut last_progress_iter = 0usize;
    let mut last_progress_queue_len = pending_queue.len();
    let mut iter = 0usize;
    while let Some(id) = pending_queue.pop_front() {
        let removed = pending_set.remove(&id);
        assert!(removed, "topological_order: [1]");
        if iter - last_progress_iter >= last_progress_queue_len {
            return Err(NetworkError::Cycle);
        }
        iter += 1;
        let parents = child_to_parents.get(&id).expect("topological_order: [2]");
        if !parents.iter().all(|parent| placed.contains(parent)) {
            // Re-enqueued when a missing parent is placed.
            continue;
        }
        let inserted = placed.insert(id);
        assert!(inserted, "topological_order: [3]");
        for &child in parent_to_children.get(&id).into_iter().flatten() {
            if !placed.contains(&child) && pending_set.insert(child) {
                pending_queue.push_back(child);
            }
        }
        last_progress_iter = iter;
        last_progress_queue_len = pending_queue.len();
    }

    if placed.len() == entries.len() {
        Ok(placed.into_iter().collect())
    } else {
        Err(NetworkError::Cycle)
    }
}
