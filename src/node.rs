mod advance;
mod run;

use crate::{
    action::ActionRing,
    config::Config,
    failure::FailureLog,
    inputs::{InputView, Inputs},
    listener::ClockListener,
    network::NetworkError,
    outputs::{OutputPorts, Outputs, Target},
    plugin::JobId,
    scheduler::{Policy, Scheduler},
    sync::*,
    types::{Clock, Kind, MAX_SLOTS, NodeId, QueueId, Value},
};
use crossbeam::utils::CachePadded;
use derive_more::Debug;
use std::sync::Arc;

/// User computation of a process node: reads the clock's inputs and sends
/// its outputs. Unsent outputs are delivered as blank.
pub type ProcessFn<C> = dyn Fn(Clock, &mut InputView<'_, C>, &mut Outputs<'_, C>) -> anyhow::Result<()>
    + Send
    + Sync;

/// User computation of a sink node.
pub type SinkFn<C> = dyn Fn(Clock, &mut InputView<'_, C>) -> anyhow::Result<()> + Send + Sync;

/// Routing predicate of switch and select nodes, applied to the control value.
pub type ConditionFn<C> = dyn Fn(&Value<C>) -> bool + Send + Sync;

/// How the tasks of a node are admitted to the scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Execution {
    /// Clocks run one at a time, in clock order, on the node's own queue.
    #[default]
    Serial,
    /// Clocks run concurrently and in any order. Suitable for stateless
    /// bodies only.
    Parallel,
}

/// Per-node overrides of the network defaults.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    /// Execution mode; the network default when `None`.
    pub execution: Option<Execution>,
    /// Scheduling policy; the network default when `None`.
    pub policy: Option<Policy>,
}

impl NodeOptions {
    /// Override the execution mode.
    #[must_use]
    pub const fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = Some(execution);
        self
    }

    /// Override the scheduling policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// No window size set yet; clock notifications are ignored.
    Unconfigured = 0,
    /// Window size set, no clock seen yet.
    Configured = 1,
    /// At least one clock notification was handled.
    Running = 2,
    /// The owning network is gone; clock notifications are ignored.
    Stopped = 3,
}

impl NodeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unconfigured,
            1 => Self::Configured,
            2 => Self::Running,
            3 => Self::Stopped,
            _ => unreachable!("NodeState::from_u8: {raw}"),
        }
    }
}

/// What a node does with one clock.
pub enum Body<C: Config> {
    /// Run a computation over the inputs, produce outputs.
    Process(Box<ProcessFn<C>>),
    /// Run a computation over the inputs, produce nothing.
    Sink(Box<SinkFn<C>>),
    /// Inputs `[control, value]`, outputs `[on_true, on_false]`: route the
    /// value to one output, blank on the other.
    Switch(Box<ConditionFn<C>>),
    /// Inputs `[control, on_true, on_false]`, output `[out]`: forward the
    /// input chosen by the control value.
    Select(Box<ConditionFn<C>>),
    /// Start a plugin task of the job with the clock's input values as
    /// arguments, passed as a `Vec<Value>`.
    Job(JobId),
}

impl<C: Config> Body<C> {
    /// Process body from a closure.
    pub fn process(
        f: impl Fn(Clock, &mut InputView<'_, C>, &mut Outputs<'_, C>) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::Process(Box::new(f))
    }

    /// Sink body from a closure.
    pub fn sink(
        f: impl Fn(Clock, &mut InputView<'_, C>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Sink(Box::new(f))
    }

    /// Switch body from a routing predicate.
    pub fn switch(condition: impl Fn(&Value<C>) -> bool + Send + Sync + 'static) -> Self {
        Self::Switch(Box::new(condition))
    }

    /// Select body from a routing predicate.
    pub fn select(condition: impl Fn(&Value<C>) -> bool + Send + Sync + 'static) -> Self {
        Self::Select(Box::new(condition))
    }

    /// Plugin job body.
    pub fn job(job: JobId) -> Self {
        Self::Job(job)
    }

    /// Short name of the body kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Sink(_) => "sink",
            Self::Switch(_) => "switch",
            Self::Select(_) => "select",
            Self::Job(_) => "job",
        }
    }

    /// Check the slot counts a node of this kind is declared with.
    ///
    /// # Errors
    /// If the counts are outside of what the kind supports.
    pub fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), NetworkError> {
        let valid = match self {
            Self::Process(_) => (1..=MAX_SLOTS).contains(&inputs) && (1..=MAX_SLOTS).contains(&outputs),
            Self::Sink(_) | Self::Job(_) => (1..=MAX_SLOTS).contains(&inputs) && outputs == 0,
            Self::Switch(_) => inputs == 2 && outputs == 2,
            Self::Select(_) => inputs == 3 && outputs == 1,
        };
        if valid {
            Ok(())
        } else {
            Err(NetworkError::Arity {
                kind: self.kind_name(),
                inputs,
                outputs,
            })
        }
    }
}

impl<C: Config> core::fmt::Debug for Body<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Job(job) => write!(f, "Job({job})"),
            body => f.write_str(body.kind_name()),
        }
    }
}

/// Claim state of a node: `queued_clock <= next_clock` at all times.
#[derive(Debug)]
struct Frontier {
    /// Smallest clock not yet claimed.
    next: CachePadded<AtomicU64>,
    /// Smallest clock not yet admitted to the scheduler.
    queued: CachePadded<AtomicU64>,
}

impl Frontier {
    fn new() -> Self {
        Self {
            next: CachePadded::new(AtomicU64::new(0)),
            queued: CachePadded::new(AtomicU64::new(0)),
        }
    }
}

/// Point-in-time copy of a node's frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrontierSnapshot {
    /// Smallest clock not yet claimed for execution.
    pub next_clock: Clock,
    /// Smallest clock not yet admitted to the scheduler.
    pub queued_clock: Clock,
}

/// A processing node: its input windows, its downstream targets, and the
/// clock advancer that admits ready clocks to the scheduler.
#[must_use]
#[derive(Debug)]
pub struct Node<C: Config> {
    id: NodeId,
    name: String,
    inputs: Inputs<C>,
    outputs: OutputPorts<C>,
    body: Body<C>,
    #[debug(skip)]
    listeners: Vec<Arc<dyn ClockListener>>,
    #[debug(skip)]
    scheduler: Arc<dyn Scheduler>,
    failures: Arc<FailureLog>,
    queue: QueueId,
    policy: Policy,
    execution: Execution,
    frontier: Frontier,
    ring: ActionRing,
    /// Per window index, one past the last clock claimed by a parallel node.
    claims: Box<[AtomicU64]>,
    state: AtomicU8,
}

impl<C: Config> Node<C> {
    /// Create an unconfigured node and register its queue with `scheduler`.
    ///
    /// # Errors
    /// If the slot counts don't fit the body kind.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        body: Body<C>,
        inputs: &[Kind<C>],
        outputs: &[Kind<C>],
        scheduler: Arc<dyn Scheduler>,
        options: NodeOptions,
    ) -> Result<Self, NetworkError> {
        body.check_arity(inputs.len(), outputs.len())?;
        let queue = scheduler.next_process_id();
        Ok(Self {
            id,
            name: name.into(),
            inputs: Inputs::new(inputs),
            outputs: OutputPorts::new(outputs),
            body,
            listeners: vec![],
            scheduler,
            failures: Arc::default(),
            queue,
            policy: options.policy.unwrap_or_default(),
            execution: options.execution.unwrap_or_default(),
            frontier: Frontier::new(),
            ring: ActionRing::default(),
            claims: Box::default(),
            state: AtomicU8::new(NodeState::Unconfigured as u8),
        })
    }

    /// Set the pipeline depth, dropping every pending input and resetting the
    /// frontier. A depth of 0 leaves the node unconfigured.
    pub fn set_slices(&mut self, slices: usize) {
        self.inputs.set_slices(slices);
        self.ring = ActionRing::new(slices);
        self.claims = (0..slices).map(|_| AtomicU64::new(0)).collect();
        self.frontier = Frontier::new();
        let state = if slices == 0 {
            NodeState::Unconfigured
        } else {
            NodeState::Configured
        };
        self.state = AtomicU8::new(state as u8);
    }

    /// Register a listener, called after every listener registered before.
    pub fn observe(&mut self, listener: Arc<dyn ClockListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn connect_output(&mut self, slot: usize, node: Arc<Self>, input: usize) {
        self.outputs.attach(slot, Target { node, slot: input });
    }

    pub(crate) fn mark_input_connected(&mut self, slot: usize) -> bool {
        self.inputs.mark_connected(slot)
    }

    pub(crate) fn with_failure_log(&mut self, failures: Arc<FailureLog>) {
        self.failures = failures;
    }

    /// Write `value` (`None` for blank) into input `slot` at `clock`, and
    /// notify the node if the write made `clock` ready.
    ///
    /// This is the only way values travel between nodes.
    pub fn deliver(self: &Arc<Self>, slot: usize, clock: Clock, value: Option<Value<C>>) {
        if self.inputs.write(slot, clock, value) {
            self.on_clock(clock);
        }
    }

    /// Write an input without notifying the node.
    ///
    /// Returns `true` if the write completed the arrivals of `clock`.
    pub fn write_input(&self, slot: usize, clock: Clock, value: Option<Value<C>>) -> bool {
        self.inputs.write(slot, clock, value)
    }

    /// Whether every input and output slot is wired.
    #[must_use]
    pub fn is_fully_connected(&self) -> bool {
        self.inputs.is_fully_connected() && self.outputs.first_unconnected().is_none()
    }

    /// Current frontier.
    #[must_use]
    pub fn frontier(&self) -> FrontierSnapshot {
        let queued_clock = self.frontier.queued.load(Ordering::Acquire);
        let next_clock = self.frontier.next.load(Ordering::Acquire);
        FrontierSnapshot {
            next_clock,
            queued_clock,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Node identifier.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduler queue of the node.
    #[must_use]
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Execution mode.
    #[must_use]
    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Input ports.
    pub fn inputs(&self) -> &Inputs<C> {
        &self.inputs
    }

    /// Failures recorded by this node, shared with the owning network.
    #[must_use]
    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// Ignore every later clock notification. Actions already submitted
    /// still run.
    pub fn stop(&self) {
        self.state.store(NodeState::Stopped as u8, Ordering::Release);
    }
}
