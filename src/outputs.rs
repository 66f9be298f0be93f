use crate::{
    config::{Config, PortValue},
    node::Node,
    types::{Clock, Kind, MAX_SLOTS, Value},
};
use derive_more::Debug;
use std::sync::Arc;

/// Downstream end of an edge: input `slot` of `node`.
pub(crate) struct Target<C: Config> {
    pub(crate) node: Arc<Node<C>>,
    pub(crate) slot: usize,
}

impl<C: Config> core::fmt::Debug for Target<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.in[{}]", self.node.id(), self.slot)
    }
}

#[derive(Debug)]
struct OutputSlot<C: Config> {
    connected: bool,
    targets: Vec<Target<C>>,
}

/// Output ports of a node: per slot, the fan-out list of targets.
#[derive(Debug)]
pub(crate) struct OutputPorts<C: Config> {
    slots: Vec<OutputSlot<C>>,
    kinds: Vec<Kind<C>>,
}

impl<C: Config> OutputPorts<C> {
    pub(crate) fn new(kinds: &[Kind<C>]) -> Self {
        Self {
            slots: kinds
                .iter()
                .map(|_| OutputSlot {
                    connected: false,
                    targets: vec![],
                })
                .collect(),
            kinds: kinds.to_vec(),
        }
    }

    pub(crate) fn kinds(&self) -> &[Kind<C>] {
        &self.kinds
    }

    pub(crate) fn first_unconnected(&self) -> Option<usize> {
        self.slots.iter().position(|slot| !slot.connected)
    }

    pub(crate) fn attach(&mut self, slot: usize, target: Target<C>) {
        let slot = &mut self.slots[slot];
        slot.connected = true;
        slot.targets.push(target);
    }

    /// Deliver one clock's worth of outputs to every target.
    ///
    /// The last target of a slot receives the value by move, the others a
    /// clone.
    pub(crate) fn deliver(&self, clock: Clock, outputs: Outputs<'_, C>) {
        let Outputs { values, .. } = outputs;
        for (slot, value) in self.slots.iter().zip(values) {
            let Some((last, rest)) = slot.targets.split_last() else {
                continue;
            };
            for target in rest {
                target.node.deliver(target.slot, clock, value.clone());
            }
            last.node.deliver(last.slot, clock, value);
        }
    }
}

/// Output buffer of one clock, handed to node bodies.
///
/// Every slot starts blank. Slots left unsent when the body returns are
/// delivered downstream as blank, which keeps every consumer aligned on the
/// clock.
#[derive(Debug)]
pub struct Outputs<'a, C: Config> {
    kinds: &'a [Kind<C>],
    values: [Option<Value<C>>; MAX_SLOTS],
}

impl<'a, C: Config> Outputs<'a, C> {
    pub(crate) fn new(kinds: &'a [Kind<C>]) -> Self {
        Self {
            kinds,
            values: core::array::from_fn(|_| None),
        }
    }

    /// Number of output slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the node has no output slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Send `value` on output `slot` for the current clock.
    ///
    /// # Panics
    /// If `slot` does not exist.
    pub fn send(&mut self, slot: usize, value: Value<C>) {
        assert!(
            slot < self.kinds.len(),
            "Outputs::send: no output slot {slot} (node has {})",
            self.kinds.len()
        );
        debug_assert_eq!(
            value.kind(),
            self.kinds[slot],
            "Outputs::send: value kind does not match output slot {slot}"
        );
        self.values[slot] = Some(value);
    }

    /// Send the blank sentinel on output `slot`, discarding any value sent
    /// before.
    pub fn blank(&mut self, slot: usize) {
        assert!(
            slot < self.kinds.len(),
            "Outputs::blank: no output slot {slot} (node has {})",
            self.kinds.len()
        );
        self.values[slot] = None;
    }

    /// Set every output to blank.
    pub(crate) fn clear(&mut self) {
        self.values.iter_mut().for_each(|value| *value = None);
    }
}
