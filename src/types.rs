use crate::{
    config::{Config, PortValue},
    sync::UnsafeCell,
};
use derive_more::{Deref, DerefMut, Display};
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Sync`.
///
/// Used for input window entries and action ring slots. Correctness is ensured
/// by the clock protocol: a window entry for clock `c` has exactly one writer
/// (the upstream producer of `c`) and one reader (the execution of `c`), and
/// the two are ordered through the entry's stamp.
#[derive(Debug, Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

/// Logical clock: index of one tick of the network. Clock 0 is the first tick.
pub type Clock = u64;

/// Maximum number of input slots, and of output slots, on a single node.
pub const MAX_SLOTS: usize = 5;

/// Identifier of a node (source or not) inside one network.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("node#{_0}")]
#[repr(transparent)]
pub struct NodeId(pub(crate) u16);

impl NodeId {
    /// Construct an identifier from its raw index.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw index of the node.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Address output slot `index` of this node.
    #[must_use]
    pub const fn output(self, index: usize) -> OutPort {
        OutPort { node: self, index }
    }

    /// Address input slot `index` of this node.
    #[must_use]
    pub const fn input(self, index: usize) -> InPort {
        InPort { node: self, index }
    }
}

/// An output slot of a node, the upstream end of an edge.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("{node}.out[{index}]")]
pub struct OutPort {
    /// Owning node.
    pub node: NodeId,
    /// Slot index.
    pub index: usize,
}

/// An input slot of a node, the downstream end of an edge.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("{node}.in[{index}]")]
pub struct InPort {
    /// Owning node.
    pub node: NodeId,
    /// Slot index.
    pub index: usize,
}

/// Queue identifier issued by a scheduler, one per serial node.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("queue#{_0}")]
#[repr(transparent)]
pub struct QueueId(u32);

impl QueueId {
    /// Construct a queue identifier. Only schedulers should need this.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value of the identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Value type flowing through a network bound to a specific `Config`.
pub type Value<C> = <C as Config>::Value;
/// Port kind of the value type of a specific `Config`.
pub type Kind<C> = <Value<C> as PortValue>::Kind;

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
pub(crate) type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
