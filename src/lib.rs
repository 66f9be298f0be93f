//! Clock-synchronised dataflow networks on a multicore task scheduler.
//!
//! A network is a static graph of typed nodes driven by a logical clock. Each
//! tick pushes one value, or a blank, through every path of the graph, and up
//! to `slices` ticks are in flight at once. The crate:
//! - Validates the graph once (arity, port kinds, connectivity, cycles) and
//!   freezes it.
//! - Admits the ready clocks of every node to the scheduler with a lock-free
//!   two-counter frontier, so that one node's clocks are submitted exactly
//!   once each, in clock order, whichever threads delivered its inputs.
//! - Bounds the clocks in flight network-wide, which lets every node reuse a
//!   fixed ring of action records and input windows without allocating per
//!   tick.
//!
//! Key modules:
//! - `config`: binds the value type of a network via the `Config` trait and
//!   holds the network-wide defaults.
//! - `network`: `NetworkBuilder` to assemble and validate a graph, `Network`
//!   to drive the clock.
//! - `node`: the per-node clock advancer and the execution of each node kind.
//! - `scheduler`: the `Scheduler` adapter trait, a rayon-backed adapter and
//!   an inline one.
//! - `plugin`: registry of plugin actions running jobs off the local pool.
//!
//! Quick start:
//! 1. Implement `PortValue` for your value enum and `Config` binding it.
//! 2. Add sources and nodes to a `NetworkBuilder`, then `connect` their
//!    ports.
//! 3. `build` the network and `run` it for a number of clocks.
//!
//! A blank marks a clock on which a branch intentionally produced nothing.
//! Nodes skip their computation on blank inputs but still retire the clock,
//! so that every downstream node stays aligned on the same tick.

/// Scheduler-facing task bindings.
///
/// An `Action` binds a node to a clock; nodes keep a fixed ring of them, one
/// per in-flight clock.
pub mod action;
/// Public interface to configure a network.
///
/// Exposes the `Config` trait binding the value type flowing through ports,
/// and `NetworkConfig` with the pipeline depth and scheduling defaults.
pub mod config;
/// Per-clock failure reporting.
pub mod failure;
/// Input windows of a node and the per-clock view handed to node bodies.
pub mod inputs;
/// The `ClockListener` callback observing clock retirement.
pub mod listener;
/// Graph assembly, validation and clock driving.
///
/// Contains the topological validation of the graph and the network-level
/// backpressure bounding the number of clocks in flight.
pub mod network;
/// Processing nodes.
///
/// Contains the lock-free clock advancer admitting ready clocks to the
/// scheduler, and the execution of every node kind.
pub mod node;
/// Output fan-out of a node and the per-clock output buffer.
pub mod outputs;
/// Plugin actions running jobs on remote or accelerator devices.
pub mod plugin;
/// The scheduler adapter trait and its implementations.
pub mod scheduler;
mod sync;
/// Core types used across the crate (clocks, ids, ports, cell wrapper).
pub mod types;
mod utils;
mod value_pool;
