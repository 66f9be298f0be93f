#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use cdf::{
    failure::FailureReason,
    listener::ClockListener,
    node::{Body, Execution, FrontierSnapshot, Node, NodeOptions, NodeState},
    network::NetworkError,
    scheduler::InlineScheduler,
    types::{Clock, NodeId},
};
use common::{Event, Mode, RecordingScheduler, TestConfig, Val, ValKind, init_tracing};
use proptest::prelude::*;
use std::{
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

#[derive(Default)]
struct Retired(Mutex<Vec<Clock>>);

impl ClockListener for Retired {
    fn on_clock(&self, clock: Clock) {
        self.0.lock().unwrap().push(clock);
    }
}

impl Retired {
    fn clocks(&self) -> Vec<Clock> {
        self.0.lock().unwrap().clone()
    }
}

fn sink_node(
    slots: usize,
    slices: usize,
    scheduler: Arc<RecordingScheduler>,
    options: NodeOptions,
) -> Arc<Node<TestConfig>> {
    let mut node = Node::new(
        NodeId::new(0),
        "sink",
        Body::sink(|_, _| Ok(())),
        &vec![ValKind::Int; slots],
        &[],
        scheduler,
        options,
    )
    .unwrap();
    node.set_slices(slices);
    Arc::new(node)
}

fn frontier_ok(snapshot: FrontierSnapshot) -> bool {
    snapshot.queued_clock <= snapshot.next_clock
}

#[test]
fn two_slots_submit_in_order_once_second_slot_arrives() {
    init_tracing();
    let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold));
    let node = sink_node(2, 4, scheduler.clone(), NodeOptions::default());

    for clock in 0..4 {
        node.deliver(0, clock, Some(Val::Int(clock as i64)));
    }
    assert!(scheduler.submitted().is_empty());
    assert_eq!(node.frontier().next_clock, 0);

    for clock in 0..4 {
        node.deliver(1, clock, Some(Val::Int(-(clock as i64))));
    }
    assert_eq!(scheduler.submitted(), [0, 1, 2, 3]);
    assert_eq!(
        node.frontier(),
        FrontierSnapshot {
            next_clock: 4,
            queued_clock: 4
        }
    );
    assert_eq!(scheduler.run_all(), 4);
    assert_eq!(node.state(), NodeState::Running);
}

#[test]
fn depth_one_serializes_admission() {
    init_tracing();
    let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold).with_delay(Duration::from_millis(50)));
    let node = sink_node(1, 1, scheduler.clone(), NodeOptions::default());

    let writer = {
        let node = node.clone();
        thread::spawn(move || node.deliver(0, 0, Some(Val::Int(0))))
    };
    // Wait until clock 0 is inside `enqueue`.
    while scheduler.events().is_empty() {
        thread::yield_now();
    }
    let during = node.frontier();
    assert_eq!(during.next_clock, 1);
    assert_eq!(during.queued_clock, 0);
    writer.join().unwrap();
    assert_eq!(node.frontier().queued_clock, 1);

    // Clock 1 reuses the single window entry once clock 0 retired.
    assert_eq!(scheduler.run_all(), 1);
    node.deliver(0, 1, Some(Val::Int(1)));
    assert_eq!(
        scheduler.events(),
        [Event::Enter(0), Event::Exit(0), Event::Enter(1), Event::Exit(1)]
    );
    assert_eq!(scheduler.submitted(), [0, 1]);
}

#[test]
fn next_clock_waits_for_the_delayed_enqueue() {
    init_tracing();
    let scheduler =
        Arc::new(RecordingScheduler::new(Mode::Hold).with_delay(Duration::from_millis(100)));
    let node = sink_node(1, 2, scheduler.clone(), NodeOptions::default());

    let first = {
        let node = node.clone();
        thread::spawn(move || node.deliver(0, 0, Some(Val::Int(0))))
    };
    while scheduler.events().is_empty() {
        thread::yield_now();
    }
    let second = {
        let node = node.clone();
        thread::spawn(move || {
            assert!(node.write_input(0, 1, Some(Val::Int(1))));
            node.on_clock(1);
        })
    };
    // Clock 1 is claimed while clock 0 is still inside `enqueue`.
    while node.frontier().next_clock < 2 {
        thread::yield_now();
    }
    assert_eq!(node.frontier().queued_clock, 0);
    assert_eq!(scheduler.events(), [Event::Enter(0)]);

    first.join().unwrap();
    second.join().unwrap();
    assert_eq!(
        scheduler.events(),
        [Event::Enter(0), Event::Exit(0), Event::Enter(1), Event::Exit(1)]
    );
    assert_eq!(scheduler.submitted(), [0, 1]);
    assert_eq!(node.frontier().queued_clock, 2);
    assert_eq!(scheduler.run_all(), 2);
}

#[test]
fn retired_nodes_are_freed_when_dropped() {
    let scheduler = Arc::new(RecordingScheduler::new(Mode::Run));
    let node = sink_node(1, 2, scheduler.clone(), NodeOptions::default());
    for clock in 0..5 {
        node.deliver(0, clock, Some(Val::Int(clock as i64)));
    }
    assert_eq!(scheduler.submitted(), [0, 1, 2, 3, 4]);
    let weak = Arc::downgrade(&node);
    drop(node);
    assert!(weak.upgrade().is_none());

    let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold));
    let node = sink_node(1, 2, scheduler.clone(), NodeOptions::default());
    node.deliver(0, 0, Some(Val::Int(0)));
    let weak = Arc::downgrade(&node);
    drop(node);
    // The held action keeps the node alive until it runs.
    assert!(weak.upgrade().is_some());
    assert_eq!(scheduler.run_all(), 1);
    assert!(weak.upgrade().is_none());
}

#[test]
fn racing_notifications_submit_once() {
    for _ in 0..200 {
        let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold));
        let node = sink_node(2, 2, scheduler.clone(), NodeOptions::default());
        assert!(!node.write_input(0, 0, Some(Val::Int(1))));
        assert!(node.write_input(1, 0, Some(Val::Int(2))));

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let node = node.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    node.on_clock(0);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(scheduler.submitted(), [0]);
        assert!(frontier_ok(node.frontier()));
        scheduler.run_all();
    }
}

#[test]
fn blank_input_skips_body_but_notifies_listener() {
    init_tracing();
    let invocations = Arc::new(AtomicUsize::new(0));
    let retired = Arc::new(Retired::default());
    let mut node = {
        let invocations = invocations.clone();
        Node::<TestConfig>::new(
            NodeId::new(0),
            "counter",
            Body::sink(move |_, _| {
                invocations.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            &[ValKind::Int],
            &[],
            Arc::new(InlineScheduler::new()),
            NodeOptions::default(),
        )
        .unwrap()
    };
    node.set_slices(3);
    node.observe(retired.clone());
    let node = Arc::new(node);

    for clock in 0..9 {
        let value = (clock != 5).then_some(Val::Int(clock as i64));
        node.deliver(0, clock, value);
    }
    assert_eq!(retired.clocks(), (0..9).collect::<Vec<_>>());
    assert_eq!(invocations.load(Ordering::Relaxed), 8);
}

#[test]
fn rejected_submission_retires_blank_and_frontier_advances() {
    init_tracing();
    let scheduler = Arc::new(RecordingScheduler::new(Mode::Run).rejecting([2]));
    let invocations = Arc::new(Mutex::new(vec![]));
    let retired = Arc::new(Retired::default());
    let mut node = {
        let invocations = invocations.clone();
        Node::<TestConfig>::new(
            NodeId::new(7),
            "picky",
            Body::sink(move |clock, _| {
                invocations.lock().unwrap().push(clock);
                Ok(())
            }),
            &[ValKind::Int],
            &[],
            scheduler.clone(),
            NodeOptions::default(),
        )
        .unwrap()
    };
    node.set_slices(4);
    node.observe(retired.clone());
    let node = Arc::new(node);

    for clock in 0..4 {
        node.deliver(0, clock, Some(Val::Int(clock as i64)));
    }
    assert_eq!(scheduler.submitted(), [0, 1, 3]);
    assert_eq!(*invocations.lock().unwrap(), [0, 1, 3]);
    assert_eq!(retired.clocks(), [0, 1, 2, 3]);
    assert_eq!(node.frontier().queued_clock, 4);

    let failures = node.failures().drain();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, NodeId::new(7));
    assert_eq!(failures[0].clock, 2);
    assert!(matches!(failures[0].reason, FailureReason::Rejected(_)));
}

#[test]
fn parallel_node_spawns_every_clock_once() {
    let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold));
    let node = sink_node(
        1,
        4,
        scheduler.clone(),
        NodeOptions::default().with_execution(Execution::Parallel),
    );
    for clock in [2, 0, 3, 1] {
        node.deliver(0, clock, Some(Val::Int(0)));
    }
    node.on_clock(2);
    node.on_clock(3);
    let mut spawned = scheduler.submitted();
    spawned.sort_unstable();
    assert_eq!(spawned, [0, 1, 2, 3]);
    // Parallel nodes bypass the frontier.
    assert_eq!(node.frontier().next_clock, 0);
    scheduler.run_all();
}

#[test]
fn lifecycle_states() {
    let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold));
    let mut node = Node::<TestConfig>::new(
        NodeId::new(0),
        "idle",
        Body::sink(|_, _| Ok(())),
        &[ValKind::Int],
        &[],
        scheduler.clone(),
        NodeOptions::default(),
    )
    .unwrap();
    assert_eq!(node.state(), NodeState::Unconfigured);
    node.set_slices(2);
    assert_eq!(node.state(), NodeState::Configured);
    let node = Arc::new(node);
    node.on_clock(0);
    assert_eq!(node.state(), NodeState::Running);
    assert!(scheduler.submitted().is_empty());

    node.deliver(0, 0, Some(Val::Int(1)));
    assert_eq!(scheduler.run_all(), 1);
    node.stop();
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(node.write_input(0, 1, Some(Val::Int(2))));
    node.on_clock(1);
    assert_eq!(scheduler.submitted(), [0]);
}

#[test]
fn node_rejects_unsupported_arity() {
    let scheduler = Arc::new(InlineScheduler::new());
    let switch = Node::<TestConfig>::new(
        NodeId::new(0),
        "switch",
        Body::switch(Val::flag),
        &[ValKind::Flag, ValKind::Int, ValKind::Int],
        &[ValKind::Int, ValKind::Int],
        scheduler.clone(),
        NodeOptions::default(),
    );
    assert_eq!(
        switch.unwrap_err(),
        NetworkError::Arity {
            kind: "switch",
            inputs: 3,
            outputs: 2
        }
    );
    let process = Node::<TestConfig>::new(
        NodeId::new(1),
        "wide",
        Body::process(|_, _, _| Ok(())),
        &[ValKind::Int; 6],
        &[ValKind::Int],
        scheduler,
        NodeOptions::default(),
    );
    assert!(matches!(process, Err(NetworkError::Arity { inputs: 6, .. })));
}

proptest! {
    #[test]
    fn any_delivery_order_submits_each_clock_once_in_order(
        order in (1usize..=3, 1usize..=6).prop_flat_map(|(slots, slices)| {
            let writes: Vec<(usize, Clock)> = (0..slots)
                .flat_map(|slot| (0..slices as Clock).map(move |clock| (slot, clock)))
                .collect();
            (Just(slots), Just(slices), Just(writes).prop_shuffle())
        })
    ) {
        let (slots, slices, writes) = order;
        let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold));
        let node = sink_node(slots, slices, scheduler.clone(), NodeOptions::default());
        let mut previous = node.frontier();
        for (slot, clock) in writes {
            node.deliver(slot, clock, Some(Val::Int(0)));
            let current = node.frontier();
            prop_assert!(frontier_ok(current));
            prop_assert!(current.next_clock >= previous.next_clock);
            prop_assert!(current.queued_clock >= previous.queued_clock);
            previous = current;
        }
        prop_assert_eq!(scheduler.submitted(), (0..slices as Clock).collect::<Vec<_>>());
        scheduler.run_all();
    }

    #[test]
    fn concurrent_writers_submit_each_clock_once_in_order(
        permutations in (1usize..=4).prop_flat_map(|slices| {
            let clocks: Vec<Clock> = (0..slices as Clock).collect();
            (
                Just(slices),
                Just(clocks.clone()).prop_shuffle(),
                Just(clocks).prop_shuffle(),
            )
        })
    ) {
        let (slices, first, second) = permutations;
        let scheduler = Arc::new(RecordingScheduler::new(Mode::Hold));
        let node = sink_node(2, slices, scheduler.clone(), NodeOptions::default());
        thread::scope(|scope| {
            for (slot, clocks) in [(0, &first), (1, &second)] {
                let node = &node;
                scope.spawn(move || {
                    for &clock in clocks {
                        node.deliver(slot, clock, Some(Val::Int(0)));
                    }
                });
            }
        });
        prop_assert_eq!(scheduler.submitted(), (0..slices as Clock).collect::<Vec<_>>());
        prop_assert_eq!(
            node.frontier(),
            FrontierSnapshot { next_clock: slices as Clock, queued_clock: slices as Clock }
        );
        scheduler.run_all();
    }
}
