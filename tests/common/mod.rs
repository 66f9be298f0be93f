#![allow(dead_code)]

use cdf::{
    action::Action,
    config::{Config, PortValue},
    plugin::PluginRegistry,
    scheduler::{Policy, ScheduleError, Scheduler},
    types::{Clock, QueueId},
};
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Int(i64),
    Flag(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValKind {
    Int,
    Flag,
}

impl PortValue for Val {
    type Kind = ValKind;

    fn kind(&self) -> ValKind {
        match self {
            Self::Int(_) => ValKind::Int,
            Self::Flag(_) => ValKind::Flag,
        }
    }
}

impl Val {
    pub fn int(&self) -> i64 {
        match self {
            Self::Int(value) => *value,
            Self::Flag(_) => panic!("expected an integer, got {self:?}"),
        }
    }

    pub fn flag(&self) -> bool {
        match self {
            Self::Flag(value) => *value,
            Self::Int(_) => panic!("expected a flag, got {self:?}"),
        }
    }
}

#[derive(Debug)]
pub struct TestConfig;

impl Config for TestConfig {
    type Value = Val;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `enqueue` or `spawn` was entered for the clock.
    Enter(Clock),
    /// The submission returned.
    Exit(Clock),
}

/// What a `RecordingScheduler` does with accepted actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Keep them until `run_all`.
    Hold,
    /// Run them on the submitting thread.
    Run,
}

/// Scheduler recording every submission.
pub struct RecordingScheduler {
    mode: Mode,
    delay: Option<Duration>,
    rejected: HashSet<Clock>,
    next_queue: AtomicU32,
    events: Mutex<Vec<Event>>,
    submitted: Mutex<Vec<(QueueId, Clock)>>,
    pending: Mutex<VecDeque<Action>>,
    plugins: PluginRegistry,
}

impl RecordingScheduler {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            delay: None,
            rejected: HashSet::new(),
            next_queue: AtomicU32::new(0),
            events: Mutex::default(),
            submitted: Mutex::default(),
            pending: Mutex::default(),
            plugins: PluginRegistry::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn rejecting(mut self, clocks: impl IntoIterator<Item = Clock>) -> Self {
        self.rejected.extend(clocks);
        self
    }

    /// Clocks of every accepted submission, in submission order.
    pub fn submitted(&self) -> Vec<Clock> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|&(_, clock)| clock)
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Run every held action in submission order. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(action) = self.pending.lock().unwrap().pop_front() else {
                return ran;
            };
            action.run();
            ran += 1;
        }
    }

    fn submit(&self, queue: QueueId, action: Action) -> Result<(), ScheduleError> {
        let clock = action.clock();
        self.events.lock().unwrap().push(Event::Enter(clock));
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let result = if self.rejected.contains(&clock) {
            Err(ScheduleError::Rejected(format!("clock {clock} refused")))
        } else {
            self.submitted.lock().unwrap().push((queue, clock));
            match self.mode {
                Mode::Hold => self.pending.lock().unwrap().push_back(action),
                Mode::Run => action.run(),
            }
            Ok(())
        };
        self.events.lock().unwrap().push(Event::Exit(clock));
        result
    }
}

impl Scheduler for RecordingScheduler {
    fn next_process_id(&self) -> QueueId {
        QueueId::new(self.next_queue.fetch_add(1, Ordering::Relaxed))
    }

    fn enqueue(&self, queue: QueueId, action: Action, _policy: Policy) -> Result<(), ScheduleError> {
        self.submit(queue, action)
    }

    fn spawn(&self, action: Action, _policy: Policy) -> Result<(), ScheduleError> {
        self.submit(QueueId::new(u32::MAX), action)
    }

    fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }
}
