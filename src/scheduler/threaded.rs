use crate::{
    action::Action,
    plugin::PluginRegistry,
    scheduler::{Policy, Priority, ScheduleError, Scheduler},
    types::QueueId,
};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crossbeam::queue::SegQueue;
use derive_more::Debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Settings of a [`ThreadPoolScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads; `0` lets rayon pick one per core.
    pub num_threads: usize,
    /// Prefix of worker thread names.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            thread_name: "cdf-worker".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Set the number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}

/// FIFO of one serial node. At most one drainer runs per queue.
#[derive(Debug, Default)]
struct SerialQueue {
    #[debug(skip)]
    actions: SegQueue<Action>,
    /// Actions pushed but not yet executed.
    pending: AtomicUsize,
}

impl SerialQueue {
    /// Run actions in submission order until the queue is empty.
    fn drain(&self) {
        loop {
            let Some(action) = self.actions.pop() else {
                unreachable!("SerialQueue::drain: pending action missing");
            };
            action.run();
            if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                break;
            }
        }
    }
}

/// Scheduler running actions on a rayon worker pool.
///
/// Every queue is drained by at most one pool task at a time, which keeps the
/// actions of one queue in FIFO order. High priority queues are drained with
/// `spawn`, which favors the submitting worker; the rest with `spawn_fifo`.
#[derive(Debug)]
pub struct ThreadPoolScheduler {
    #[debug(skip)]
    pool: ThreadPool,
    queues: RwLock<Vec<Arc<SerialQueue>>>,
    closed: AtomicBool,
    plugins: PluginRegistry,
}

impl ThreadPoolScheduler {
    /// Create the worker pool.
    ///
    /// # Errors
    /// If the worker threads cannot be spawned.
    pub fn new(config: &SchedulerConfig) -> Result<Self, ScheduleError> {
        Self::with_plugins(config, PluginRegistry::default())
    }

    /// Create the worker pool, using `plugins` for job execution.
    ///
    /// # Errors
    /// If the worker threads cannot be spawned.
    pub fn with_plugins(
        config: &SchedulerConfig,
        plugins: PluginRegistry,
    ) -> Result<Self, ScheduleError> {
        let prefix = config.thread_name.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()
            .map_err(|error| ScheduleError::Pool(error.to_string()))?;
        debug!(threads = pool.current_num_threads(), "worker pool started");
        Ok(Self {
            pool,
            queues: RwLock::default(),
            closed: AtomicBool::new(false),
            plugins,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Refuse every later submission. Work already submitted still runs.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<(), ScheduleError> {
        if self.closed.load(Ordering::Acquire) {
            Err(ScheduleError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn queue(&self, queue: QueueId) -> Result<Arc<SerialQueue>, ScheduleError> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue.get() as usize)
            .cloned()
            .ok_or(ScheduleError::UnknownQueue(queue))
    }

    fn submit(&self, policy: Policy, job: impl FnOnce() + Send + 'static) {
        match policy.priority {
            Priority::High => self.pool.spawn(job),
            Priority::Normal | Priority::Low => self.pool.spawn_fifo(job),
        }
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn next_process_id(&self) -> QueueId {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        let id = u32::try_from(queues.len()).expect("ThreadPoolScheduler::next_process_id: [1]");
        queues.push(Arc::default());
        QueueId::new(id)
    }

    fn enqueue(&self, queue: QueueId, action: Action, policy: Policy) -> Result<(), ScheduleError> {
        self.ensure_open()?;
        let queue = self.queue(queue)?;
        queue.actions.push(action);
        if queue.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.submit(policy, move || queue.drain());
        }
        Ok(())
    }

    fn spawn(&self, action: Action, policy: Policy) -> Result<(), ScheduleError> {
        self.ensure_open()?;
        self.submit(policy, move || action.run());
        Ok(())
    }

    fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }
}
