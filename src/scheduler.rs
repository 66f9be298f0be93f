mod inline;
mod threaded;

pub use crate::scheduler::{
    inline::InlineScheduler,
    threaded::{SchedulerConfig, ThreadPoolScheduler},
};
use crate::{
    action::Action,
    plugin::{JobId, PluginError, PluginRegistry, TaskHandle},
    types::{Clock, QueueId},
};
use core::any::Any;
use thiserror::Error;

/// Relative urgency of a node's tasks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Background work.
    Low,
    /// Regular work.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
}

/// Scheduling policy attached to every submission.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Policy {
    /// Task priority.
    pub priority: Priority,
}

impl Policy {
    /// Policy with the given priority.
    #[must_use]
    pub const fn with_priority(priority: Priority) -> Self {
        Self { priority }
    }
}

/// Failure to submit work to a scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScheduleError {
    /// The queue was not issued by this scheduler.
    #[error("{0} is not known to the scheduler")]
    UnknownQueue(QueueId),
    /// The scheduler no longer accepts work.
    #[error("scheduler is shut down")]
    ShutDown,
    /// The scheduler refused the submission.
    #[error("submission rejected: {0}")]
    Rejected(String),
    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    Pool(String),
    /// Plugin execution failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Adapter between nodes and the underlying multicore task scheduler.
///
/// Implementations must execute the actions submitted to one queue in
/// submission order, one at a time. Actions of different queues, and actions
/// submitted with `spawn`, carry no ordering guarantee.
pub trait Scheduler: Send + Sync {
    /// Issue a new queue identifier. Called once per node at construction.
    fn next_process_id(&self) -> QueueId;

    /// Submit `action` to `queue`.
    ///
    /// # Errors
    /// If the scheduler refuses the submission. The action is dropped.
    fn enqueue(&self, queue: QueueId, action: Action, policy: Policy) -> Result<(), ScheduleError>;

    /// Submit `action` with no ordering constraint.
    ///
    /// # Errors
    /// If the scheduler refuses the submission. The action is dropped.
    fn spawn(&self, action: Action, policy: Policy) -> Result<(), ScheduleError>;

    /// Plugin actions available to this scheduler.
    fn plugins(&self) -> &PluginRegistry;

    /// Start a task of `job` for `clock` on a registered plugin action.
    ///
    /// # Errors
    /// If no plugin implements `job`, or the plugin fails to start the task.
    fn start_job(
        &self,
        job: JobId,
        clock: Clock,
        arguments: Box<dyn Any + Send>,
    ) -> Result<TaskHandle, ScheduleError> {
        Ok(self.plugins().start(job, clock, arguments)?)
    }

    /// Cancel a plugin task.
    ///
    /// # Errors
    /// If the task's plugin is gone, or it fails to cancel the task.
    fn cancel_task(&self, task: &TaskHandle) -> Result<(), ScheduleError> {
        Ok(self.plugins().cancel(task)?)
    }
}
