use crate::{
    action::Action,
    plugin::PluginRegistry,
    scheduler::{Policy, ScheduleError, Scheduler},
    types::QueueId,
};
use core::sync::atomic::{AtomicU32, Ordering};

/// Scheduler running every action synchronously on the submitting thread.
///
/// Per-queue FIFO holds trivially. Useful for deterministic tests and for
/// debugging a graph without worker threads.
#[derive(Debug, Default)]
pub struct InlineScheduler {
    next_queue: AtomicU32,
    plugins: PluginRegistry,
}

impl InlineScheduler {
    /// Inline scheduler with an empty plugin registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inline scheduler using `plugins` for job execution.
    #[must_use]
    pub fn with_plugins(plugins: PluginRegistry) -> Self {
        Self {
            next_queue: AtomicU32::new(0),
            plugins,
        }
    }
}

impl Scheduler for InlineScheduler {
    fn next_process_id(&self) -> QueueId {
        QueueId::new(self.next_queue.fetch_add(1, Ordering::Relaxed))
    }

    fn enqueue(&self, queue: QueueId, action: Action, _policy: Policy) -> Result<(), ScheduleError> {
        if queue.get() >= self.next_queue.load(Ordering::Relaxed) {
            return Err(ScheduleError::UnknownQueue(queue));
        }
        action.run();
        Ok(())
    }

    fn spawn(&self, action: Action, _policy: Policy) -> Result<(), ScheduleError> {
        action.run();
        Ok(())
    }

    fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }
}
