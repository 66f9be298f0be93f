//! Plugin actions: jobs executed outside the local worker pool.
//!
//! A provider implements [`PluginAction`] to run tasks of a job on a remote
//! node or an accelerator. Providers are registered per domain-wide
//! [`JobId`]; several providers may implement the same job, in which case
//! tasks are distributed among them round-robin.

use crate::{
    types::{Clock, HashMap},
    value_pool::ValuePool,
};
use core::{
    any::Any,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};
use derive_more::{Debug, Display};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Error outcomes of plugin registration and plugin callbacks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PluginError {
    /// The job id is out of range, or no action implements it.
    #[error("{0} is not a valid job")]
    JobInvalid(JobId),
    /// This provider is already registered for the job.
    #[error("an action already exists for {0}")]
    ActionExists(JobId),
    /// The maximum number of registered actions is reached.
    #[error("exceeded the maximum number of plugin actions ({0})")]
    ActionLimit(usize),
    /// The registry is not initialized, or was finalized.
    #[error("plugin registry is not initialized")]
    NodeNotInit,
    /// The handle does not refer to a registered action.
    #[error("{0} is not a registered action")]
    ActionInvalid(ActionHandle),
    /// A provider callback reported a failure.
    #[error("plugin callback failed: {0}")]
    Failed(String),
}

impl PluginError {
    /// Failure reported by a provider callback.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Domain-wide job identifier.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("job#{_0}")]
pub struct JobId(pub u32);

/// Node-local handle of a registered plugin action.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("action#{value}")]
pub struct ActionHandle {
    value: u32,
    index: usize,
}

/// Handle of a started plugin task.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("task#{id}({job}, clock {clock})")]
pub struct TaskHandle {
    id: u64,
    job: JobId,
    action: ActionHandle,
    clock: Clock,
}

impl TaskHandle {
    /// Unique task number within the registry.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Job being executed.
    #[must_use]
    pub fn job(&self) -> JobId {
        self.job
    }

    /// Action (provider) executing the task.
    #[must_use]
    pub fn action(&self) -> ActionHandle {
        self.action
    }

    /// Clock the task belongs to.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }
}

/// Block of data shared by the action functions running on this node.
///
/// The declared size lets runtimes perform cache-coherency operations.
#[derive(Debug, Clone)]
pub struct NodeLocalData(Arc<[u8]>);

impl NodeLocalData {
    /// Wrap `bytes` as node-local data.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Declared size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Shared bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A task handed to a plugin provider.
#[derive(Debug)]
pub struct PluginTask {
    handle: TaskHandle,
    #[debug(skip)]
    arguments: Box<dyn Any + Send>,
    local_data: Option<NodeLocalData>,
}

impl PluginTask {
    /// Handle of this task, e.g. to cancel it.
    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// Clock the task belongs to.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.handle.clock
    }

    /// Arguments of the task, if they have type `T`.
    #[must_use]
    pub fn arguments<T: Any>(&self) -> Option<&T> {
        self.arguments.downcast_ref()
    }

    /// Take ownership of the arguments, if they have type `T`.
    ///
    /// # Errors
    /// Gives the task back if the arguments have another type.
    pub fn into_arguments<T: Any>(self) -> Result<Box<T>, Self> {
        let Self {
            handle,
            arguments,
            local_data,
        } = self;
        arguments.downcast().map_err(|arguments| Self {
            handle,
            arguments,
            local_data,
        })
    }

    /// Node-local data registered with the executing action.
    #[must_use]
    pub fn local_data(&self) -> Option<&NodeLocalData> {
        self.local_data.as_ref()
    }
}

/// Provider of a plugin action. The implementing value is the opaque plugin
/// data.
pub trait PluginAction: Send + Sync {
    /// Start `task`.
    ///
    /// # Errors
    /// If the task could not be started.
    fn start(&self, task: PluginTask) -> Result<(), PluginError>;

    /// Cancel a task previously started by this provider.
    ///
    /// # Errors
    /// If the task could not be canceled.
    fn cancel(&self, task: &TaskHandle) -> Result<(), PluginError>;

    /// Release the provider; called once when its action is deleted.
    ///
    /// # Errors
    /// If the action could not be finalized.
    fn finalize(&self) -> Result<(), PluginError>;
}

/// Bounds of a plugin registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginLimits {
    /// Job ids must be below this value.
    pub max_jobs: u32,
    /// Maximum number of simultaneously registered actions.
    pub max_actions: u32,
}

impl Default for PluginLimits {
    fn default() -> Self {
        Self {
            max_jobs: 256,
            max_actions: 64,
        }
    }
}

#[derive(Debug)]
struct Registered {
    job: JobId,
    #[debug(skip)]
    action: Arc<dyn PluginAction>,
    local_data: Option<NodeLocalData>,
}

#[derive(Debug, Default)]
struct Registrations {
    actions: HashMap<ActionHandle, Registered>,
    jobs: HashMap<JobId, Vec<ActionHandle>>,
}

/// Registry of plugin actions, owned by a scheduler.
#[derive(Debug)]
pub struct PluginRegistry {
    limits: PluginLimits,
    initialized: AtomicBool,
    handles: ValuePool,
    registrations: RwLock<Registrations>,
    cursor: AtomicUsize,
    next_task: AtomicU64,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(PluginLimits::default())
    }
}

impl PluginRegistry {
    /// Create an initialized registry.
    #[must_use]
    pub fn new(limits: PluginLimits) -> Self {
        Self {
            limits,
            initialized: AtomicBool::new(true),
            handles: ValuePool::new(0..limits.max_actions),
            registrations: RwLock::default(),
            cursor: AtomicUsize::new(0),
            next_task: AtomicU64::new(0),
        }
    }

    /// Limits the registry was created with.
    #[must_use]
    pub fn limits(&self) -> PluginLimits {
        self.limits
    }

    fn ensure_initialized(&self) -> Result<(), PluginError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PluginError::NodeNotInit)
        }
    }

    /// Register `action` as an implementation of `job`.
    ///
    /// # Errors
    /// - [`PluginError::NodeNotInit`] if the registry was finalized,
    /// - [`PluginError::JobInvalid`] if `job` is out of range,
    /// - [`PluginError::ActionExists`] if `action` already implements `job`,
    /// - [`PluginError::ActionLimit`] if no action handle is left.
    pub fn register(
        &self,
        job: JobId,
        action: Arc<dyn PluginAction>,
        local_data: Option<NodeLocalData>,
    ) -> Result<ActionHandle, PluginError> {
        self.ensure_initialized()?;
        if job.0 >= self.limits.max_jobs {
            return Err(PluginError::JobInvalid(job));
        }
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Registrations { actions, jobs } = &mut *registrations;
        let providers = jobs.entry(job).or_default();
        if providers
            .iter()
            .any(|handle| Arc::ptr_eq(&actions[handle].action, &action))
        {
            return Err(PluginError::ActionExists(job));
        }
        let (index, value) = self
            .handles
            .allocate()
            .ok_or(PluginError::ActionLimit(self.handles.capacity()))?;
        let handle = ActionHandle { value, index };
        providers.push(handle);
        actions.insert(
            handle,
            Registered {
                job,
                action,
                local_data,
            },
        );
        debug!(%job, %handle, providers = providers.len(), "registered plugin action");
        Ok(handle)
    }

    /// Unregister and finalize the action behind `handle`.
    ///
    /// # Errors
    /// If `handle` is unknown, or the provider fails to finalize. The handle is
    /// released in both cases.
    pub fn delete(&self, handle: ActionHandle) -> Result<(), PluginError> {
        let registered = {
            let mut registrations = self
                .registrations
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let registered = registrations
                .actions
                .remove(&handle)
                .ok_or(PluginError::ActionInvalid(handle))?;
            if let Some(providers) = registrations.jobs.get_mut(&registered.job) {
                providers.retain(|&other| other != handle);
            }
            registered
        };
        self.handles.free(handle.index, handle.value);
        registered.action.finalize()
    }

    /// Finalize every registered action and refuse further use.
    ///
    /// # Errors
    /// The first finalization failure; every provider is finalized anyway.
    pub fn finalize(&self) -> Result<(), PluginError> {
        self.initialized.store(false, Ordering::Release);
        let drained: Vec<_> = {
            let mut registrations = self
                .registrations
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            registrations.jobs.clear();
            registrations.actions.drain().collect()
        };
        let mut result = Ok(());
        for (handle, registered) in drained {
            self.handles.free(handle.index, handle.value);
            if let Err(error) = registered.action.finalize() {
                warn!(%handle, %error, "plugin action failed to finalize");
                result = result.and(Err(error));
            }
        }
        result
    }

    /// Number of providers currently implementing `job`.
    #[must_use]
    pub fn provider_count(&self, job: JobId) -> usize {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .get(&job)
            .map_or(0, Vec::len)
    }

    /// Start a task of `job` for `clock` on one of its providers.
    ///
    /// # Errors
    /// - [`PluginError::NodeNotInit`] if the registry was finalized,
    /// - [`PluginError::JobInvalid`] if no provider implements `job`,
    /// - the provider's failure if it could not start the task.
    pub fn start(
        &self,
        job: JobId,
        clock: Clock,
        arguments: Box<dyn Any + Send>,
    ) -> Result<TaskHandle, PluginError> {
        self.ensure_initialized()?;
        let (handle, action, local_data) = {
            let registrations = self
                .registrations
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let providers = registrations
                .jobs
                .get(&job)
                .filter(|providers| !providers.is_empty())
                .ok_or(PluginError::JobInvalid(job))?;
            let pick = self.cursor.fetch_add(1, Ordering::Relaxed) % providers.len();
            let action_handle = providers[pick];
            let registered = &registrations.actions[&action_handle];
            let handle = TaskHandle {
                id: self.next_task.fetch_add(1, Ordering::Relaxed),
                job,
                action: action_handle,
                clock,
            };
            (
                handle,
                registered.action.clone(),
                registered.local_data.clone(),
            )
        };
        action.start(PluginTask {
            handle,
            arguments,
            local_data,
        })?;
        Ok(handle)
    }

    /// Cancel a started task through the provider that runs it.
    ///
    /// # Errors
    /// If the provider is gone, or it fails to cancel the task.
    pub fn cancel(&self, task: &TaskHandle) -> Result<(), PluginError> {
        let action = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .actions
            .get(&task.action)
            .map(|registered| registered.action.clone())
            .ok_or(PluginError::ActionInvalid(task.action))?;
        action.cancel(task)
    }
}
