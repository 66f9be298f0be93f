use crate::{
    action::Runnable,
    config::Config,
    failure::FailureReason,
    inputs::InputView,
    node::{Body, Node},
    outputs::Outputs,
    types::{Clock, NodeId, Value},
};
use tracing::{error, trace, warn};

/// Switch and select slots.
const CONTROL: usize = 0;
const SWITCH_VALUE: usize = 1;
const ON_TRUE: usize = 0;
const ON_FALSE: usize = 1;
const SELECT_ON_TRUE: usize = 1;
const SELECT_ON_FALSE: usize = 2;

impl<C: Config> Runnable for Node<C> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn bound_clock(&self, slot: usize) -> Clock {
        // SAFETY: a record is rebound only once its clock retired, and the
        // action naming it runs before that.
        unsafe { self.ring.clock(slot) }
    }

    fn run(&self, slot: usize) {
        self.retire(self.bound_clock(slot), false);
    }
}

impl<C: Config> Node<C> {
    /// Execute `clock` and retire it.
    ///
    /// With `skip` the body is not invoked and every output is blank. Either
    /// way the inputs of `clock` are released first, then the outputs are
    /// delivered, then every listener is notified.
    pub(crate) fn retire(&self, clock: Clock, skip: bool) {
        let mut outputs = Outputs::new(self.outputs.kinds());
        let mut view = self.inputs.view(clock);
        if !skip {
            let none_blank = self.inputs.is_none_blank_at(clock);
            self.execute(clock, none_blank, &mut view, &mut outputs);
        }
        drop(view);
        self.outputs.deliver(clock, outputs);
        for listener in &self.listeners {
            listener.on_clock(clock);
        }
    }

    fn execute(
        &self,
        clock: Clock,
        none_blank: bool,
        view: &mut InputView<'_, C>,
        outputs: &mut Outputs<'_, C>,
    ) {
        match &self.body {
            Body::Process(f) => {
                if none_blank {
                    let result = f(clock, &mut *view, &mut *outputs);
                    self.check(clock, result, outputs);
                }
            }
            Body::Sink(f) => {
                if none_blank {
                    let result = f(clock, &mut *view);
                    self.check(clock, result, outputs);
                }
            }
            Body::Switch(condition) => {
                let route = view.get(CONTROL).map(|control| condition(control));
                if let (Some(on_true), Some(value)) = (route, view.take(SWITCH_VALUE)) {
                    outputs.send(if on_true { ON_TRUE } else { ON_FALSE }, value);
                }
            }
            Body::Select(condition) => {
                let route = view.get(CONTROL).map(|control| condition(control));
                let chosen = match route {
                    Some(true) => view.take(SELECT_ON_TRUE),
                    Some(false) => view.take(SELECT_ON_FALSE),
                    None => None,
                };
                if let Some(value) = chosen {
                    outputs.send(0, value);
                }
            }
            Body::Job(job) => {
                if none_blank {
                    let arguments: Vec<Value<C>> =
                        (0..view.len()).filter_map(|slot| view.take(slot)).collect();
                    match self.scheduler.start_job(*job, clock, Box::new(arguments)) {
                        Ok(task) => trace!(node = %self.id, clock, task = task.id(), "job started"),
                        Err(error) => {
                            warn!(node = %self.id, clock, %error, "job failed to start");
                            self.failures
                                .record(self.id, clock, FailureReason::Plugin(error));
                        }
                    }
                }
            }
        }
    }

    /// Turn a failed computation into blank outputs and a recorded failure.
    fn check(&self, clock: Clock, result: anyhow::Result<()>, outputs: &mut Outputs<'_, C>) {
        if let Err(cause) = result {
            error!(node = %self.id, clock, error = %format_args!("{cause:#}"), "computation failed");
            outputs.clear();
            self.failures.record(
                self.id,
                clock,
                FailureReason::Computation(format!("{cause:#}")),
            );
        }
    }
}
