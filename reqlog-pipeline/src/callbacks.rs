use crate::event::StepEvent;
use crate::system_log::Outcome;
use reqlog_core::error::Result;
use reqlog_core::sink::Step;

/// A callback run for every event of one step.
pub type Hook = Box<dyn Fn(&StepEvent) -> Result<Outcome> + Send + Sync>;

/// Where hosts let listeners attach to their request pipeline.
pub trait HookRegistrar {
    fn add(&mut self, step: Step, hook: Hook);
}

/// In-process callback bus.
///
/// Built at startup, then shared read-only; hooks run synchronously on the
/// caller's thread in registration order.
#[derive(Default)]
pub struct StepCallbacks {
    hooks: Vec<(Step, Hook)>,
}

impl StepCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every hook registered for the event's step, returning one result
    /// per hook. A failing hook does not stop the ones after it.
    pub fn invoke(&self, event: &StepEvent) -> Vec<Result<Outcome>> {
        let step = event.step();
        self.hooks
            .iter()
            .filter(|(s, _)| *s == step)
            .map(|(_, hook)| hook(event))
            .collect()
    }

    /// Number of hooks registered for `step`.
    pub fn count(&self, step: Step) -> usize {
        self.hooks.iter().filter(|(s, _)| *s == step).count()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl HookRegistrar for StepCallbacks {
    fn add(&mut self, step: Step, hook: Hook) {
        tracing::debug!(step = %step, "Hook registered");
        self.hooks.push((step, hook));
    }
}
