//! The listener that turns pipeline events into log records.
//!
//! Per event: resolve flags from the matching matrix, stop if `IGNORE` is
//! set, otherwise build the record and hand it to the sink. Terminal and file
//! sinks absorb their own write failures; database failures come back to the
//! caller as [`ReqlogError::Sink`].

use crate::callbacks::HookRegistrar;
use crate::event::{DispatchEvent, ErrorEvent, StepEvent};
use reqlog_core::builder::{Failure, RecordBuilder};
use reqlog_core::config::SystemLogConfig;
use reqlog_core::context::UserLookup;
use reqlog_core::error::{ReqlogError, Result};
use reqlog_core::flags::Flags;
use reqlog_core::matrix::RoutingMatrix;
use reqlog_core::record::{AdditionalParameters, LogRecord};
use reqlog_core::sink::{LogSink, Step, WriteOutcome};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resolved flags carried `IGNORE`; nothing was built or written.
    Ignored,
    Written(WriteOutcome),
}

pub struct SystemLog {
    dispatch_matrix: RoutingMatrix,
    exception_matrix: RoutingMatrix,
    builder: RecordBuilder,
    sink: Box<dyn LogSink>,
}

impl SystemLog {
    /// Build the configured sink and the two matrices.
    pub fn from_config(config: &SystemLogConfig) -> Result<Self> {
        let sink = reqlog_sink::build_sink(config)?;
        Ok(Self::new(config, sink))
    }

    /// Use an already-built sink; `config.log` is not consulted.
    pub fn new(config: &SystemLogConfig, sink: Box<dyn LogSink>) -> Self {
        let dispatch_matrix = config.dispatch_matrix();
        let exception_matrix = config.exception_matrix();
        info!(
            sink = sink.name(),
            dispatch_entries = dispatch_matrix.len(),
            exception_entries = exception_matrix.len(),
            "System log ready"
        );
        Self {
            dispatch_matrix,
            exception_matrix,
            builder: RecordBuilder::from_config(config),
            sink,
        }
    }

    pub fn with_user_lookup(mut self, users: Arc<dyn UserLookup>) -> Self {
        self.builder = self.builder.with_user_lookup(users);
        self
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Attach both hooks to `registrar`. `additional` is attached verbatim to
    /// every record produced by these hooks; it must be an object or an array.
    pub fn register(
        self: &Arc<Self>,
        registrar: &mut dyn HookRegistrar,
        additional: Option<Value>,
    ) -> Result<()> {
        let additional = AdditionalParameters::from_optional(additional)?;

        let this = Arc::clone(self);
        let extra = additional.clone();
        registrar.add(
            Step::AfterDispatch,
            Box::new(move |event: &StepEvent| match event {
                StepEvent::AfterDispatch(e) => this.after_dispatch(e, extra.as_ref()),
                StepEvent::Error(_) => Ok(Outcome::Ignored),
            }),
        );

        let this = Arc::clone(self);
        registrar.add(
            Step::Error,
            Box::new(move |event: &StepEvent| match event {
                StepEvent::Error(e) => this.on_error(e, additional.as_ref()),
                StepEvent::AfterDispatch(_) => Ok(Outcome::Ignored),
            }),
        );

        info!(sink = self.sink.name(), "System log registered");
        Ok(())
    }

    /// Post-dispatch hook body.
    pub fn after_dispatch(
        &self,
        event: &DispatchEvent,
        additional: Option<&AdditionalParameters>,
    ) -> Result<Outcome> {
        let flags = self.dispatch_matrix.resolve_dispatch(&event.handler, &event.action);
        if flags.is_ignored() {
            debug!(handler = %event.handler, action = %event.action, "Dispatch ignored");
            return Ok(Outcome::Ignored);
        }
        let record = self.builder.build(flags, &event.context, additional);
        self.write(Step::AfterDispatch, &record)
    }

    /// Error hook body.
    pub fn on_error(&self, event: &ErrorEvent, additional: Option<&AdditionalParameters>) -> Result<Outcome> {
        let flags = self.exception_matrix.resolve(&event.exception.type_name);
        if flags.is_ignored() {
            debug!(exception = %event.exception.type_name, "Exception ignored");
            return Ok(Outcome::Ignored);
        }
        let failure = Failure {
            exception: &event.exception,
            errors: event.errors.as_ref(),
            status_code: event.status_code,
        };
        let record = self.builder.build_error(flags, &event.context, failure, additional);
        self.write(Step::Error, &record)
    }

    /// Dispatch an event to the matching hook body.
    pub fn handle(&self, event: &StepEvent, additional: Option<&AdditionalParameters>) -> Result<Outcome> {
        match event {
            StepEvent::AfterDispatch(e) => self.after_dispatch(e, additional),
            StepEvent::Error(e) => self.on_error(e, additional),
        }
    }

    /// Flags that would apply to `event`.
    pub fn flags_for(&self, event: &StepEvent) -> Flags {
        match event {
            StepEvent::AfterDispatch(e) => self.dispatch_matrix.resolve_dispatch(&e.handler, &e.action),
            StepEvent::Error(e) => self.exception_matrix.resolve(&e.exception.type_name),
        }
    }

    pub fn shutdown(&self) {
        self.sink.shutdown();
    }

    fn write(&self, step: Step, record: &LogRecord) -> Result<Outcome> {
        let outcome = self.sink.write(step, record).map_err(ReqlogError::from)?;
        Ok(Outcome::Written(outcome))
    }
}
