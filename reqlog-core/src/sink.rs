//! The contract every log destination implements.

use crate::record::LogRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline step a record was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AfterDispatch,
    Error,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::AfterDispatch => "after_dispatch",
            Step::Error => "error",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sink did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Emitted to a stream or file.
    Written,
    /// Persisted as a row; carries the generated id.
    Inserted { id: i64 },
    /// Accepted but not persisted (write failure already reported via tracing).
    Dropped,
}

impl WriteOutcome {
    pub fn inserted_id(self) -> Option<i64> {
        match self {
            WriteOutcome::Inserted { id } => Some(id),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("sink is closed")]
    Closed,
}

/// A log destination.
///
/// Terminal and file sinks swallow their own write failures and report
/// [`WriteOutcome::Dropped`]; only the database sink returns errors.
/// `write` never mutates the record.
pub trait LogSink: Send + Sync {
    /// Adapter name, for logging.
    fn name(&self) -> &str;

    fn write(&self, step: Step, record: &LogRecord) -> Result<WriteOutcome, SinkError>;

    /// Release held resources. Must tolerate being called more than once.
    fn shutdown(&self) {}
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&self, step: Step, record: &LogRecord) -> Result<WriteOutcome, SinkError> {
        (**self).write(step, record)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

impl<S: LogSink + ?Sized> LogSink for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&self, step: Step, record: &LogRecord) -> Result<WriteOutcome, SinkError> {
        (**self).write(step, record)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}
