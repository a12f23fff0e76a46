use crate::sink::SinkError;
use thiserror::Error;

/// Unified error type for Reqlog.
#[derive(Error, Debug)]
pub enum ReqlogError {
    /// Missing or invalid setting, or a sink precondition that does not hold.
    /// Raised while constructing a `SystemLog` or a sink; fatal to startup.
    #[error("Config error: {0}")]
    Config(String),

    /// The caller broke an API contract (e.g. scalar additional parameters).
    #[error("Caller contract violated: {0}")]
    CallerContract(String),

    /// A sink refused a record. Only the database sink surfaces these.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl ReqlogError {
    pub fn config(msg: impl Into<String>) -> Self {
        ReqlogError::Config(msg.into())
    }

    /// Whether the error happened while setting things up, as opposed to
    /// while handling a single event.
    pub fn is_startup(&self) -> bool {
        matches!(self, ReqlogError::Config(_))
    }
}

impl From<figment::Error> for ReqlogError {
    fn from(err: figment::Error) -> Self {
        ReqlogError::Config(err.to_string())
    }
}

/// Result alias used throughout the workspace.
pub type Result<T, E = ReqlogError> = std::result::Result<T, E>;
