pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod exception;
pub mod flags;
pub mod matrix;
pub mod record;
pub mod scrub;
pub mod sink;

pub use builder::{Failure, RecordBuilder};
pub use config::SystemLogConfig;
pub use context::{RequestContext, UserLookup};
pub use error::ReqlogError;
pub use exception::{ExceptionInfo, StackFrame};
pub use flags::Flags;
pub use matrix::RoutingMatrix;
pub use record::{AdditionalParameters, LogRecord, UserId};
pub use sink::{LogSink, SinkError, Step, WriteOutcome};
