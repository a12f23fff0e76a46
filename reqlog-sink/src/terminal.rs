use reqlog_core::config::{TerminalLogConfig, TerminalStream};
use reqlog_core::record::LogRecord;
use reqlog_core::sink::{LogSink, SinkError, Step, WriteOutcome};
use std::io::{self, Write};
use std::sync::Mutex;
use tracing::warn;

/// Pretty-prints each record to the process's stderr (or stdout), preceded by
/// the step name. Meant for development.
pub struct TerminalSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalSink {
    pub fn new(config: Option<&TerminalLogConfig>) -> Self {
        let stream = config.map(|c| c.stream.clone()).unwrap_or_default();
        let out: Box<dyn Write + Send> = match stream {
            TerminalStream::Stderr => Box::new(io::stderr()),
            TerminalStream::Stdout => Box::new(io::stdout()),
        };
        Self::with_writer(out)
    }

    /// Write to an arbitrary stream instead of a standard one.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    fn emit(&self, step: Step, record: &LogRecord) -> Result<(), SinkError> {
        let pretty = record.to_json_pretty()?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::other("terminal sink lock poisoned"))?;
        write!(out, "\n{step}\n{pretty}\n")?;
        out.flush()?;
        Ok(())
    }
}

impl LogSink for TerminalSink {
    fn name(&self) -> &str {
        "terminal"
    }

    fn write(&self, step: Step, record: &LogRecord) -> Result<WriteOutcome, SinkError> {
        match self.emit(step, record) {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(e) => {
                warn!(error = %e, step = %step, request_id = %record.request_id, "Dropped log record");
                Ok(WriteOutcome::Dropped)
            }
        }
    }
}
