use reqlog_core::record::LogRecord;
use reqlog_core::sink::{LogSink, SinkError, Step, WriteOutcome};
use std::sync::Mutex;

/// Keeps every record in memory. Used by tests and by hosts that want to
/// inspect records before forwarding them elsewhere.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Step, LogRecord)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write` calls so far.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<(Step, LogRecord)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<(Step, LogRecord)> {
        self.records.lock().ok().and_then(|r| r.last().cloned())
    }
}

impl LogSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&self, step: Step, record: &LogRecord) -> Result<WriteOutcome, SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::Closed)?
            .push((step, record.clone()));
        Ok(WriteOutcome::Written)
    }
}
