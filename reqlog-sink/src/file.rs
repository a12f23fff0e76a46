//! Append-only JSON-lines file sink.
//!
//! Each record is serialised to one compact JSON line and flushed immediately,
//! so a crash never loses more than the record being written. The file is
//! created when missing; its parent directory must already exist.

use reqlog_core::config::FileLogConfig;
use reqlog_core::error::{ReqlogError, Result};
use reqlog_core::record::LogRecord;
use reqlog_core::sink::{LogSink, SinkError, Step, WriteOutcome};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

pub struct FileSink {
    path: PathBuf,
    inner: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    /// Open (or create) the log file. Fails when the path is not configured
    /// or the file cannot be opened for appending.
    pub fn new(config: Option<&FileLogConfig>) -> Result<Self> {
        let path = config
            .and_then(|c| c.path.as_deref())
            .ok_or_else(|| ReqlogError::config("system-log.file-log.path setting is not set"))?;
        Self::open(path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ReqlogError::config(format!("cannot open log file {}: {e}", path.display())))?;

        info!(path = %path.display(), "File log sink opened");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::result::Result<(), SinkError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("file sink lock poisoned"))?;
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl LogSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write(&self, step: Step, record: &LogRecord) -> std::result::Result<WriteOutcome, SinkError> {
        let outcome = record
            .to_json_line()
            .map_err(SinkError::from)
            .and_then(|line| self.append(&line));

        match outcome {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    step = %step,
                    request_id = %record.request_id,
                    "Dropped log record"
                );
                Ok(WriteOutcome::Dropped)
            }
        }
    }

    fn shutdown(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(mut writer) = guard.take() {
                let _ = writer.flush();
                info!(path = %self.path.display(), "File log sink closed");
            }
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
