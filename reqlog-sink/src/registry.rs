use crate::database::DatabaseSink;
use crate::file::FileSink;
use crate::terminal::TerminalSink;
use reqlog_core::config::SystemLogConfig;
use reqlog_core::error::{ReqlogError, Result};
use reqlog_core::sink::LogSink;
use std::fmt;
use std::str::FromStr;

/// The closed set of configurable sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Terminal,
    File,
    Database,
}

impl SinkKind {
    pub const ALL: [SinkKind; 3] = [SinkKind::Terminal, SinkKind::File, SinkKind::Database];

    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::Terminal => "terminal",
            SinkKind::File => "file",
            SinkKind::Database => "database",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = ReqlogError;

    fn from_str(s: &str) -> Result<Self> {
        SinkKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ReqlogError::config(format!("unknown log sink: {s:?}")))
    }
}

/// Build the sink selected by `system-log.log` from its settings block.
///
/// Built once at startup; any missing or invalid setting is a `Config` error.
pub fn build_sink(config: &SystemLogConfig) -> Result<Box<dyn LogSink>> {
    let kind: SinkKind = config.require_log()?.parse()?;
    let sink: Box<dyn LogSink> = match kind {
        SinkKind::Terminal => Box::new(TerminalSink::new(config.terminal_log.as_ref())),
        SinkKind::File => Box::new(FileSink::new(config.file_log.as_ref())?),
        SinkKind::Database => Box::new(DatabaseSink::new(config.database_log.as_ref())?),
    };
    tracing::info!(sink = %kind, "Log sink ready");
    Ok(sink)
}
