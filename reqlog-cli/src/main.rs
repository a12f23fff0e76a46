// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  reqlog: replay recorded pipeline events through a system log
//
//  Input:  one JSON `StepEvent` per line (file or stdin)
//  Config: YAML/TOML `system-log` block + REQLOG_* env overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use anyhow::Context;
use clap::Parser;
use reqlog_core::config::SystemLogConfig;
use reqlog_core::sink::WriteOutcome;
use reqlog_pipeline::{Outcome, StepCallbacks, StepEvent, SystemLog};
use reqlog_sink::{DatabaseSink, SinkKind};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "reqlog", version, about = "Replay request/exception events into an audit log")]
struct Cli {
    /// Path to the system-log configuration file (.yaml or .toml)
    #[arg(short, long, default_value = "reqlog.yaml")]
    config: PathBuf,

    /// JSON-lines event file, or `-` for stdin
    #[arg(short, long, default_value = "-")]
    events: String,

    /// Additional parameters attached to every record (JSON object or array)
    #[arg(long)]
    additional: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Create the log table before replaying (database sink only)
    #[arg(long)]
    create_table: bool,
}

/// Per-run counters.
#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    written: usize,
    inserted: usize,
    dropped: usize,
    ignored: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Ignored => self.ignored += 1,
            Outcome::Written(WriteOutcome::Written) => self.written += 1,
            Outcome::Written(WriteOutcome::Inserted { .. }) => self.inserted += 1,
            Outcome::Written(WriteOutcome::Dropped) => self.dropped += 1,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "reqlog starting");

    // ── Config ──
    info!(path = %cli.config.display(), "Loading config file");
    let config = SystemLogConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let additional: Option<serde_json::Value> = cli
        .additional
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--additional is not valid JSON")?;

    // ── System log ──
    let system_log = Arc::new(build_system_log(&config, cli.create_table)?);
    let mut bus = StepCallbacks::new();
    system_log.register(&mut bus, additional)?;

    // ── Replay ──
    let tally = if cli.events == "-" {
        replay(io::stdin().lock(), &bus)
    } else {
        let file = File::open(&cli.events).with_context(|| format!("opening {}", cli.events))?;
        replay(BufReader::new(file), &bus)
    };

    system_log.shutdown();

    info!(
        written = tally.written,
        inserted = tally.inserted,
        dropped = tally.dropped,
        ignored = tally.ignored,
        failed = tally.failed,
        "Replay finished"
    );

    if tally.failed > 0 {
        anyhow::bail!("{} event(s) failed", tally.failed);
    }
    Ok(())
}

fn build_system_log(config: &SystemLogConfig, create_table: bool) -> anyhow::Result<SystemLog> {
    if !create_table {
        return Ok(SystemLog::from_config(config)?);
    }
    let kind: SinkKind = config.require_log()?.parse()?;
    if kind != SinkKind::Database {
        anyhow::bail!("--create-table needs the database sink, configured sink is {kind}");
    }
    let sink = DatabaseSink::new(config.database_log.as_ref())?;
    sink.create_table()?;
    Ok(SystemLog::new(config, Box::new(sink)))
}

/// Feed every line to the bus. Blank lines are skipped; unparsable lines and
/// hook failures are counted and logged, and replay continues.
fn replay(reader: impl BufRead, bus: &StepCallbacks) -> Tally {
    let mut tally = Tally::default();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(line = line_no, error = %e, "Cannot read event");
                tally.failed += 1;
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let event: StepEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Malformed event");
                tally.failed += 1;
                continue;
            }
        };
        for result in bus.invoke(&event) {
            match result {
                Ok(outcome) => tally.record(&outcome),
                Err(e) => {
                    warn!(line = line_no, step = %event.step(), error = %e, "Event not logged");
                    tally.failed += 1;
                }
            }
        }
    }
    tally
}
