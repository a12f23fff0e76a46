//! Relational sink: one row per record.
//!
//! Holds a single connection (no pool) opened at construction. The async
//! driver is run on a private current-thread runtime, so `write` blocks the
//! calling thread and must not be called from inside another tokio runtime.

use reqlog_core::config::DatabaseLogConfig;
use reqlog_core::error::{ReqlogError, Result};
use reqlog_core::flags::Flags;
use reqlog_core::record::{AdditionalParameters, LogRecord, UserId};
use reqlog_core::sink::{LogSink, SinkError, Step, WriteOutcome};
use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, Connection, Row};
use std::sync::{Mutex, MutexGuard};
use tokio::runtime::Runtime;
use tracing::{debug, error, info};
use url::Url;

// ── Dialects ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Resolve a configured adapter name.
    pub fn from_adapter(adapter: &str) -> Result<Self> {
        match adapter.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(ReqlogError::config(format!("unknown database adapter: {other:?}"))),
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    fn default_port(self) -> Option<u16> {
        match self {
            Dialect::Postgres => Some(5432),
            Dialect::MySql => Some(3306),
            Dialect::Sqlite => None,
        }
    }

    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// MySQL has no `INSERT ... RETURNING`; its id comes from the query result.
    fn returns_id(self) -> bool {
        self != Dialect::MySql
    }

    fn id_column(self) -> &'static str {
        match self {
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
            Dialect::MySql => "id BIGINT AUTO_INCREMENT PRIMARY KEY",
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    fn sql_type(self, kind: ColumnKind) -> &'static str {
        match (self, kind) {
            (_, ColumnKind::Key) => "VARCHAR(64)",
            (_, ColumnKind::Short) => "VARCHAR(16)",
            (_, ColumnKind::Int) => "BIGINT",
            (Dialect::MySql, ColumnKind::Text) => "LONGTEXT",
            (_, ColumnKind::Text) => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    Key,
    Short,
    Text,
    Int,
}

/// Persisted columns, in insert order. `id` is generated.
const COLUMNS: &[(&str, ColumnKind, bool)] = &[
    ("request_id", ColumnKind::Key, true),
    ("uri", ColumnKind::Text, true),
    ("method", ColumnKind::Short, true),
    ("user_id", ColumnKind::Text, false),
    ("ip_address", ColumnKind::Key, false),
    ("request_headers", ColumnKind::Text, false),
    ("request_params", ColumnKind::Text, false),
    ("request_body_raw", ColumnKind::Text, false),
    ("request_timestamp", ColumnKind::Int, true),
    ("response_headers", ColumnKind::Text, false),
    ("response_body", ColumnKind::Text, false),
    ("response_timestamp", ColumnKind::Int, true),
    ("response_status_code", ColumnKind::Int, false),
    ("exception", ColumnKind::Text, false),
    ("exception_class", ColumnKind::Text, false),
    ("errors", ColumnKind::Text, false),
    ("call_trace", ColumnKind::Text, false),
    ("flags", ColumnKind::Int, true),
    ("additional_parameters", ColumnKind::Text, false),
];

// ── Connection settings ──────────────────────────────────────────────────────

/// Build the driver URL from the discrete settings, unless an explicit `url`
/// is configured.
pub fn connection_url(dialect: Dialect, config: &DatabaseLogConfig) -> Result<String> {
    if let Some(url) = config.url.as_deref().filter(|u| !u.trim().is_empty()) {
        return Ok(url.to_string());
    }

    if dialect == Dialect::Sqlite {
        return Ok(match config.name.as_str() {
            "" | ":memory:" => "sqlite::memory:".to_string(),
            path => format!("sqlite://{path}?mode=rwc"),
        });
    }

    if config.name.is_empty() {
        return Err(ReqlogError::config("system-log.database-log.name setting is not set"));
    }

    let bad_host = |_| ReqlogError::config(format!("invalid database host: {:?}", config.host));
    let mut url = Url::parse(&format!("{}://{}", dialect.scheme(), config.host)).map_err(bad_host)?;
    url.set_port(config.port.or(dialect.default_port()))
        .map_err(|_| ReqlogError::config("database port cannot be set for this host"))?;
    if let Some(user) = config.username.as_deref() {
        url.set_username(user)
            .map_err(|_| ReqlogError::config("database username cannot be set for this host"))?;
    }
    if let Some(password) = config.password.as_deref() {
        url.set_password(Some(password))
            .map_err(|_| ReqlogError::config("database password cannot be set for this host"))?;
    }
    url.set_path(&config.name);
    Ok(url.to_string())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

/// `schema.table` or `table`, after validating both parts.
pub fn qualified_table(schema: Option<&str>, table: &str) -> Result<String> {
    if !is_identifier(table) {
        return Err(ReqlogError::config(format!("invalid table name: {table:?}")));
    }
    match schema.filter(|s| !s.is_empty()) {
        Some(schema) if !is_identifier(schema) => {
            Err(ReqlogError::config(format!("invalid schema name: {schema:?}")))
        }
        Some(schema) => Ok(format!("{schema}.{table}")),
        None => Ok(table.to_string()),
    }
}

// ── Row encoding ─────────────────────────────────────────────────────────────

enum Param {
    Text(Option<String>),
    Int(Option<i64>),
}

fn json_text<T: serde::Serialize>(value: Option<&T>) -> std::result::Result<Option<String>, SinkError> {
    value.map(serde_json::to_string).transpose().map_err(SinkError::from)
}

fn encode_row(record: &LogRecord) -> std::result::Result<Vec<Param>, SinkError> {
    let user_id = match &record.user_id {
        UserId::NotRequested => None,
        other => Some(serde_json::to_string(&other.to_value())?),
    };

    Ok(vec![
        Param::Text(Some(record.request_id.clone())),
        Param::Text(Some(record.uri.clone())),
        Param::Text(Some(record.method.clone())),
        Param::Text(user_id),
        Param::Text(record.ip_address.clone()),
        Param::Text(json_text(record.request_headers.as_ref())?),
        Param::Text(json_text(record.request_params.as_ref())?),
        Param::Text(record.request_body_raw.clone()),
        Param::Int(Some(record.request_timestamp)),
        Param::Text(json_text(record.response_headers.as_ref())?),
        Param::Text(record.response_body.clone()),
        Param::Int(Some(record.response_timestamp)),
        Param::Int(record.response_status_code.map(i64::from)),
        Param::Text(record.exception.clone()),
        Param::Text(record.exception_class.clone()),
        Param::Text(json_text(record.errors.as_ref())?),
        Param::Text(json_text(record.call_trace.as_ref())?),
        // Bit-for-bit; every defined flag fits below bit 63.
        Param::Int(Some(record.flags.bits() as i64)),
        Param::Text(json_text(record.additional_parameters.as_ref())?),
    ])
}

fn decode_err(column: &str, detail: impl std::fmt::Display) -> SinkError {
    SinkError::Database(format!("cannot decode column {column}: {detail}"))
}

/// MySQL reports `LONGTEXT` columns as blobs, so a text column that does not
/// decode as a string is read as bytes and checked for UTF-8.
fn text(row: &AnyRow, column: &str) -> std::result::Result<Option<String>, SinkError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnDecode { .. }) => row
            .try_get::<Option<Vec<u8>>, _>(column)
            .map_err(|e| decode_err(column, e))?
            .map(|bytes| String::from_utf8(bytes).map_err(|e| decode_err(column, e)))
            .transpose(),
        Err(e) => Err(decode_err(column, e)),
    }
}

fn int(row: &AnyRow, column: &str) -> std::result::Result<Option<i64>, SinkError> {
    row.try_get::<Option<i64>, _>(column).map_err(|e| decode_err(column, e))
}

fn json<T: serde::de::DeserializeOwned>(row: &AnyRow, column: &str) -> std::result::Result<Option<T>, SinkError> {
    text(row, column)?
        .map(|s| serde_json::from_str(&s).map_err(|e| decode_err(column, e)))
        .transpose()
}

fn required<T>(value: Option<T>, column: &str) -> std::result::Result<T, SinkError> {
    value.ok_or_else(|| decode_err(column, "unexpected NULL"))
}

fn decode_row(row: &AnyRow) -> std::result::Result<LogRecord, SinkError> {
    let user_id = match json::<Value>(row, "user_id")? {
        Some(v) => UserId::from_value(v).map_err(|e| decode_err("user_id", e))?,
        None => UserId::NotRequested,
    };
    let status = int(row, "response_status_code")?
        .map(u16::try_from)
        .transpose()
        .map_err(|e| decode_err("response_status_code", e))?;

    Ok(LogRecord {
        request_id: required(text(row, "request_id")?, "request_id")?,
        uri: required(text(row, "uri")?, "uri")?,
        method: required(text(row, "method")?, "method")?,
        user_id,
        ip_address: text(row, "ip_address")?,
        request_headers: json(row, "request_headers")?,
        request_params: json(row, "request_params")?,
        request_body_raw: text(row, "request_body_raw")?,
        request_timestamp: required(int(row, "request_timestamp")?, "request_timestamp")?,
        response_headers: json(row, "response_headers")?,
        response_body: text(row, "response_body")?,
        response_timestamp: required(int(row, "response_timestamp")?, "response_timestamp")?,
        response_status_code: status,
        exception: text(row, "exception")?,
        exception_class: text(row, "exception_class")?,
        errors: json(row, "errors")?,
        call_trace: json(row, "call_trace")?,
        flags: Flags::from_bits(required(int(row, "flags")?, "flags")? as u64),
        additional_parameters: json::<AdditionalParameters>(row, "additional_parameters")?,
    })
}

// ── Sink ─────────────────────────────────────────────────────────────────────

pub struct DatabaseSink {
    dialect: Dialect,
    table: String,
    insert_sql: String,
    runtime: Runtime,
    conn: Mutex<Option<AnyConnection>>,
}

impl DatabaseSink {
    /// Validate the settings and open the connection.
    pub fn new(config: Option<&DatabaseLogConfig>) -> Result<Self> {
        let config =
            config.ok_or_else(|| ReqlogError::config("system-log.database-log setting is not set"))?;
        let dialect = Dialect::from_adapter(&config.adapter)?;
        let table = qualified_table(config.schema.as_deref(), &config.table)?;
        let url = connection_url(dialect, config)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ReqlogError::config(format!("cannot start database runtime: {e}")))?;

        sqlx::any::install_default_drivers();
        let conn = runtime
            .block_on(AnyConnection::connect(&url))
            .map_err(|e| ReqlogError::config(format!("cannot connect to {} database: {e}", config.adapter)))?;

        info!(adapter = %config.adapter, host = %config.host, table = %table, "Database log sink connected");

        Ok(Self {
            insert_sql: insert_sql(dialect, &table),
            dialect,
            table,
            runtime,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the log table if it does not exist.
    pub fn create_table(&self) -> std::result::Result<(), SinkError> {
        let ddl = create_table_sql(self.dialect, &self.table);
        let mut guard = self.lock_conn()?;
        let conn = guard.as_mut().ok_or(SinkError::Closed)?;
        self.runtime
            .block_on(sqlx::query::<Any>(&ddl).execute(conn))
            .map_err(database_error)?;
        info!(table = %self.table, "Log table ensured");
        Ok(())
    }

    /// Read one row back.
    pub fn fetch_record(&self, id: i64) -> std::result::Result<Option<LogRecord>, SinkError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = {}",
            column_list(),
            self.table,
            self.dialect.placeholder(1)
        );
        let mut guard = self.lock_conn()?;
        let conn = guard.as_mut().ok_or(SinkError::Closed)?;
        let row = self
            .runtime
            .block_on(sqlx::query::<Any>(&sql).bind(id).fetch_optional(conn))
            .map_err(database_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    fn insert(&self, record: &LogRecord) -> std::result::Result<i64, SinkError> {
        let mut query = sqlx::query::<Any>(&self.insert_sql);
        for param in encode_row(record)? {
            query = match param {
                Param::Text(v) => query.bind(v),
                Param::Int(v) => query.bind(v),
            };
        }

        let mut guard = self.lock_conn()?;
        let conn = guard.as_mut().ok_or(SinkError::Closed)?;
        let returns_id = self.dialect.returns_id();
        self.runtime
            .block_on(async move {
                if returns_id {
                    let row = query.fetch_one(conn).await?;
                    row.try_get::<i64, _>(0)
                } else {
                    query
                        .execute(conn)
                        .await?
                        .last_insert_id()
                        .ok_or_else(|| sqlx::Error::Protocol("no row id returned".into()))
                }
            })
            .map_err(database_error)
    }

    fn lock_conn(&self) -> std::result::Result<MutexGuard<'_, Option<AnyConnection>>, SinkError> {
        self.conn.lock().map_err(|_| SinkError::Closed)
    }
}

impl LogSink for DatabaseSink {
    fn name(&self) -> &str {
        "database"
    }

    fn write(&self, step: Step, record: &LogRecord) -> std::result::Result<WriteOutcome, SinkError> {
        match self.insert(record) {
            Ok(id) => {
                debug!(id, step = %step, request_id = %record.request_id, "Log row inserted");
                Ok(WriteOutcome::Inserted { id })
            }
            Err(e) => {
                error!(error = %e, step = %step, table = %self.table, request_id = %record.request_id, "Log row insert failed");
                Err(e)
            }
        }
    }

    fn shutdown(&self) {
        let Ok(mut guard) = self.conn.lock() else {
            return;
        };
        if let Some(conn) = guard.take() {
            if let Err(e) = self.runtime.block_on(conn.close()) {
                debug!(error = %e, "Ignoring error while closing database connection");
            }
            info!(table = %self.table, "Database log sink closed");
        }
    }
}

impl Drop for DatabaseSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn database_error(err: sqlx::Error) -> SinkError {
    SinkError::Database(err.to_string())
}

fn column_list() -> String {
    COLUMNS.iter().map(|(name, _, _)| *name).collect::<Vec<_>>().join(", ")
}

fn insert_sql(dialect: Dialect, table: &str) -> String {
    let placeholders: Vec<String> = (1..=COLUMNS.len()).map(|n| dialect.placeholder(n)).collect();
    let mut sql = format!("INSERT INTO {table} ({}) VALUES ({})", column_list(), placeholders.join(", "));
    if dialect.returns_id() {
        sql.push_str(" RETURNING id");
    }
    sql
}

fn create_table_sql(dialect: Dialect, table: &str) -> String {
    let mut columns = vec![dialect.id_column().to_string()];
    columns.extend(COLUMNS.iter().map(|(name, kind, not_null)| {
        let null = if *not_null { " NOT NULL" } else { "" };
        format!("{name} {}{null}", dialect.sql_type(*kind))
    }));
    format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", "))
}
