use crate::error::{ReqlogError, Result};
use crate::flags::Flags;
use crate::matrix::RoutingMatrix;
use figment::{
    Figment,
    providers::{Env, Format, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BODY_RAW_LIMIT: usize = 1_000_000;
pub const DEFAULT_TABLE: &str = "system_log";
pub const ENV_PREFIX: &str = "REQLOG_";

/// The `system-log` settings block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLogConfig {
    /// Selected sink: `terminal`, `file` or `database`.
    #[serde(default)]
    pub log: Option<String>,
    /// Raw request bodies longer than this many bytes are trimmed.
    #[serde(default = "default_body_raw_limit")]
    pub body_raw_limit: usize,
    /// Headers masked entirely in full-header snapshots.
    #[serde(default)]
    pub redact_headers: Vec<String>,
    /// `handler::method` → flags.
    #[serde(default)]
    pub matrix: HashMap<String, Flags>,
    /// Exception type name → flags.
    #[serde(default, rename = "matrix-exception")]
    pub matrix_exception: HashMap<String, Flags>,
    #[serde(default, rename = "terminal-log")]
    pub terminal_log: Option<TerminalLogConfig>,
    #[serde(default, rename = "file-log")]
    pub file_log: Option<FileLogConfig>,
    #[serde(default, rename = "database-log")]
    pub database_log: Option<DatabaseLogConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStream {
    #[default]
    Stderr,
    Stdout,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalLogConfig {
    #[serde(default)]
    pub stream: TerminalStream,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileLogConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseLogConfig {
    /// `postgresql`, `postgres`, `mysql`, `mariadb` or `sqlite`.
    pub adapter: String,
    #[serde(default = "default_host")]
    pub host: String,
    /// Defaults per adapter when unset.
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name; a file path or `:memory:` for sqlite.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    /// Full connection URL; takes precedence over the discrete fields.
    #[serde(default)]
    pub url: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_body_raw_limit() -> usize { DEFAULT_BODY_RAW_LIMIT }
fn default_host() -> String { "localhost".into() }
fn default_table() -> String { DEFAULT_TABLE.into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for SystemLogConfig {
    fn default() -> Self {
        Self {
            log: None,
            body_raw_limit: default_body_raw_limit(),
            redact_headers: Vec::new(),
            matrix: HashMap::new(),
            matrix_exception: HashMap::new(),
            terminal_log: None,
            file_log: None,
            database_log: None,
        }
    }
}

impl DatabaseLogConfig {
    pub fn new(adapter: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            host: default_host(),
            port: None,
            name: name.into(),
            username: None,
            password: None,
            schema: None,
            table: default_table(),
            url: None,
        }
    }
}

impl SystemLogConfig {
    /// Load from a YAML or TOML file (chosen by extension) plus `REQLOG_*`
    /// environment overrides. Nested keys use `__`: `REQLOG_FILE_LOG__PATH`.
    ///
    /// Variable names arrive lowercased, so a matrix entry set from the
    /// environment only matches an all-lowercase handler or exception key.
    /// Keep matrix entries in the file.
    pub fn load(path: &Path) -> Result<Self> {
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        let figment = if is_toml {
            Figment::new().merge(Toml::file(path))
        } else {
            Figment::new().merge(Yaml::file(path))
        };
        Self::from_figment(figment.merge(env_overrides()))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_figment(Figment::new().merge(Yaml::string(yaml)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }

    /// The selected sink name.
    pub fn require_log(&self) -> Result<&str> {
        match self.log.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(ReqlogError::config("system-log.log setting is not set")),
        }
    }

    pub fn dispatch_matrix(&self) -> RoutingMatrix {
        RoutingMatrix::from_entries(self.matrix.iter().map(|(k, v)| (k, *v)))
    }

    pub fn exception_matrix(&self) -> RoutingMatrix {
        RoutingMatrix::from_entries(self.matrix_exception.iter().map(|(k, v)| (k, *v)))
    }
}

/// `REQLOG_` variables, with the hyphenated sections (`matrix-exception`,
/// `<name>-log`) mapped back to their file names.
fn env_overrides() -> Env {
    Env::prefixed(ENV_PREFIX)
        .split("__")
        .map(|key| env_key(key.as_str()).into())
}

fn env_key(key: &str) -> String {
    match key.split_once('.') {
        Some((section, rest)) if is_hyphenated_section(section) => {
            format!("{}.{rest}", section.replace('_', "-"))
        }
        _ => key.to_string(),
    }
}

fn is_hyphenated_section(section: &str) -> bool {
    let section = section.to_ascii_lowercase();
    section == "matrix_exception" || section.ends_with("_log")
}
