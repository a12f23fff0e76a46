//! The normalized log record handed to sinks.
//!
//! One record is built per observed pipeline event (completed dispatch or
//! error). It is never mutated after it has been handed to a sink and the core
//! does not retain it.

use crate::error::ReqlogError;
use crate::flags::Flags;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Header map as stored in a record. A `None` value means the header was
/// requested by a flag but absent on the request.
pub type HeaderSnapshot = BTreeMap<String, Option<String>>;

// ─────────────────────────────────────────────────────────────
// User id
// ─────────────────────────────────────────────────────────────

/// Tri-state user id.
///
/// Serialised as `null` (not requested), `false` (requested, nobody
/// authenticated) or the id string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UserId {
    #[default]
    NotRequested,
    Anonymous,
    Id(String),
}

impl UserId {
    pub fn from_lookup(user: Option<String>) -> Self {
        match user {
            Some(id) => UserId::Id(id),
            None => UserId::Anonymous,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            UserId::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            UserId::NotRequested => Value::Null,
            UserId::Anonymous => Value::Bool(false),
            UserId::Id(id) => Value::String(id.clone()),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(UserId::NotRequested),
            Value::Bool(false) => Ok(UserId::Anonymous),
            Value::String(id) => Ok(UserId::Id(id)),
            Value::Number(n) => Ok(UserId::Id(n.to_string())),
            other => Err(format!("invalid user_id: {other}")),
        }
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            UserId::NotRequested => serializer.serialize_none(),
            UserId::Anonymous => serializer.serialize_bool(false),
            UserId::Id(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?.unwrap_or(Value::Null);
        UserId::from_value(value).map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────
// Additional parameters
// ─────────────────────────────────────────────────────────────

/// Caller-supplied context attached verbatim to every record of a
/// `SystemLog` registration. Always an object or an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct AdditionalParameters(Value);

impl AdditionalParameters {
    /// Validate an optional caller value. `None` and `null` mean "none".
    pub fn from_optional(value: Option<Value>) -> Result<Option<Self>, ReqlogError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Self::try_from(v).map(Some),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl TryFrom<Value> for AdditionalParameters {
    type Error = ReqlogError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(_) | Value::Array(_) => Ok(Self(value)),
            other => Err(ReqlogError::CallerContract(format!(
                "additional parameters must be an object or an array, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<AdditionalParameters> for Value {
    fn from(params: AdditionalParameters) -> Self {
        params.0
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────

/// A single audit record. Optional fields serialise as `null` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    // ── Identity ─────────────────────────────────────────────────
    pub request_id: String,
    pub uri: String,
    pub method: String,
    #[serde(default)]
    pub user_id: UserId,
    pub ip_address: Option<String>,

    // ── Request ───────────────────────────────────────────────────
    pub request_headers: Option<HeaderSnapshot>,
    pub request_params: Option<Value>,
    pub request_body_raw: Option<String>,
    /// Unix seconds.
    pub request_timestamp: i64,

    // ── Response ──────────────────────────────────────────────────
    pub response_headers: Option<HeaderSnapshot>,
    pub response_body: Option<String>,
    /// Unix seconds; never earlier than `request_timestamp`.
    pub response_timestamp: i64,
    pub response_status_code: Option<u16>,

    // ── Exception (error path only) ───────────────────────────────
    pub exception: Option<String>,
    pub exception_class: Option<String>,
    pub errors: Option<Value>,
    pub call_trace: Option<Vec<String>>,

    // ── Bookkeeping ───────────────────────────────────────────────
    pub flags: Flags,
    pub additional_parameters: Option<AdditionalParameters>,
}

impl LogRecord {
    /// True when the record came from the error path.
    pub fn is_exception(&self) -> bool {
        self.exception_class.is_some()
    }

    /// Serialise to a compact JSON line.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
