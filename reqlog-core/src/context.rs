use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Snapshot of one request/response exchange, as handed over by the host.
///
/// Everything except method and URI is optional: the host fills in what it
/// has. Response fields are usually only present on the post-dispatch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    // --- Request data ---
    /// Opaque token unique per request. Generated when the host has none.
    #[serde(default = "new_request_id")]
    pub request_id: String,
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    /// Parsed request parameters (route + query + body).
    #[serde(default)]
    pub params: Option<Value>,
    /// Raw request body as received. Accepts a string or a byte array.
    #[serde(default, deserialize_with = "body_bytes")]
    pub body: Option<Vec<u8>>,
    /// Unix seconds at which the request was received.
    #[serde(default = "now_ts")]
    pub request_timestamp: i64,

    // --- Authentication ---
    /// Id of the authenticated user, set by the host's auth layer.
    #[serde(default)]
    pub user_id: Option<String>,

    // --- Response data ---
    #[serde(default)]
    pub response_status: Option<u16>,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    /// Buffered response body.
    #[serde(default)]
    pub response_body: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BodyRepr {
    Text(String),
    Bytes(Vec<u8>),
}

fn body_bytes<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BodyRepr>::deserialize(deserializer)?.map(|body| match body {
        BodyRepr::Text(text) => text.into_bytes(),
        BodyRepr::Bytes(bytes) => bytes,
    }))
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

impl RequestContext {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            request_id: new_request_id(),
            method: method.into(),
            uri: uri.into(),
            ip_address: None,
            request_headers: HashMap::new(),
            params: None,
            body: None,
            request_timestamp: now_ts(),
            user_id: None,
            response_status: None,
            response_headers: HashMap::new(),
            response_body: None,
        }
    }

    /// Get a request header (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.request_headers, name)
    }

    /// Get a response header (case-insensitive).
    pub fn get_response_header(&self, name: &str) -> Option<&str> {
        find_header(&self.response_headers, name)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_response(mut self, status: u16, body: Option<String>) -> Self {
        self.response_status = Some(status);
        self.response_body = body;
        self
    }

    pub fn with_response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.insert(name.into(), value.into());
        self
    }

    /// Raw body bytes, empty when the request had none.
    pub fn raw_body(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Resolves the authenticated user for a request.
///
/// Consulted by the record builder only when `USER_ID` is set.
pub trait UserLookup: Send + Sync {
    fn current_user(&self, ctx: &RequestContext) -> Option<String>;
}

/// Default lookup: the user the host attached to the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextUser;

impl UserLookup for ContextUser {
    fn current_user(&self, ctx: &RequestContext) -> Option<String> {
        ctx.user_id.clone()
    }
}

impl<F> UserLookup for F
where
    F: Fn(&RequestContext) -> Option<String> + Send + Sync,
{
    fn current_user(&self, ctx: &RequestContext) -> Option<String> {
        self(ctx)
    }
}
