//! Assembles a [`LogRecord`] from a request context and a set of flags.
//!
//! The builder is a pure function of its inputs except for two environment
//! reads: the current time, and the user lookup (only when `USER_ID` is set).

use crate::config::{DEFAULT_BODY_RAW_LIMIT, SystemLogConfig};
use crate::context::{ContextUser, RequestContext, UserLookup};
use crate::exception::ExceptionInfo;
use crate::flags::Flags;
use crate::record::{AdditionalParameters, HeaderSnapshot, LogRecord, UserId};
use crate::scrub;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

pub const CONTENT_TYPE: &str = "Content-Type";

/// Individually selectable request headers, in the order they are added.
const FLAGGED_HEADERS: &[(Flags, &str)] = &[
    (Flags::REQUEST_HEADER_CONTENT_TYPE, CONTENT_TYPE),
    (Flags::REQUEST_HEADER_AGENT, "User-Agent"),
    (Flags::REQUEST_HEADER_REFERER, "Referer"),
    (Flags::REQUEST_HEADER_ACCEPT, "Accept"),
];

/// Error-path inputs that are not part of the request context.
#[derive(Debug, Clone, Copy)]
pub struct Failure<'a> {
    pub exception: &'a ExceptionInfo,
    /// Error list reported by the host; `None` is stored as `[]`.
    pub errors: Option<&'a Value>,
    /// Status code the host is about to send; overrides the context's.
    pub status_code: Option<u16>,
}

#[derive(Clone)]
pub struct RecordBuilder {
    body_raw_limit: usize,
    redact_headers: Vec<String>,
    users: Arc<dyn UserLookup>,
}

impl std::fmt::Debug for RecordBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBuilder")
            .field("body_raw_limit", &self.body_raw_limit)
            .field("redact_headers", &self.redact_headers)
            .finish_non_exhaustive()
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BODY_RAW_LIMIT)
    }
}

impl RecordBuilder {
    pub fn new(body_raw_limit: usize) -> Self {
        Self {
            body_raw_limit,
            redact_headers: Vec::new(),
            users: Arc::new(ContextUser),
        }
    }

    pub fn from_config(config: &SystemLogConfig) -> Self {
        Self::new(config.body_raw_limit).with_redacted_headers(config.redact_headers.clone())
    }

    /// Replace the default user lookup (the context's `user_id`).
    pub fn with_user_lookup(mut self, users: Arc<dyn UserLookup>) -> Self {
        self.users = users;
        self
    }

    /// Headers masked entirely in full-header snapshots.
    pub fn with_redacted_headers(mut self, names: Vec<String>) -> Self {
        self.redact_headers = names;
        self
    }

    pub fn body_raw_limit(&self) -> usize {
        self.body_raw_limit
    }

    /// Build the record for a completed dispatch.
    pub fn build(
        &self,
        flags: Flags,
        ctx: &RequestContext,
        additional: Option<&AdditionalParameters>,
    ) -> LogRecord {
        let mut record = LogRecord {
            request_id: ctx.request_id.clone(),
            uri: ctx.uri.clone(),
            method: ctx.method.clone(),
            user_id: UserId::NotRequested,
            ip_address: ctx.ip_address.clone(),
            request_headers: None,
            request_params: None,
            request_body_raw: None,
            request_timestamp: ctx.request_timestamp,
            response_headers: None,
            response_body: None,
            response_timestamp: Utc::now().timestamp().max(ctx.request_timestamp),
            response_status_code: ctx.response_status,
            exception: None,
            exception_class: None,
            errors: None,
            call_trace: None,
            flags,
            additional_parameters: additional.cloned(),
        };

        if flags.contains(Flags::USER_ID) {
            record.user_id = UserId::from_lookup(self.users.current_user(ctx));
        }

        record.request_headers = self.request_headers(flags, ctx);

        if flags.contains(Flags::REQUEST_PARAMS) {
            record.request_params = ctx.params.clone();
        }

        if flags.contains(Flags::REQUEST_BODY_RAW) {
            self.capture_body(flags, ctx, &mut record);
        }

        if flags.contains(Flags::RESPONSE_HEADER) {
            record.response_headers = Some(self.snapshot(&ctx.response_headers));
        }

        if flags.contains(Flags::RESPONSE_BODY) {
            record.response_body = ctx.response_body.clone();
            if !flags.contains(Flags::RESPONSE_HEADER) {
                let content_type = ctx.get_response_header(CONTENT_TYPE).map(str::to_string);
                record.response_headers = Some(BTreeMap::from([(CONTENT_TYPE.to_string(), content_type)]));
            }
        }

        debug!(request_id = %record.request_id, flags = %flags, "Record built");
        record
    }

    /// Build the record for an error: the dispatch record plus exception
    /// class, serialized summary, error list and call trace.
    pub fn build_error(
        &self,
        flags: Flags,
        ctx: &RequestContext,
        failure: Failure<'_>,
        additional: Option<&AdditionalParameters>,
    ) -> LogRecord {
        let mut record = self.build(flags, ctx, additional);
        if failure.status_code.is_some() {
            record.response_status_code = failure.status_code;
        }
        record.exception = Some(failure.exception.summary());
        record.exception_class = Some(failure.exception.type_name.clone());
        record.errors = Some(
            failure
                .errors
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
        );
        record.call_trace = Some(failure.exception.call_trace());
        record
    }

    fn request_headers(&self, flags: Flags, ctx: &RequestContext) -> Option<HeaderSnapshot> {
        if flags.contains(Flags::REQUEST_HEADERS) {
            return Some(self.snapshot(&ctx.request_headers));
        }

        let picked: HeaderSnapshot = FLAGGED_HEADERS
            .iter()
            .filter(|(flag, _)| flags.contains(*flag))
            .map(|(_, name)| (name.to_string(), ctx.get_header(name).map(str::to_string)))
            .collect();

        (!picked.is_empty()).then_some(picked)
    }

    /// Raw body, trimmed and filtered. A non-empty body also surfaces the
    /// request `Content-Type` when no header flag already covers it.
    fn capture_body(&self, flags: Flags, ctx: &RequestContext, record: &mut LogRecord) {
        let Some(raw) = ctx.body.as_deref() else {
            return;
        };
        record.request_body_raw = Some(scrub::sanitize_body(raw, self.body_raw_limit));

        if !raw.is_empty()
            && !flags.contains(Flags::REQUEST_HEADERS)
            && !flags.contains(Flags::REQUEST_HEADER_CONTENT_TYPE)
        {
            record
                .request_headers
                .get_or_insert_with(BTreeMap::new)
                .insert(CONTENT_TYPE.to_string(), ctx.get_header(CONTENT_TYPE).map(str::to_string));
        }
    }

    fn snapshot(&self, headers: &HashMap<String, String>) -> HeaderSnapshot {
        headers
            .iter()
            .map(|(name, value)| {
                let (value, _) = scrub::scrub_header(name, value, &self.redact_headers);
                (name.clone(), Some(value))
            })
            .collect()
    }
}
