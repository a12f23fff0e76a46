use regex::Regex;
use reqlog_core::builder::{Failure, RecordBuilder};
use reqlog_core::config::SystemLogConfig;
use reqlog_core::context::RequestContext;
use reqlog_core::exception::{ExceptionInfo, StackFrame};
use reqlog_core::flags::Flags;
use reqlog_core::matrix::RoutingMatrix;
use reqlog_core::record::{AdditionalParameters, UserId};
use reqlog_core::scrub::TRIMMED_MARKER;
use serde_json::json;

fn dummy_request() -> RequestContext {
    RequestContext::new("GET", "/dummy/7")
        .with_header("User-Agent", "Mozilla/5.0")
        .with_header("Accept", "application/json")
        .with_params(json!({"id": 7}))
        .with_response(200, Some(r#"{"ok":true}"#.into()))
        .with_response_header("Content-Type", "application/json")
}

// =============================================================================
// Dispatch records
// =============================================================================

#[test]
fn test_matrix_driven_dispatch_record() {
    let cfg = SystemLogConfig::from_yaml_str(
        r#"
log: terminal
matrix:
  "app::controllers::Dummy::get": "REQUEST_PARAMS | RESPONSE_BODY"
"#,
    )
    .unwrap();
    let flags = cfg.dispatch_matrix().resolve_dispatch("::app::controllers::Dummy", "get");
    let record = RecordBuilder::from_config(&cfg).build(flags, &dummy_request(), None);

    assert_eq!(record.request_params, Some(json!({"id": 7})));
    assert_eq!(record.response_body.as_deref(), Some(r#"{"ok":true}"#));
    assert!(record.request_headers.is_none());
    assert_eq!(record.user_id, UserId::NotRequested);
    assert_eq!(record.flags, Flags::REQUEST_PARAMS | Flags::RESPONSE_BODY);
}

#[test]
fn test_unmatched_dispatch_is_standard() {
    let matrix = RoutingMatrix::from_entries([("app::Other::get", Flags::USER_ID)]);
    let flags = matrix.resolve_dispatch("app::controllers::Dummy", "get");
    let record = RecordBuilder::default().build(flags, &dummy_request(), None);

    assert_eq!(record.flags, Flags::STANDARD);
    let json = serde_json::to_value(&record).unwrap();
    for key in ["request_headers", "request_params", "response_body", "user_id"] {
        assert!(json[key].is_null(), "{key} should be null");
    }
    assert_eq!(json["method"], "GET");
    assert_eq!(json["response_status_code"], 200);
}

#[test]
fn test_build_ignores_ignore_bit() {
    // Skipping IGNORE is the caller's job; the builder still builds.
    let record = RecordBuilder::default().build(Flags::IGNORE | Flags::USER_ID, &dummy_request(), None);
    assert_eq!(record.user_id, UserId::Anonymous);
}

#[test]
fn test_additional_parameters_attached() {
    let extra = AdditionalParameters::from_optional(Some(json!({"server": "api-1", "zone": ["a"]})))
        .unwrap()
        .unwrap();
    let record = RecordBuilder::default().build(Flags::STANDARD, &dummy_request(), Some(&extra));
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["additional_parameters"], json!({"server": "api-1", "zone": ["a"]}));
}

// =============================================================================
// Redaction
// =============================================================================

#[test]
fn test_authorization_never_leaks_credentials() {
    let pattern = Regex::new(r"^[A-Za-z]+ \*\*\*$").unwrap();
    for value in ["Bearer abc.def.ghi", "Basic dXNlcjpwYXNz", "Token    spaced  secret"] {
        let ctx = RequestContext::new("GET", "/").with_header("authorization", value);
        let record = RecordBuilder::default().build(Flags::REQUEST_HEADERS, &ctx, None);
        let masked = record.request_headers.unwrap()["authorization"].clone().unwrap();
        assert!(pattern.is_match(&masked), "{masked:?} leaks credentials");
    }
}

#[test]
fn test_blank_authorization_is_fully_masked() {
    // No scheme to keep, so nothing of the original value survives.
    for value in ["", "   "] {
        let ctx = RequestContext::new("GET", "/").with_header("Authorization", value);
        let record = RecordBuilder::default().build(Flags::REQUEST_HEADERS, &ctx, None);
        let headers = record.request_headers.unwrap();
        assert_eq!(headers["Authorization"].as_deref(), Some("***"));
    }
}

#[test]
fn test_body_length_bounded_by_limit() {
    let limit = 32;
    for size in [0usize, 1, 31, 32, 33, 500] {
        let ctx = RequestContext::new("POST", "/upload").with_body("é".repeat(size));
        let record = RecordBuilder::new(limit).build(Flags::REQUEST_BODY_RAW, &ctx, None);
        let body = record.request_body_raw.unwrap();
        assert!(body.len() <= limit + TRIMMED_MARKER.len(), "size {size}: {} bytes", body.len());
        assert_eq!(body.starts_with(TRIMMED_MARKER), size * 2 > limit);
    }
}

// =============================================================================
// Error records
// =============================================================================

#[test]
fn test_exception_record_with_user_id() {
    let cfg = SystemLogConfig::from_yaml_str(
        "log: terminal\nmatrix-exception:\n  \"app::errors::NotFound\": USER_ID\n",
    )
    .unwrap();
    let exception = ExceptionInfo::new("app::errors::NotFound", "user 7 not found").with_frames(vec![
        StackFrame::from_symbol("app::controllers::Dummy::get"),
        StackFrame::from_symbol("app::router::dispatch"),
    ]);
    let flags = cfg.exception_matrix().resolve(&exception.type_name);
    let ctx = RequestContext::new("GET", "/dummy/7").with_user("u-19");
    let failure = Failure {
        exception: &exception,
        errors: Some(&json!(["user 7 not found"])),
        status_code: Some(404),
    };

    let record = RecordBuilder::default().build_error(flags, &ctx, failure, None);

    assert_eq!(record.user_id, UserId::Id("u-19".into()));
    assert_eq!(record.exception_class.as_deref(), Some("app::errors::NotFound"));
    assert_eq!(record.errors, Some(json!(["user 7 not found"])));
    assert_eq!(record.response_status_code, Some(404));
    assert_eq!(
        record.call_trace.unwrap(),
        vec!["app::controllers::Dummy::get", "app::router::dispatch"]
    );
    assert!(record.response_timestamp >= record.request_timestamp);
}

#[test]
fn test_exception_record_without_trace_has_empty_call_trace() {
    let exception = ExceptionInfo::new("app::errors::Fatal", "boom");
    let failure = Failure { exception: &exception, errors: Some(&json!(null)), status_code: None };
    let record = RecordBuilder::default().build_error(Flags::EXCEPTION_STANDARD, &dummy_request(), failure, None);
    assert_eq!(record.call_trace, Some(Vec::new()));
    assert_eq!(record.errors, Some(json!([])));
    assert_eq!(record.response_status_code, Some(200));
}
