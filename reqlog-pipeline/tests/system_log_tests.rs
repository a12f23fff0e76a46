use reqlog_core::config::{DatabaseLogConfig, SystemLogConfig};
use reqlog_core::context::RequestContext;
use reqlog_core::error::ReqlogError;
use reqlog_core::exception::{ExceptionInfo, StackFrame};
use reqlog_core::flags::Flags;
use reqlog_core::record::UserId;
use reqlog_core::sink::{SinkError, Step, WriteOutcome};
use reqlog_pipeline::{DispatchEvent, ErrorEvent, HookRegistrar, Outcome, StepCallbacks, StepEvent, SystemLog};
use reqlog_sink::{DatabaseSink, MemorySink};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const DUMMY: &str = "app::controllers::Dummy";
const NOT_FOUND: &str = "app::errors::NotFound";

fn config(matrix: &[(&str, Flags)], exceptions: &[(&str, Flags)]) -> SystemLogConfig {
    SystemLogConfig {
        log: Some("terminal".into()),
        matrix: matrix.iter().map(|(k, f)| (k.to_string(), *f)).collect(),
        matrix_exception: exceptions.iter().map(|(k, f)| (k.to_string(), *f)).collect(),
        ..Default::default()
    }
}

fn spy_log(cfg: &SystemLogConfig) -> (Arc<SystemLog>, Arc<MemorySink>) {
    let spy = Arc::new(MemorySink::new());
    let log = SystemLog::new(cfg, Box::new(Arc::clone(&spy)));
    (Arc::new(log), spy)
}

fn dispatch(action: &str) -> StepEvent {
    StepEvent::AfterDispatch(DispatchEvent {
        context: RequestContext::new("GET", "/dummy")
            .with_header("User-Agent", "test-agent")
            .with_params(json!({"page": 1}))
            .with_response(200, Some("[]".into())),
        handler: DUMMY.into(),
        action: action.into(),
    })
}

fn not_found() -> StepEvent {
    StepEvent::Error(ErrorEvent {
        context: RequestContext::new("GET", "/dummy/9").with_user("u-7"),
        errors: None,
        status_code: Some(404),
        exception: ExceptionInfo::new(NOT_FOUND, "no dummy 9")
            .with_frames(vec![StackFrame::new(Some(DUMMY), "get")]),
    })
}

/// Every combination of the non-IGNORE flags.
fn all_flag_combinations() -> Vec<Flags> {
    let named: Vec<Flags> = Flags::NAMED
        .iter()
        .map(|(_, f)| *f)
        .filter(|f| *f != Flags::IGNORE)
        .collect();
    (0u32..(1 << named.len()))
        .map(|mask| {
            named
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .fold(Flags::STANDARD, |acc, (_, f)| acc | *f)
        })
        .collect()
}

// =============================================================================
// IGNORE
// =============================================================================

#[test]
fn test_ignore_never_reaches_sink_for_dispatch() {
    for flags in all_flag_combinations() {
        let cfg = config(&[("app::controllers::Dummy::get", flags | Flags::IGNORE)], &[]);
        let (log, spy) = spy_log(&cfg);
        let outcome = log.handle(&dispatch("get"), None).unwrap();
        assert_eq!(outcome, Outcome::Ignored, "flags {flags}");
        assert_eq!(spy.len(), 0, "flags {flags}");
    }
}

#[test]
fn test_ignore_never_reaches_sink_for_errors() {
    for flags in all_flag_combinations() {
        let cfg = config(&[], &[(NOT_FOUND, flags | Flags::IGNORE)]);
        let (log, spy) = spy_log(&cfg);
        assert_eq!(log.handle(&not_found(), None).unwrap(), Outcome::Ignored);
        assert_eq!(spy.len(), 0, "flags {flags}");
    }
}

// =============================================================================
// Registered hooks
// =============================================================================

#[test]
fn test_registered_dispatch_hook_writes_flagged_fields() {
    let cfg = config(&[("app::controllers::Dummy::get", Flags::REQUEST_PARAMS | Flags::RESPONSE_BODY)], &[]);
    let (log, spy) = spy_log(&cfg);
    let mut bus = StepCallbacks::new();
    log.register(&mut bus, Some(json!({"server": "api-1"}))).unwrap();
    assert_eq!(bus.count(Step::AfterDispatch), 1);
    assert_eq!(bus.count(Step::Error), 1);

    let results = bus.invoke(&dispatch("get"));
    assert!(matches!(results[..], [Ok(Outcome::Written(WriteOutcome::Written))]));

    let (step, record) = spy.last().unwrap();
    assert_eq!(step, Step::AfterDispatch);
    assert_eq!(record.request_params, Some(json!({"page": 1})));
    assert_eq!(record.response_body.as_deref(), Some("[]"));
    assert!(record.request_headers.is_none());
    assert_eq!(record.additional_parameters.unwrap().as_value(), &json!({"server": "api-1"}));
}

#[test]
fn test_unmatched_dispatch_writes_standard_record() {
    let (log, spy) = spy_log(&config(&[("app::controllers::Dummy::get", Flags::USER_ID)], &[]));
    log.handle(&dispatch("post"), None).unwrap();
    let (_, record) = spy.last().unwrap();
    assert_eq!(record.flags, Flags::STANDARD);
    assert_eq!(record.user_id, UserId::NotRequested);
    assert!(record.request_params.is_none());
}

#[test]
fn test_registered_error_hook_writes_exception_record() {
    let (log, spy) = spy_log(&config(&[], &[(NOT_FOUND, Flags::USER_ID)]));
    let mut bus = StepCallbacks::new();
    log.register(&mut bus, None).unwrap();

    bus.invoke(&not_found());

    let (step, record) = spy.last().unwrap();
    assert_eq!(step, Step::Error);
    assert_eq!(record.user_id, UserId::Id("u-7".into()));
    assert_eq!(record.exception_class.as_deref(), Some(NOT_FOUND));
    assert_eq!(record.errors, Some(json!([])));
    assert_eq!(record.response_status_code, Some(404));
    assert_eq!(record.call_trace.unwrap(), vec!["app::controllers::Dummy::get"]);
    assert!(record.additional_parameters.is_none());
}

#[test]
fn test_error_without_authenticated_user_records_false() {
    let (log, spy) = spy_log(&config(&[], &[(NOT_FOUND, Flags::USER_ID)]));
    let StepEvent::Error(mut event) = not_found() else {
        unreachable!();
    };
    event.context.user_id = None;

    log.on_error(&event, None).unwrap();

    let (_, record) = spy.last().unwrap();
    assert_eq!(record.user_id, UserId::Anonymous);
    assert_eq!(serde_json::to_value(&record).unwrap()["user_id"], json!(false));
}

#[test]
fn test_scalar_additional_parameters_rejected() {
    let (log, _) = spy_log(&config(&[], &[]));
    let mut bus = StepCallbacks::new();
    let err = log.register(&mut bus, Some(json!("api-1"))).unwrap_err();
    assert!(matches!(err, ReqlogError::CallerContract(_)));
    assert!(bus.is_empty());
}

#[test]
fn test_multiple_instances_with_different_matrices() {
    let (quiet, quiet_spy) = spy_log(&config(&[("app::controllers::Dummy::get", Flags::IGNORE)], &[]));
    let (loud, loud_spy) = spy_log(&config(&[], &[]));
    let mut bus = StepCallbacks::new();
    quiet.register(&mut bus, None).unwrap();
    loud.register(&mut bus, Some(json!(["tenant-a"]))).unwrap();

    let results = bus.invoke(&dispatch("get"));
    assert_eq!(results.len(), 2);
    assert_eq!(quiet_spy.len(), 0);
    assert_eq!(loud_spy.len(), 1);
    assert_eq!(quiet.flags_for(&dispatch("get")), Flags::IGNORE);
}

// =============================================================================
// Failure propagation
// =============================================================================

#[test]
fn test_database_failure_propagates_to_caller() {
    // No table created: every insert fails.
    let sink = DatabaseSink::new(Some(&DatabaseLogConfig::new("sqlite", ":memory:"))).unwrap();
    let log = Arc::new(SystemLog::new(&config(&[], &[]), Box::new(sink)));
    let mut bus = StepCallbacks::new();
    log.register(&mut bus, None).unwrap();

    let results = bus.invoke(&dispatch("get"));
    assert!(matches!(results[0], Err(ReqlogError::Sink(SinkError::Database(_)))));
}

#[test]
fn test_database_sink_returns_row_id() {
    let sink = DatabaseSink::new(Some(&DatabaseLogConfig::new("sqlite", ":memory:"))).unwrap();
    sink.create_table().unwrap();
    let log = SystemLog::new(&config(&[], &[]), Box::new(sink));
    let outcome = log.handle(&dispatch("get"), None).unwrap();
    assert!(matches!(outcome, Outcome::Written(WriteOutcome::Inserted { .. })));
    log.shutdown();
}

#[test]
fn test_from_config_requires_log_setting() {
    let cfg = SystemLogConfig { log: None, matrix: HashMap::new(), ..Default::default() };
    let err = SystemLog::from_config(&cfg).err().unwrap();
    assert_eq!(err.to_string(), "Config error: system-log.log setting is not set");
}

#[test]
fn test_custom_registrar_receives_both_hooks() {
    struct Recorder(Vec<Step>);
    impl HookRegistrar for Recorder {
        fn add(&mut self, step: Step, _hook: reqlog_pipeline::Hook) {
            self.0.push(step);
        }
    }

    let (log, _) = spy_log(&config(&[], &[]));
    let mut recorder = Recorder(Vec::new());
    log.register(&mut recorder, None).unwrap();
    assert_eq!(recorder.0, vec![Step::AfterDispatch, Step::Error]);
}

#[test]
fn test_custom_user_lookup_feeds_user_id() {
    let spy = Arc::new(MemorySink::new());
    let cfg = config(&[("app::controllers::Dummy::get", Flags::USER_ID)], &[]);
    let log = SystemLog::new(&cfg, Box::new(Arc::clone(&spy)))
        .with_user_lookup(Arc::new(|ctx: &RequestContext| ctx.get_header("X-User").map(str::to_string)));
    assert_eq!(log.sink_name(), "memory");

    let StepEvent::AfterDispatch(mut event) = dispatch("get") else {
        unreachable!();
    };
    event.context = event.context.with_header("X-User", "svc-batch");
    log.after_dispatch(&event, None).unwrap();

    assert_eq!(spy.last().unwrap().1.user_id, UserId::Id("svc-batch".into()));
}
