use reqlog_core::context::RequestContext;
use reqlog_core::exception::ExceptionInfo;
use reqlog_core::sink::Step;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A handler finished and the response is about to be sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub context: RequestContext,
    /// Identity of the invoked handler, e.g. `app::controllers::Dummy`.
    pub handler: String,
    /// Invoked method on the handler, e.g. `get`.
    pub action: String,
}

/// An error escaped request handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub context: RequestContext,
    #[serde(default)]
    pub errors: Option<Value>,
    #[serde(default)]
    pub status_code: Option<u16>,
    pub exception: ExceptionInfo,
}

/// One observed pipeline event. Serialised with a `step` tag so events can be
/// recorded as JSON lines and replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepEvent {
    AfterDispatch(DispatchEvent),
    Error(ErrorEvent),
}

impl StepEvent {
    pub fn step(&self) -> Step {
        match self {
            StepEvent::AfterDispatch(_) => Step::AfterDispatch,
            StepEvent::Error(_) => Step::Error,
        }
    }

    pub fn context(&self) -> &RequestContext {
        match self {
            StepEvent::AfterDispatch(e) => &e.context,
            StepEvent::Error(e) => &e.context,
        }
    }
}

impl From<DispatchEvent> for StepEvent {
    fn from(event: DispatchEvent) -> Self {
        StepEvent::AfterDispatch(event)
    }
}

impl From<ErrorEvent> for StepEvent {
    fn from(event: ErrorEvent) -> Self {
        StepEvent::Error(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_event_parses_from_tagged_json() {
        let line = r#"{"step":"after_dispatch","handler":"app::Dummy","action":"get",
            "context":{"method":"GET","uri":"/dummy"}}"#;
        let event: StepEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.step(), Step::AfterDispatch);
        assert_eq!(event.context().uri, "/dummy");
    }

    #[test]
    fn error_event_defaults_optional_fields() {
        let line = r#"{"step":"error","context":{"method":"GET","uri":"/x"},
            "exception":{"type_name":"app::NotFound","message":"gone"}}"#;
        let StepEvent::Error(event) = serde_json::from_str(line).unwrap() else {
            panic!("expected an error event");
        };
        assert!(event.errors.is_none());
        assert!(event.status_code.is_none());
        assert!(event.exception.frames.is_empty());
    }
}
