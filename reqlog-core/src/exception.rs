//! Exception capture: type name, summary and a framed call stack.

use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Type the function belongs to, when there is one.
    #[serde(default)]
    pub owner: Option<String>,
    pub function: String,
}

impl StackFrame {
    pub fn new(owner: Option<&str>, function: impl Into<String>) -> Self {
        Self {
            owner: owner.map(str::to_string),
            function: function.into(),
        }
    }

    /// Split a demangled symbol path into owner and function.
    ///
    /// The owner is the parent path when its last segment names a type
    /// (upper-case initial, or a `<T as Trait>` qualifier); otherwise the whole
    /// path is the function.
    pub fn from_symbol(symbol: &str) -> Self {
        let symbol = strip_hash(symbol.trim());
        let Some((parent, function)) = split_last_segment(symbol) else {
            return Self::new(None, symbol);
        };
        let last = parent.rsplit("::").next().unwrap_or(parent);
        let is_type = parent.starts_with('<')
            || last.chars().next().is_some_and(|c| c.is_ascii_uppercase());
        if is_type {
            Self::new(Some(parent), function)
        } else {
            Self::new(None, symbol)
        }
    }

    /// `Type::function`, or the bare function.
    pub fn render(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{owner}::{}", self.function),
            None => self.function.clone(),
        }
    }
}

/// Drop the `::h0123456789abcdef` disambiguator rustc appends to symbols.
fn strip_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => head,
        _ => symbol,
    }
}

/// Split on the last `::` that is not nested inside `<...>`.
fn split_last_segment(path: &str) -> Option<(&str, &str)> {
    let bytes = path.as_bytes();
    let mut depth = 0i32;
    let mut i = bytes.len();
    while i > 1 {
        i -= 1;
        match bytes[i] {
            b'>' => depth += 1,
            b'<' => depth -= 1,
            b':' if depth == 0 && bytes[i - 1] == b':' => {
                return Some((&path[..i - 1], &path[i + 1..]));
            }
            _ => {}
        }
    }
    None
}

/// Everything the core needs to know about an exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Fully-qualified type name; also the exception matrix key.
    pub type_name: String,
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
    /// Most-recent call first.
    #[serde(default)]
    pub frames: Vec<StackFrame>,
}

/// Serialized form stored in `LogRecord::exception`.
#[derive(Serialize)]
struct ExceptionSummary<'a> {
    class: &'a str,
    message: &'a str,
    code: Option<i64>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            code: None,
            frames: Vec::new(),
        }
    }

    /// Capture an error value. The type name comes from the static type,
    /// the message from `Display` plus the `source()` chain.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(std::any::type_name::<E>(), message)
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    /// Attach frames parsed from a captured backtrace. Leaves the frames
    /// untouched when the backtrace was not captured.
    pub fn with_backtrace(mut self, backtrace: &Backtrace) -> Self {
        if backtrace.status() == BacktraceStatus::Captured {
            self.frames = frames_from_backtrace(&backtrace.to_string());
        }
        self
    }

    /// Frames rendered as `Type::function` / `function`, order preserved.
    pub fn call_trace(&self) -> Vec<String> {
        self.frames.iter().map(StackFrame::render).collect()
    }

    /// JSON summary of the exception.
    pub fn summary(&self) -> String {
        let summary = ExceptionSummary {
            class: &self.type_name,
            message: &self.message,
            code: self.code,
        };
        serde_json::to_string(&summary).unwrap_or_else(|_| self.message.clone())
    }
}

/// Parse the symbol lines of a rendered `std::backtrace::Backtrace`:
///
/// ```text
///    0: app::handlers::Users::show
///              at ./src/handlers.rs:10:5
/// ```
pub fn frames_from_backtrace(rendered: &str) -> Vec<StackFrame> {
    rendered
        .lines()
        .filter_map(|line| {
            let (index, symbol) = line.trim_start().split_once(": ")?;
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some(StackFrame::from_symbol(symbol))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NotFound;

    impl std::fmt::Display for NotFound {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "resource not found")
        }
    }

    impl std::error::Error for NotFound {}

    #[test]
    fn method_symbol_splits_owner() {
        let frame = StackFrame::from_symbol("app::handlers::Users::show");
        assert_eq!(frame.owner.as_deref(), Some("app::handlers::Users"));
        assert_eq!(frame.function, "show");
        assert_eq!(frame.render(), "app::handlers::Users::show");
    }

    #[test]
    fn free_function_has_no_owner() {
        let frame = StackFrame::from_symbol("app::handlers::index");
        assert!(frame.owner.is_none());
        assert_eq!(frame.render(), "app::handlers::index");
    }

    #[test]
    fn bare_function() {
        let frame = StackFrame::from_symbol("main");
        assert!(frame.owner.is_none());
        assert_eq!(frame.render(), "main");
    }

    #[test]
    fn trait_qualified_owner() {
        let frame = StackFrame::from_symbol("<app::Db as core::ops::Drop>::drop");
        assert_eq!(frame.owner.as_deref(), Some("<app::Db as core::ops::Drop>"));
        assert_eq!(frame.function, "drop");
    }

    #[test]
    fn rustc_hash_is_stripped() {
        let frame = StackFrame::from_symbol("app::Users::show::h0123456789abcdef");
        assert_eq!(frame.render(), "app::Users::show");
    }

    #[test]
    fn backtrace_lines_are_parsed_in_order() {
        let rendered = "   0: app::Users::show\n             at ./src/users.rs:4:9\n   1: app::run\n   2: main\n";
        let frames = frames_from_backtrace(rendered);
        let trace: Vec<String> = frames.iter().map(StackFrame::render).collect();
        assert_eq!(trace, vec!["app::Users::show", "app::run", "main"]);
        assert_eq!(frames[0].owner.as_deref(), Some("app::Users"));
    }

    #[test]
    fn from_error_uses_type_name_and_message() {
        let info = ExceptionInfo::from_error(&NotFound);
        assert!(info.type_name.ends_with("NotFound"));
        assert_eq!(info.message, "resource not found");
    }

    #[test]
    fn summary_is_json() {
        let info = ExceptionInfo::new("errors::NotFound", "missing").with_code(404);
        let v: serde_json::Value = serde_json::from_str(&info.summary()).unwrap();
        assert_eq!(v["class"], "errors::NotFound");
        assert_eq!(v["message"], "missing");
        assert_eq!(v["code"], 404);
    }

    #[test]
    fn disabled_backtrace_keeps_frames() {
        let info = ExceptionInfo::new("E", "m")
            .with_frames(vec![StackFrame::new(None, "main")])
            .with_backtrace(&Backtrace::disabled());
        assert_eq!(info.call_trace(), vec!["main"]);
    }

    #[inline(never)]
    fn failing_handler() -> ExceptionInfo {
        ExceptionInfo::from_error(&NotFound).with_backtrace(&Backtrace::force_capture())
    }

    #[test]
    fn captured_backtrace_lists_callee_before_caller() {
        let trace = failing_handler().call_trace();
        let position = |name: &str| trace.iter().position(|frame| frame.ends_with(name));

        let handler = position("tests::failing_handler").expect("handler frame missing");
        let caller = position("tests::captured_backtrace_lists_callee_before_caller")
            .expect("caller frame missing");
        assert!(handler < caller, "{trace:?}");
    }
}
