//! Per-test events streamed by the test process.
//!
//! The test process writes one JSON object per stdout line:
//!
//! ```text
//! {"event":"started","test":"RouterTest.matchesPath"}
//! {"event":"failed","test":"RouterTest.matchesPath","failure":{"exception":"java.lang.AssertionError","message":"expected 200","stack_trace":["at RouterTest.matchesPath(RouterTest.java:42)"]}}
//! {"event":"skipped","test":"IOServerTest.tls","reason":"no keystore"}
//! ```
//!
//! Raw stderr lines become `standard_error` events with no test id.

use kiln_core::TestLogEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Final status of one test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    /// Failed and errored tests make the run fail.
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }

    /// Precedence when a test reports more than one terminal status.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            TestStatus::Passed => 0,
            TestStatus::Skipped => 1,
            TestStatus::Failed => 2,
            TestStatus::Error => 3,
        }
    }
}

/// One link in an exception cause chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cause {
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

/// Full failure detail: message, cause chain and stack trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub causes: Vec<Cause>,
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Render every cause and stack frame; nothing is truncated.
    pub fn render_full(&self) -> String {
        let mut out = String::new();
        push_throwable(&mut out, self.exception.as_deref(), &self.message, &self.stack_trace);
        for cause in &self.causes {
            out.push_str("\nCaused by: ");
            push_throwable(&mut out, cause.exception.as_deref(), &cause.message, &cause.stack_trace);
        }
        out
    }
}

fn push_throwable(out: &mut String, exception: Option<&str>, message: &str, frames: &[String]) {
    match (exception, message.is_empty()) {
        (Some(exception), false) => out.push_str(&format!("{exception}: {message}")),
        (Some(exception), true) => out.push_str(exception),
        (None, _) => out.push_str(message),
    }
    for frame in frames {
        out.push_str("\n    ");
        let frame = frame.trim();
        if !frame.starts_with("at ") && !frame.starts_with("...") {
            out.push_str("at ");
        }
        out.push_str(frame);
    }
}

/// An event emitted while the test process runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestEvent {
    Started {
        test: String,
    },
    Passed {
        test: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    Failed {
        test: String,
        #[serde(default)]
        failure: Failure,
    },
    Skipped {
        test: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        test: String,
        #[serde(default)]
        failure: Failure,
    },
    StandardOut {
        #[serde(default)]
        test: Option<String>,
        line: String,
    },
    StandardError {
        #[serde(default)]
        test: Option<String>,
        line: String,
    },
}

impl TestEvent {
    /// Parse a stdout line; `None` for anything that is not an event.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    pub fn test_id(&self) -> Option<&str> {
        match self {
            TestEvent::Started { test }
            | TestEvent::Passed { test, .. }
            | TestEvent::Failed { test, .. }
            | TestEvent::Skipped { test, .. }
            | TestEvent::Error { test, .. } => Some(test),
            TestEvent::StandardOut { test, .. } | TestEvent::StandardError { test, .. } => {
                test.as_deref()
            }
        }
    }

    /// Terminal status carried by this event, if any.
    pub fn status(&self) -> Option<TestStatus> {
        match self {
            TestEvent::Passed { .. } => Some(TestStatus::Passed),
            TestEvent::Failed { .. } => Some(TestStatus::Failed),
            TestEvent::Skipped { .. } => Some(TestStatus::Skipped),
            TestEvent::Error { .. } => Some(TestStatus::Error),
            _ => None,
        }
    }

    /// Log category used to filter what is written while tests run.
    pub fn log_kind(&self) -> TestLogEvent {
        match self {
            TestEvent::Started { .. } => TestLogEvent::Started,
            TestEvent::Passed { .. } => TestLogEvent::Passed,
            TestEvent::Failed { .. } | TestEvent::Error { .. } => TestLogEvent::Failed,
            TestEvent::Skipped { .. } => TestLogEvent::Skipped,
            TestEvent::StandardOut { .. } => TestLogEvent::StandardOut,
            TestEvent::StandardError { .. } => TestLogEvent::StandardError,
        }
    }
}

/// Receives test events in real time, in arrival order.
pub trait TestEventSink: Send + Sync {
    fn on_event(&self, event: &TestEvent);
}

impl<T: TestEventSink + ?Sized> TestEventSink for Arc<T> {
    fn on_event(&self, event: &TestEvent) {
        (**self).on_event(event)
    }
}

/// Writes selected test events to the tracing log.
///
/// Failures are always logged with the full exception chain.
#[derive(Debug, Clone)]
pub struct LoggingSink {
    events: BTreeSet<TestLogEvent>,
}

impl LoggingSink {
    pub fn new(events: BTreeSet<TestLogEvent>) -> Self {
        Self { events }
    }
}

impl TestEventSink for LoggingSink {
    fn on_event(&self, event: &TestEvent) {
        if !self.events.contains(&event.log_kind()) {
            return;
        }

        match event {
            TestEvent::Started { test } => info!(test = %test, "STARTED"),
            TestEvent::Passed { test, .. } => info!(test = %test, "PASSED"),
            TestEvent::Skipped { test, reason } => {
                info!(test = %test, reason = reason.as_deref().unwrap_or(""), "SKIPPED")
            }
            TestEvent::Failed { test, failure } => {
                error!(test = %test, "FAILED\n{}", failure.render_full())
            }
            TestEvent::Error { test, failure } => {
                error!(test = %test, "ERROR\n{}", failure.render_full())
            }
            TestEvent::StandardOut { test, line } => {
                info!(test = test.as_deref().unwrap_or("-"), "{line}")
            }
            TestEvent::StandardError { test, line } => {
                warn!(test = test.as_deref().unwrap_or("-"), "{line}")
            }
        }
    }
}

/// Fans an event out to several sinks.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn TestEventSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn TestEventSink>>) -> Self {
        Self { sinks }
    }
}

impl TestEventSink for CompositeSink {
    fn on_event(&self, event: &TestEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        let started = TestEvent::parse_line(r#"{"event":"started","test":"a"}"#).unwrap();
        assert_eq!(started, TestEvent::Started { test: "a".into() });
        assert_eq!(started.status(), None);

        let skipped =
            TestEvent::parse_line(r#"{"event":"skipped","test":"b","reason":"disabled"}"#).unwrap();
        assert_eq!(skipped.status(), Some(TestStatus::Skipped));
        assert_eq!(skipped.test_id(), Some("b"));

        let stderr = TestEvent::parse_line(r#"{"event":"standard_error","line":"warn"}"#).unwrap();
        assert_eq!(stderr.test_id(), None);
        assert_eq!(stderr.log_kind(), TestLogEvent::StandardError);
    }

    #[test]
    fn test_parse_ignores_plain_output() {
        assert!(TestEvent::parse_line("Running 3 tests").is_none());
        assert!(TestEvent::parse_line("{not json").is_none());
        assert!(TestEvent::parse_line(r#"{"event":"unknown","test":"x"}"#).is_none());
    }

    #[test]
    fn test_failure_render_full_includes_cause_chain() {
        let line = r#"{"event":"failed","test":"RouterTest.match","failure":{
            "exception":"java.lang.IllegalStateException",
            "message":"route missing",
            "stack_trace":["at Router.route(Router.java:10)","RouterTest.match(RouterTest.java:5)"],
            "causes":[{"exception":"java.io.IOException","message":"closed","stack_trace":["at IOServer.read(IOServer.java:77)"]}]
        }}"#
        .replace('\n', " ");
        let event = TestEvent::parse_line(&line).unwrap();
        let TestEvent::Failed { failure, .. } = event else {
            panic!("expected failed event");
        };

        let rendered = failure.render_full();
        assert!(rendered.starts_with("java.lang.IllegalStateException: route missing"));
        assert!(rendered.contains("\n    at Router.route(Router.java:10)"));
        assert!(rendered.contains("\n    at RouterTest.match(RouterTest.java:5)"));
        assert!(rendered.contains("\nCaused by: java.io.IOException: closed"));
        assert!(rendered.contains("\n    at IOServer.read(IOServer.java:77)"));
    }

    #[test]
    fn test_status_rank() {
        assert!(TestStatus::Error.rank() > TestStatus::Failed.rank());
        assert!(TestStatus::Failed.rank() > TestStatus::Passed.rank());
        assert!(TestStatus::Error.is_failure());
        assert!(!TestStatus::Skipped.is_failure());
    }
}
