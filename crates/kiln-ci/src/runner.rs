//! Instrumented test execution.
//!
//! The test process is launched once under the selected toolchain with the
//! agent arguments injected. Stdout is parsed as a stream of [`TestEvent`]s
//! and forwarded to the event sink as each line arrives; stderr lines are
//! forwarded as `standard_error` events. Coverage traces are sealed only
//! after the process has exited.

use kiln_core::{CommandConfig, KilnError, Result};
use kiln_toolchain::Toolchain;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::coverage::TraceSet;
use crate::events::{Failure, TestEvent, TestEventSink, TestStatus};
use crate::launch::{toolchain_command, ENV_CLASSES_DIR, ENV_COVERAGE_DIR, ENV_TEST_CLASSPATH};

/// Stderr lines kept for crash diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Result recorded for one test.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TestOutcome {
    pub test_id: String,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Counts recorded in the pipeline report.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub exit_code: i32,
}

/// Outcome of one test-process run.
#[derive(Debug, Clone)]
pub struct TestRunResult {
    /// Outcomes in the order tests were first reported.
    pub outcomes: Vec<TestOutcome>,

    /// Non-zero whenever any test failed.
    pub exit_code: i32,

    /// Exit code of the test process itself.
    pub process_exit_code: i32,

    pub duration_ms: u64,

    /// Traces written during the run; always sealed.
    pub traces: TraceSet,
}

impl TestRunResult {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failure()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// No test reported any event.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn summary(&self) -> TestSummary {
        TestSummary {
            total: self.total(),
            passed: self.count(TestStatus::Passed),
            failed: self.failed(),
            skipped: self.count(TestStatus::Skipped),
            exit_code: self.exit_code,
        }
    }

    /// Error describing a failed run, `None` when every test passed.
    pub fn to_error(&self) -> Option<KilnError> {
        (!self.is_success()).then(|| KilnError::TestExecutionFailure {
            failed: self.failed(),
            total: self.total(),
        })
    }
}

/// Everything the test process needs besides the toolchain.
#[derive(Debug, Clone)]
pub struct TestRunRequest {
    pub command: CommandConfig,
    pub working_dir: PathBuf,
    pub classpath: OsString,
    pub classes_dir: PathBuf,
    pub trace_dir: PathBuf,

    /// Launch arguments placed ahead of the configured arguments.
    pub agent_args: Vec<String>,
}

/// Runs the test process and collects per-test outcomes.
pub struct TestRunner {
    toolchain: Toolchain,
    sink: Arc<dyn TestEventSink>,
}

enum Interruption {
    Cancelled,
    TimedOut(u64),
}

impl TestRunner {
    pub fn new(toolchain: Toolchain, sink: Arc<dyn TestEventSink>) -> Self {
        Self { toolchain, sink }
    }

    pub async fn run(
        &self,
        request: &TestRunRequest,
        mut cancellation: Cancellation,
    ) -> Result<TestRunResult> {
        let start = Instant::now();
        let traces = TraceSet::open(&request.trace_dir)?;

        let mut command = toolchain_command(
            &self.toolchain,
            &request.command.command,
            &request.agent_args,
            &request.working_dir,
        )?;
        command
            .env(ENV_TEST_CLASSPATH, &request.classpath)
            .env(ENV_CLASSES_DIR, &request.classes_dir)
            .env(ENV_COVERAGE_DIR, traces.dir());

        info!(
            command = ?request.command.command,
            agent_args = request.agent_args.len(),
            "Launching test process"
        );
        let mut child = command.spawn().map_err(|e| KilnError::TestProcessCrashed {
            exit_code: -1,
            reason: format!("failed to launch {:?}: {e}", request.command.command[0]),
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<TestEvent>();

        let stdout = child.stdout.take();
        let stdout_tx = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            read_lines(stdout, |line| match TestEvent::parse_line(&line) {
                Some(event) => stdout_tx.send(event).is_ok(),
                None => {
                    debug!(line = %line, "Test process output");
                    true
                }
            })
            .await;
        });

        let stderr = child.stderr.take();
        let stderr_tx = tx;
        let stderr_task = tokio::spawn(async move {
            let Some(stderr) = stderr else { return };
            read_lines(stderr, |line| {
                stderr_tx
                    .send(TestEvent::StandardError { test: None, line })
                    .is_ok()
            })
            .await;
        });

        let timeout_secs = request.command.timeout_secs;
        let deadline = async move {
            if timeout_secs > 0 {
                tokio::time::sleep(Duration::from_secs(timeout_secs)).await
            } else {
                std::future::pending::<()>().await
            }
        };
        tokio::pin!(deadline);

        let mut collector = OutcomeCollector::default();

        // Drain events until both streams close, then wait for exit.
        let interruption = loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        self.sink.on_event(&event);
                        collector.record(event);
                    }
                    None => break None,
                },
                _ = cancellation.cancelled() => break Some(Interruption::Cancelled),
                _ = &mut deadline => break Some(Interruption::TimedOut(timeout_secs)),
            }
        };

        let waited = match interruption {
            Some(interruption) => Err(interruption),
            None => tokio::select! {
                status = child.wait() => Ok(status?),
                _ = cancellation.cancelled() => Err(Interruption::Cancelled),
                _ = &mut deadline => Err(Interruption::TimedOut(timeout_secs)),
            },
        };

        let status = match waited {
            Ok(status) => status,
            Err(interruption) => {
                let _ = child.start_kill();
                let status = child.wait().await?;
                stdout_task.abort();
                stderr_task.abort();
                let exit_code = status.code().unwrap_or(-1);
                return Err(match interruption {
                    Interruption::Cancelled => {
                        warn!(exit_code, "Test process cancelled");
                        KilnError::Cancelled { exit_code }
                    }
                    Interruption::TimedOut(secs) => KilnError::TestProcessCrashed {
                        exit_code,
                        reason: format!("timed out after {secs} seconds"),
                    },
                });
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let traces = traces.seal()?;
        let process_exit_code = status.code().unwrap_or(-1);
        let stderr_tail = collector.stderr_tail();
        let reported_failures = collector.reported_failures();

        // Killed by a signal, or a non-zero exit that no test accounts for.
        let crash = match status.code() {
            None => Some("process was terminated by a signal".to_string()),
            Some(code) if code != 0 && reported_failures == 0 => Some(format!(
                "process exited with code {code} without reporting a failed test"
            )),
            Some(_) => None,
        };
        if let Some(mut reason) = crash {
            if !stderr_tail.is_empty() {
                reason.push_str("; last stderr output:\n");
                reason.push_str(&stderr_tail);
            }
            return Err(KilnError::TestProcessCrashed {
                exit_code: process_exit_code,
                reason,
            });
        }

        let outcomes = collector.finish();
        let failed = outcomes.iter().filter(|o| o.status.is_failure()).count();

        let exit_code = match (failed, process_exit_code) {
            (0, _) => 0,
            (_, 0) => 1,
            (_, code) => code,
        };

        let result = TestRunResult {
            outcomes,
            exit_code,
            process_exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            traces,
        };

        let summary = result.summary();
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            exit_code,
            traces = result.traces.files().len(),
            "Test process finished"
        );
        Ok(result)
    }
}

/// Feed every line of `reader` to `on_line` until EOF or until it returns
/// `false`. Bytes that are not UTF-8 are replaced, never fatal.
async fn read_lines<R>(reader: R, mut on_line: impl FnMut(String) -> bool)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(mut bytes)) => {
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                if !on_line(String::from_utf8_lossy(&bytes).into_owned()) {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Test process stream closed");
                break;
            }
        }
    }
}

#[derive(Debug)]
struct PendingOutcome {
    test_id: String,
    status: Option<TestStatus>,
    failure: Option<Failure>,
    skip_reason: Option<String>,
    duration_ms: Option<u64>,
}

/// Folds the event stream into one outcome per test.
///
/// Tests keep the order they were first seen in. When a test reports more
/// than one terminal status the most severe one wins.
#[derive(Debug, Default)]
struct OutcomeCollector {
    outcomes: Vec<PendingOutcome>,
    index: HashMap<String, usize>,
    stderr: VecDeque<String>,
}

impl OutcomeCollector {
    fn entry(&mut self, test_id: &str) -> &mut PendingOutcome {
        let idx = match self.index.get(test_id) {
            Some(&idx) => idx,
            None => {
                self.outcomes.push(PendingOutcome {
                    test_id: test_id.to_string(),
                    status: None,
                    failure: None,
                    skip_reason: None,
                    duration_ms: None,
                });
                let idx = self.outcomes.len() - 1;
                self.index.insert(test_id.to_string(), idx);
                idx
            }
        };
        &mut self.outcomes[idx]
    }

    fn record(&mut self, event: TestEvent) {
        let status = event.status();
        match event {
            TestEvent::Started { test } => {
                self.entry(&test);
            }
            TestEvent::Passed { test, duration_ms } => {
                self.settle(&test, status, None, None, duration_ms);
            }
            TestEvent::Skipped { test, reason } => {
                self.settle(&test, status, None, reason, None);
            }
            TestEvent::Failed { test, failure } | TestEvent::Error { test, failure } => {
                self.settle(&test, status, Some(failure), None, None);
            }
            TestEvent::StandardError { test: None, line } => {
                if self.stderr.len() == STDERR_TAIL_LINES {
                    self.stderr.pop_front();
                }
                self.stderr.push_back(line);
            }
            TestEvent::StandardOut { .. } | TestEvent::StandardError { .. } => {}
        }
    }

    fn settle(
        &mut self,
        test_id: &str,
        status: Option<TestStatus>,
        failure: Option<Failure>,
        skip_reason: Option<String>,
        duration_ms: Option<u64>,
    ) {
        let Some(status) = status else { return };
        let entry = self.entry(test_id);
        let replace = entry.status.map_or(true, |current| status.rank() > current.rank());
        if replace {
            entry.status = Some(status);
            entry.failure = failure;
            entry.skip_reason = skip_reason;
            entry.duration_ms = duration_ms;
        }
    }

    /// Tests that reported `failed` or `error` themselves.
    fn reported_failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_some_and(|s| s.is_failure()))
            .count()
    }

    fn stderr_tail(&self) -> String {
        self.stderr.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn finish(self) -> Vec<TestOutcome> {
        self.outcomes
            .into_iter()
            .map(|pending| match pending.status {
                Some(status) => TestOutcome {
                    test_id: pending.test_id,
                    status,
                    failure: pending.failure,
                    skip_reason: pending.skip_reason,
                    duration_ms: pending.duration_ms,
                },
                None => TestOutcome {
                    test_id: pending.test_id,
                    status: TestStatus::Error,
                    failure: Some(Failure::new("test started but did not report a result")),
                    skip_reason: None,
                    duration_ms: None,
                },
            })
            .collect()
    }
}
