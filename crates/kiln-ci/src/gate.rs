//! Publish gate: decides whether a test run allows publishing.

use kiln_core::EmptySuitePolicy;
use serde::{Deserialize, Serialize};

use crate::runner::TestRunResult;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether publishing may proceed.
    pub passed: bool,

    /// Reasons publishing is blocked (empty if passed).
    pub violations: Vec<String>,

    /// Non-blocking findings.
    pub warnings: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Publish gate rules.
pub struct PublishGate;

impl PublishGate {
    /// Evaluate a test run against the gate.
    ///
    /// Gate rules:
    /// - With `require_tests`, a missing test run blocks publishing
    /// - A non-zero test exit code blocks publishing, one violation per
    ///   failing test
    /// - A run without tests is handled by `empty_suite`
    pub fn evaluate(
        run: Option<&TestRunResult>,
        empty_suite: EmptySuitePolicy,
        require_tests: bool,
    ) -> GateVerdict {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        match run {
            None if require_tests => {
                violations.push("Tests did not run".to_string());
            }
            None => {}
            Some(run) => {
                if run.is_empty() {
                    match empty_suite {
                        EmptySuitePolicy::Allow => {}
                        EmptySuitePolicy::Warn => {
                            warnings.push("Test run executed zero tests".to_string())
                        }
                        EmptySuitePolicy::Fail => {
                            violations.push("Test run executed zero tests".to_string())
                        }
                    }
                }
                if !run.is_success() {
                    for failure in run.failures() {
                        violations.push(format!(
                            "Test '{}' {}",
                            failure.test_id,
                            match &failure.failure {
                                Some(detail) if !detail.message.is_empty() => {
                                    format!("failed: {}", detail.message)
                                }
                                _ => "failed".to_string(),
                            }
                        ));
                    }
                    violations.push(format!("Test exit code {}", run.exit_code));
                }
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            "Publish gate passed".to_string()
        } else {
            format!("Publish gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            warnings,
            message,
        }
    }
}
