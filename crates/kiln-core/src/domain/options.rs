//! Value types that select pipeline behaviour: toolchain, report formats,
//! publish target and test logging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::error::{KilnError, Result};

/// Language runtime version used for both compilation and test execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ToolchainSpec {
    pub language_version: u32,
}

impl ToolchainSpec {
    pub fn new(language_version: u32) -> Result<Self> {
        if language_version == 0 {
            return Err(KilnError::Configuration(
                "toolchain language_version must be positive".to_string(),
            ));
        }
        Ok(Self { language_version })
    }
}

/// Coverage report formats. At least one must be enabled for a report to be
/// produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportFormats {
    /// Machine-readable XML table.
    #[serde(default)]
    pub xml: bool,

    /// Comma-separated per-source summary.
    #[serde(default)]
    pub csv: bool,

    /// Human-readable HTML page.
    #[serde(default)]
    pub html: bool,
}

impl ReportFormats {
    pub fn none() -> Self {
        Self {
            xml: false,
            csv: false,
            html: false,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.xml || self.csv || self.html
    }
}

impl Default for ReportFormats {
    fn default() -> Self {
        Self {
            xml: true,
            csv: false,
            html: true,
        }
    }
}

/// Registry endpoint an artifact is published to.
///
/// Fixed per configuration; the publisher never falls back from one to the
/// other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PublishTarget {
    /// Legacy staging host (`oss.sonatype.org`).
    #[serde(alias = "default")]
    RegistryDefault,

    /// Central Portal publisher API (`central.sonatype.com`).
    #[serde(alias = "central_portal")]
    RegistryCentralPortal,
}

impl PublishTarget {
    pub fn name(&self) -> &'static str {
        match self {
            PublishTarget::RegistryDefault => "registry_default",
            PublishTarget::RegistryCentralPortal => "registry_central_portal",
        }
    }
}

impl std::fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-test event kinds that are written to the log while tests execute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestLogEvent {
    Started,
    Passed,
    Failed,
    Skipped,
    StandardOut,
    StandardError,
}

/// Default logged events: failed, standard error, skipped and passed.
pub fn default_test_log_events() -> BTreeSet<TestLogEvent> {
    [
        TestLogEvent::Failed,
        TestLogEvent::StandardError,
        TestLogEvent::Skipped,
        TestLogEvent::Passed,
    ]
    .into_iter()
    .collect()
}

/// What to do when a test run executes zero tests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmptySuitePolicy {
    Allow,
    #[default]
    Warn,
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolchain_spec_rejects_zero() {
        assert!(ToolchainSpec::new(0).is_err());
        assert_eq!(ToolchainSpec::new(21).unwrap().language_version, 21);
    }

    #[test]
    fn test_report_formats() {
        assert!(!ReportFormats::none().any_enabled());
        assert!(ReportFormats::default().any_enabled());
        let csv_only = ReportFormats {
            csv: true,
            ..ReportFormats::none()
        };
        assert!(csv_only.any_enabled());
    }

    #[test]
    fn test_publish_target_aliases() {
        let t: PublishTarget = serde_json::from_str("\"central_portal\"").unwrap();
        assert_eq!(t, PublishTarget::RegistryCentralPortal);
        let t: PublishTarget = serde_json::from_str("\"registry_default\"").unwrap();
        assert_eq!(t, PublishTarget::RegistryDefault);
        assert_eq!(t.to_string(), "registry_default");
    }

    #[test]
    fn test_default_log_events() {
        let events = default_test_log_events();
        assert_eq!(events.len(), 4);
        assert!(events.contains(&TestLogEvent::StandardError));
        assert!(!events.contains(&TestLogEvent::Started));
    }
}
