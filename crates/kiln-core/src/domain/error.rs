//! Error taxonomy for Kiln pipelines.

/// Kiln errors.
///
/// Configuration-time variants abort the pipeline before any process is
/// launched. Stage-time variants are scoped to the stage that raised them.
#[derive(Debug, thiserror::Error)]
pub enum KilnError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("toolchain {version} unavailable: {reason}")]
    ToolchainUnavailable { version: u32, reason: String },

    #[error("dependency resolution failed for {artifact}: {reason}")]
    DependencyResolution { artifact: String, reason: String },

    #[error("agent resolution failed for {artifact}: {reason}")]
    AgentResolution { artifact: String, reason: String },

    #[error("compilation failed with exit code {exit_code}")]
    CompilationFailed { exit_code: i32, stderr: String },

    #[error("{failed} of {total} test(s) failed")]
    TestExecutionFailure { failed: usize, total: usize },

    #[error("test process crashed (exit code {exit_code}): {reason}")]
    TestProcessCrashed { exit_code: i32, reason: String },

    #[error("pipeline cancelled; test process exited with code {exit_code}")]
    Cancelled { exit_code: i32 },

    #[error("no coverage report format selected")]
    NoReportFormatSelected,

    #[error("incomplete coverage trace: {0}")]
    IncompleteTrace(String),

    #[error("packaging failed: {0}")]
    Archive(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("publish transport error: {0}")]
    PublishTransport(String),

    #[error("publish blocked by gate: {0}")]
    PublishBlocked(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid kiln.toml: {0}")]
    Toml(#[from] toml::de::Error),
}

impl KilnError {
    /// Whether this error was raised while reading declarative input, before
    /// any stage ran.
    pub fn is_configuration(&self) -> bool {
        matches!(self, KilnError::Configuration(_) | KilnError::Toml(_))
    }

    /// Whether the operator may retry the failed stage unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KilnError::PublishTransport(_))
    }

    /// Whether the error aborts the whole pipeline rather than a single stage.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            KilnError::TestExecutionFailure { .. }
                | KilnError::NoReportFormatSelected
                | KilnError::IncompleteTrace(_)
                | KilnError::Signing(_)
                | KilnError::PublishTransport(_)
                | KilnError::PublishBlocked(_)
        )
    }
}

/// Result type for Kiln operations.
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kiln_error_display() {
        let err = KilnError::Configuration("VERSION_NAME is missing".to_string());
        assert!(err.to_string().contains("configuration error"));

        let err = KilnError::ToolchainUnavailable {
            version: 21,
            reason: "not found".to_string(),
        };
        assert!(err.to_string().contains("toolchain 21"));

        let err = KilnError::TestExecutionFailure {
            failed: 1,
            total: 3,
        };
        assert_eq!(err.to_string(), "1 of 3 test(s) failed");
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let err = KilnError::Configuration("bad".to_string());
        assert!(err.is_configuration());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_stage_scoped_errors() {
        assert!(!KilnError::NoReportFormatSelected.is_fatal());
        assert!(!KilnError::Signing("no key".to_string()).is_fatal());

        let transport = KilnError::PublishTransport("503".to_string());
        assert!(!transport.is_fatal());
        assert!(transport.is_retryable());

        let crashed = KilnError::TestProcessCrashed {
            exit_code: 134,
            reason: "agent failed to load".to_string(),
        };
        assert!(crashed.is_fatal());
        assert!(!crashed.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: KilnError = io.into();
        assert!(err.to_string().contains("io error"));
    }
}
