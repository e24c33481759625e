//! Kiln Core
//!
//! Domain model and configuration for the Kiln build pipeline:
//! - Project identity and manifest metadata
//! - Dependency declarations and the resolver seam
//! - `kiln.toml` / property-file configuration
//! - Error taxonomy and tracing setup

pub mod config;
pub mod domain;
pub mod fakes;
pub mod properties;
pub mod resolver;
pub mod telemetry;

pub use config::{AgentConfig, CommandConfig, PipelineConfig, PublishConfig, TestConfig};
pub use domain::{
    default_test_log_events, DependencySpec, DependencyTable, EmptySuitePolicy, KilnError,
    ManifestMetadata, ProjectIdentity, PublishTarget, ReportFormats, Result, Scope, TestLogEvent,
    ToolchainSpec,
};
pub use properties::ProjectProperties;
pub use resolver::{resolve_all, DependencyResolver, LocalRepository};
pub use telemetry::init_tracing;

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let digest = sha256_hex(b"kiln");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, sha256_hex(b"kiln"));
        assert_ne!(digest, sha256_hex(b"kiln2"));
    }
}
