//! Instrumentation agent preparation.
//!
//! The agent is resolved from its `agent_only` declaration without
//! transitive dependencies and must come down to exactly one file.

use kiln_core::{AgentConfig, DependencyResolver, KilnError, Result};
use std::path::PathBuf;
use tracing::info;

/// A resolved agent ready to be attached to the test process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAgent {
    /// Absolute path of the agent archive.
    pub path: PathBuf,

    /// Launch arguments that attach the agent.
    pub args: Vec<String>,
}

/// Resolve the agent artifact and build its launch argument.
pub async fn prepare_agent(
    resolver: &dyn DependencyResolver,
    config: &AgentConfig,
) -> Result<PreparedAgent> {
    let artifact = config.artifact.notation();
    let agent_error = |reason: String| KilnError::AgentResolution {
        artifact: artifact.clone(),
        reason,
    };

    let mut spec = config.artifact.clone();
    spec.transitive = false;

    let files = resolver.resolve(&spec).await.map_err(|e| match e {
        KilnError::DependencyResolution { reason, .. } => agent_error(reason),
        other => other,
    })?;

    let path = match files.as_slice() {
        [single] => single.clone(),
        [] => return Err(agent_error("resolved to 0 files".to_string())),
        many => {
            let listed: Vec<String> = many.iter().map(|p| p.display().to_string()).collect();
            return Err(agent_error(format!(
                "resolved to {} files: {}",
                many.len(),
                listed.join(", ")
            )));
        }
    };

    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()?.join(path)
    };
    if !path.is_file() {
        return Err(agent_error(format!("{} is not a file", path.display())));
    }

    info!(agent = %artifact, path = %path.display(), "Prepared instrumentation agent");
    let args = vec![format!("{}{}", config.flag, path.display())];
    Ok(PreparedAgent { path, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::fakes::MemoryResolver;
    use kiln_core::{DependencySpec, Scope};

    fn agent_config(transitive: bool) -> AgentConfig {
        AgentConfig {
            artifact: DependencySpec {
                name: "org.jacoco:org.jacoco.agent".to_string(),
                version: "0.8.11".to_string(),
                scope: Scope::AgentOnly,
                transitive,
            },
            flag: "-javaagent:".to_string(),
        }
    }

    #[tokio::test]
    async fn test_single_file_agent() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("agent.jar");
        std::fs::write(&jar, b"agent").unwrap();
        let dep = dir.path().join("asm.jar");
        std::fs::write(&dep, b"asm").unwrap();

        let resolver = MemoryResolver::new();
        resolver.add(
            "org.jacoco:org.jacoco.agent",
            "0.8.11",
            &[jar.to_str().unwrap()],
            &["org.ow2.asm:asm:9.6"],
        );
        resolver.add("org.ow2.asm:asm", "9.6", &[dep.to_str().unwrap()], &[]);

        // declared transitive, resolved without dependencies anyway
        let agent = prepare_agent(&resolver, &agent_config(true)).await.unwrap();
        assert_eq!(agent.path, jar);
        assert_eq!(agent.args, vec![format!("-javaagent:{}", jar.display())]);
    }

    #[tokio::test]
    async fn test_multiple_files_rejected() {
        let resolver = MemoryResolver::new();
        resolver.add(
            "org.jacoco:org.jacoco.agent",
            "0.8.11",
            &["/repo/agent.jar", "/repo/agent-sources.jar"],
            &[],
        );

        let err = prepare_agent(&resolver, &agent_config(false)).await.unwrap_err();
        match err {
            KilnError::AgentResolution { reason, .. } => assert!(reason.contains("2 files")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_agent_is_agent_error() {
        let resolver = MemoryResolver::new();
        let err = prepare_agent(&resolver, &agent_config(false)).await.unwrap_err();
        assert!(matches!(err, KilnError::AgentResolution { .. }));
    }

    #[tokio::test]
    async fn test_no_files_rejected() {
        let resolver = MemoryResolver::new();
        resolver.add("org.jacoco:org.jacoco.agent", "0.8.11", &[], &[]);
        let err = prepare_agent(&resolver, &agent_config(false)).await.unwrap_err();
        assert!(err.to_string().contains("resolved to 0 files"));
    }
}
