//! Loads a project from disk and resolves its classpaths against a local
//! repository.

use kiln_core::{resolve_all, DependencyResolver, DependencySpec, LocalRepository, PipelineConfig, Scope};
use std::path::{Path, PathBuf};

const KILN_TOML: &str = r#"
[project]
name = "embedhttp"

[toolchain]
language_version = 21

[[dependencies]]
name = "org.junit.jupiter:junit-jupiter"
version = "5.10.0"
scope = "test_only"

[[dependencies]]
name = "org.junit.jupiter:junit-jupiter"
version = "5.12.1"
scope = "test_only"

[[dependencies]]
name = "org.jacoco:org.jacoco.agent"
version = "0.8.11"
scope = "agent_only"
transitive = false

[agent]
artifact = "org.jacoco:org.jacoco.agent"

[test]
command = ["java", "-jar", "junit-console.jar"]

[publish]
target = "registry_default"
"#;

fn publish(root: &Path, group: &str, artifact: &str, version: &str, deps: &[&str]) -> PathBuf {
    let dir = root
        .join(group.replace('.', "/"))
        .join(artifact)
        .join(version);
    std::fs::create_dir_all(&dir).unwrap();
    let jar = dir.join(format!("{artifact}-{version}.jar"));
    std::fs::write(&jar, b"PK").unwrap();
    std::fs::write(dir.join(format!("{artifact}-{version}.jar.sha1")), b"da39a3ee").unwrap();
    std::fs::write(dir.join(format!("{artifact}-{version}.pom")), b"<project/>").unwrap();
    if !deps.is_empty() {
        std::fs::write(dir.join("deps"), deps.join("\n")).unwrap();
    }
    jar
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("kiln.toml"), KILN_TOML).unwrap();
    std::fs::write(
        dir.path().join("gradle.properties"),
        "# release coordinates\nGROUP=net.uiqui\nVERSION_NAME=1.4.0\n",
    )
    .unwrap();
    dir
}

/// Test: redeclared dependencies keep the last version
#[test]
fn test_load_from_disk_last_declaration_wins() {
    let dir = project();
    let config = PipelineConfig::load(dir.path()).unwrap();

    assert_eq!(config.identity.coordinates(), "net.uiqui:embedhttp:1.4.0");
    assert_eq!(config.dependencies.len(), 2);
    let junit = config
        .dependencies
        .get("org.junit.jupiter:junit-jupiter", Scope::TestOnly)
        .unwrap();
    assert_eq!(junit.version, "5.12.1");
    assert_eq!(config.repository, dir.path().join("repository"));
}

/// Test: the test classpath is transitive, the agent is not
#[tokio::test]
async fn test_resolve_project_classpaths() {
    let dir = project();
    let config = PipelineConfig::load(dir.path()).unwrap();
    let repo_root = &config.repository;

    let junit = publish(
        repo_root,
        "org.junit.jupiter",
        "junit-jupiter",
        "5.12.1",
        &["org.opentest4j:opentest4j:1.3.0"],
    );
    let opentest = publish(repo_root, "org.opentest4j", "opentest4j", "1.3.0", &[]);
    let agent = publish(
        repo_root,
        "org.jacoco",
        "org.jacoco.agent",
        "0.8.11",
        &["org.ow2.asm:asm:9.6"],
    );
    publish(repo_root, "org.ow2.asm", "asm", "9.6", &[]);

    let repo = LocalRepository::new(repo_root);
    let test_files = resolve_all(&repo, &config.dependencies.test_classpath())
        .await
        .unwrap();
    assert_eq!(test_files, vec![junit, opentest]);

    let agent_spec = &config.agent.as_ref().unwrap().artifact;
    assert!(!agent_spec.transitive);
    assert_eq!(repo.resolve(agent_spec).await.unwrap(), vec![agent]);
}

/// Test: poms, checksums and classifier jars never reach the classpath
#[tokio::test]
async fn test_repository_metadata_files_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let agent = publish(dir.path(), "org.jacoco", "org.jacoco.agent", "0.8.11", &[]);
    let version_dir = agent.parent().unwrap();
    std::fs::write(version_dir.join("org.jacoco.agent-0.8.11-sources.jar"), b"PK").unwrap();
    std::fs::write(version_dir.join("_remote.repositories"), b"").unwrap();

    let repo = LocalRepository::new(dir.path());
    let spec = DependencySpec {
        name: "org.jacoco:org.jacoco.agent".to_string(),
        version: "0.8.11".to_string(),
        scope: Scope::AgentOnly,
        transitive: false,
    };
    assert_eq!(repo.resolve(&spec).await.unwrap(), vec![agent]);
}

/// Test: missing identity properties stop loading
#[test]
fn test_missing_version_is_configuration_error() {
    let dir = project();
    std::fs::write(dir.path().join("gradle.properties"), "GROUP=net.uiqui\n").unwrap();

    let err = PipelineConfig::load(dir.path()).unwrap_err();
    assert!(err.is_configuration(), "unexpected error: {err}");
}
