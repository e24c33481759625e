//! Pipeline configuration.
//!
//! A project is described by a `kiln.toml` file plus a property file that
//! supplies `GROUP` and `VERSION_NAME`. Both are read once and folded into an
//! immutable [`PipelineConfig`] that is passed explicitly to every stage.
//!
//! ```toml
//! [project]
//! name = "embedhttp"
//!
//! [toolchain]
//! language_version = 21
//! search_roots = ["/usr/lib/jvm"]
//!
//! [[dependencies]]
//! name = "org.mockito:mockito-core"
//! version = "5.17.0"
//! scope = "agent_only"
//! transitive = false
//!
//! [agent]
//! artifact = "org.mockito:mockito-core"
//!
//! [test]
//! command = ["java", "-jar", "tools/junit-console.jar"]
//!
//! [coverage]
//! xml = true
//! csv = true
//!
//! [publish]
//! target = "registry_central_portal"
//! ```

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::{
    default_test_log_events, DependencySpec, DependencyTable, EmptySuitePolicy, KilnError,
    ProjectIdentity, PublishTarget, ReportFormats, Result, Scope, TestLogEvent, ToolchainSpec,
};
use crate::properties::ProjectProperties;

/// Name of the pipeline file at the project root.
pub const CONFIG_FILE: &str = "kiln.toml";

const DEFAULT_AGENT_FLAG: &str = "-javaagent:";

// ---------------------------------------------------------------------------
// File schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    project: ProjectSection,
    toolchain: ToolchainSection,
    #[serde(default)]
    repository: RepositorySection,
    #[serde(default)]
    dependencies: Vec<DependencySpec>,
    agent: Option<AgentSection>,
    compile: Option<CommandConfig>,
    test: TestSection,
    #[serde(default)]
    coverage: ReportFormats,
    publish: PublishSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectSection {
    name: Option<String>,
    #[serde(default = "default_properties")]
    properties: PathBuf,
    #[serde(default = "default_build_dir")]
    build_dir: PathBuf,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: None,
            properties: default_properties(),
            build_dir: default_build_dir(),
        }
    }
}

fn default_properties() -> PathBuf {
    PathBuf::from("gradle.properties")
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolchainSection {
    language_version: u32,
    #[serde(default)]
    search_roots: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepositorySection {
    #[serde(default = "default_repository")]
    path: PathBuf,
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            path: default_repository(),
        }
    }
}

fn default_repository() -> PathBuf {
    PathBuf::from("repository")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AgentSection {
    artifact: String,
    #[serde(default = "default_agent_flag")]
    flag: String,
}

fn default_agent_flag() -> String {
    DEFAULT_AGENT_FLAG.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestSection {
    command: Vec<String>,
    #[serde(default)]
    timeout_secs: u64,
    #[serde(default = "default_test_log_events")]
    events: BTreeSet<TestLogEvent>,
    #[serde(default)]
    empty_suite: EmptySuitePolicy,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PublishSection {
    target: PublishTarget,
    #[serde(default = "default_true")]
    gate_on_tests: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// An external command run under the selected toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,

    /// Timeout in seconds, 0 for none.
    #[serde(default)]
    pub timeout_secs: u64,
}

/// Instrumentation agent attached to the test process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// The `agent_only` dependency that provides the agent.
    pub artifact: DependencySpec,

    /// Launch-argument prefix placed before the resolved path.
    pub flag: String,
}

/// Test execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConfig {
    pub run: CommandConfig,
    pub log_events: BTreeSet<TestLogEvent>,
    pub empty_suite: EmptySuitePolicy,
}

/// Publishing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishConfig {
    pub target: PublishTarget,

    /// Refuse to publish unless the test stage ran and passed.
    pub gate_on_tests: bool,
}

/// Immutable configuration for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_dir: PathBuf,
    pub build_dir: PathBuf,
    pub identity: ProjectIdentity,
    pub toolchain: ToolchainSpec,
    pub toolchain_search_roots: Vec<PathBuf>,
    pub repository: PathBuf,
    pub dependencies: DependencyTable,
    pub agent: Option<AgentConfig>,
    pub compile: Option<CommandConfig>,
    pub test: TestConfig,
    pub coverage: ReportFormats,
    pub publish: PublishConfig,
}

impl PipelineConfig {
    /// Load `kiln.toml` and the property file from `project_dir`, applying
    /// `KILN_*` environment overrides to the properties.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            KilnError::Configuration(format!("cannot read {}: {e}", config_path.display()))
        })?;

        let raw: RawConfig = toml::from_str(&content)?;
        let properties =
            ProjectProperties::load(&project_dir.join(&raw.project.properties))?.with_env_overrides();

        let config = Self::from_raw(project_dir, raw, &properties)?;
        info!(
            project = %config.identity.coordinates(),
            toolchain = config.toolchain.language_version,
            dependencies = config.dependencies.len(),
            target = %config.publish.target,
            "Loaded pipeline configuration"
        );
        Ok(config)
    }

    /// Build from `kiln.toml` text and already-loaded properties.
    pub fn from_toml_str(
        project_dir: &Path,
        content: &str,
        properties: &ProjectProperties,
    ) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        Self::from_raw(project_dir, raw, properties)
    }

    fn from_raw(project_dir: &Path, raw: RawConfig, properties: &ProjectProperties) -> Result<Self> {
        let name = match raw.project.name {
            Some(name) => name,
            None => default_project_name(project_dir)?,
        };
        let identity = properties.identity(&name)?;
        let toolchain = ToolchainSpec::new(raw.toolchain.language_version)?;

        let mut dependencies = DependencyTable::new();
        for spec in &raw.dependencies {
            dependencies.declare_spec(spec)?;
        }

        let agent = match raw.agent {
            Some(section) => {
                let artifact = dependencies
                    .get(&section.artifact, Scope::AgentOnly)
                    .cloned()
                    .ok_or_else(|| {
                        KilnError::Configuration(format!(
                            "agent artifact {} is not declared with scope agent_only",
                            section.artifact
                        ))
                    })?;
                if section.flag.trim().is_empty() {
                    return Err(KilnError::Configuration(
                        "agent flag must not be empty".to_string(),
                    ));
                }
                Some(AgentConfig {
                    artifact,
                    flag: section.flag,
                })
            }
            None => None,
        };

        if let Some(compile) = &raw.compile {
            validate_command("compile", &compile.command)?;
        }
        validate_command("test", &raw.test.command)?;

        let resolve = |p: PathBuf| {
            if p.is_absolute() {
                p
            } else {
                project_dir.join(p)
            }
        };

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            build_dir: resolve(raw.project.build_dir),
            identity,
            toolchain,
            toolchain_search_roots: raw.toolchain.search_roots.into_iter().map(resolve).collect(),
            repository: resolve(raw.repository.path),
            dependencies,
            agent,
            compile: raw.compile,
            test: TestConfig {
                run: CommandConfig {
                    command: raw.test.command,
                    timeout_secs: raw.test.timeout_secs,
                },
                log_events: raw.test.events,
                empty_suite: raw.test.empty_suite,
            },
            coverage: raw.coverage,
            publish: PublishConfig {
                target: raw.publish.target,
                gate_on_tests: raw.publish.gate_on_tests,
            },
        })
    }

    /// Compiled output; written once by the compile stage.
    pub fn classes_dir(&self) -> PathBuf {
        self.build_dir.join("classes")
    }

    /// Directory the test process writes coverage traces into.
    pub fn coverage_trace_dir(&self) -> PathBuf {
        self.build_dir.join("coverage-traces")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.build_dir.join("reports")
    }

    /// Packaged artifacts.
    pub fn libs_dir(&self) -> PathBuf {
        self.build_dir.join("libs")
    }
}

fn validate_command(stage: &str, command: &[String]) -> Result<()> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(KilnError::Configuration(format!(
            "{stage} command must not be empty"
        ))),
    }
}

fn default_project_name(project_dir: &Path) -> Result<String> {
    let dir = project_dir.canonicalize().map_err(|e| {
        KilnError::Configuration(format!(
            "cannot resolve project directory {}: {e}",
            project_dir.display()
        ))
    })?;
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            KilnError::Configuration(format!(
                "cannot derive a project name from {}",
                project_dir.display()
            ))
        })
}
