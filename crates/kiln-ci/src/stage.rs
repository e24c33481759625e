//! Pipeline stages and stage selection.

use serde::{Deserialize, Serialize};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Select the toolchain and resolve dependency classpaths.
    Resolve,

    /// Run `[compile] command` into the classes directory.
    Compile,

    /// Run the instrumented test process.
    Test,

    /// Aggregate coverage traces into reports.
    Report,

    /// Build the jar.
    Package,

    /// Sign and upload the jar.
    Publish,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Compile => "compile",
            Stage::Test => "test",
            Stage::Report => "report",
            Stage::Package => "package",
            Stage::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one stage in the pipeline report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,

    /// Failure or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageRecord {
    pub fn passed(stage: Stage, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Passed,
            duration_ms,
            detail: None,
        }
    }

    pub fn failed(stage: Stage, duration_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            duration_ms,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            duration_ms: 0,
            detail: Some(detail.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}

/// What the operator asked the pipeline to do.
///
/// Each selection runs its prerequisites: `report` needs a test run,
/// `publish` needs a package and, when gated on tests, a test run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageSelection {
    Resolve,
    CompileAndTest,
    Report,
    Publish,
    Build,
}

impl StageSelection {
    pub fn name(&self) -> &'static str {
        match self {
            StageSelection::Resolve => "resolve",
            StageSelection::CompileAndTest => "compile_and_test",
            StageSelection::Report => "report",
            StageSelection::Publish => "publish",
            StageSelection::Build => "build",
        }
    }

    /// Stages run for this selection, in order.
    pub fn stages(&self, gate_on_tests: bool) -> Vec<Stage> {
        use Stage::*;
        match self {
            StageSelection::Resolve => vec![Resolve],
            StageSelection::CompileAndTest => vec![Resolve, Compile, Test],
            StageSelection::Report => vec![Resolve, Compile, Test, Report],
            StageSelection::Publish if gate_on_tests => {
                vec![Resolve, Compile, Test, Package, Publish]
            }
            StageSelection::Publish => vec![Resolve, Compile, Package, Publish],
            StageSelection::Build => vec![Resolve, Compile, Test, Report, Package, Publish],
        }
    }

    pub fn includes(&self, stage: Stage, gate_on_tests: bool) -> bool {
        self.stages(gate_on_tests).contains(&stage)
    }
}
