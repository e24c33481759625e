//! Pipeline orchestration and run reporting.
//!
//! Stages run linearly: resolve → compile → test. Once the test process has
//! terminated, coverage reporting and package/publish run concurrently.
//! Every run writes `<build>/reports/kiln/pipeline.json`, failed runs
//! included.

use chrono::{DateTime, Utc};
use kiln_core::{
    resolve_all, DependencyResolver, EmptySuitePolicy, KilnError, LocalRepository, PipelineConfig,
    ProjectIdentity, Result, Scope,
};
use kiln_toolchain::{HostProvisioner, Toolchain, ToolchainProvisioner, ToolchainSelector};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::prepare_agent;
use crate::cancel::Cancellation;
use crate::compile::Compiler;
use crate::coverage::{CoverageAggregator, CoverageReport, CoverageTotals};
use crate::events::{LoggingSink, TestEventSink};
use crate::gate::{GateVerdict, PublishGate};
use crate::launch::classpath;
use crate::package::{PackagedArtifact, Packager};
use crate::publish::{PublishReceipt, Publisher};
use crate::registry::{HttpRegistry, Registry};
use crate::runner::{TestOutcome, TestRunRequest, TestRunResult, TestRunner, TestSummary};
use crate::sign::{GpgSigner, Signer};
use crate::stage::{Stage, StageRecord, StageSelection, StageStatus};

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn DependencyResolver>,
    pub provisioner: Arc<dyn ToolchainProvisioner>,
    pub signer: Arc<dyn Signer>,
    pub registry: Arc<dyn Registry>,
    pub sink: Arc<dyn TestEventSink>,
}

impl Collaborators {
    /// Real implementations for the local host.
    pub fn host(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            resolver: Arc::new(LocalRepository::new(&config.repository)),
            provisioner: Arc::new(HostProvisioner::from_env(
                config.toolchain_search_roots.clone(),
                &config.toolchain,
            )),
            signer: Arc::new(GpgSigner::from_env()),
            registry: Arc::new(HttpRegistry::from_env()?),
            sink: Arc::new(LoggingSink::new(config.test.log_events.clone())),
        })
    }
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub identity: ProjectIdentity,
    pub selection: StageSelection,

    /// Digest of the toolchain used for compile and test.
    pub toolchain_digest: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,

    /// Whether every selected stage passed.
    pub success: bool,

    pub stages: Vec<StageRecord>,

    pub tests: Option<TestSummary>,

    /// Failed and errored tests with full failure detail.
    pub failed_tests: Vec<TestOutcome>,

    pub coverage: Option<CoverageTotals>,
    pub coverage_reports: Vec<PathBuf>,

    pub artifact: Option<PackagedArtifact>,
    pub gate: Option<GateVerdict>,
    pub receipt: Option<PublishReceipt>,

    pub warnings: Vec<String>,

    /// The error that aborted the run, if any.
    pub error: Option<String>,
}

impl PipelineReport {
    pub fn passed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Passed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_failed()).count()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Everything the resolve stage produces.
struct Resolved {
    toolchain: Toolchain,
    compile_classpath: OsString,
    test_classpath: OsString,
}

/// Package and publish results.
struct Delivery {
    package: (Result<PackagedArtifact>, u64),
    gate: Option<GateVerdict>,
    publish: Option<(Result<PublishReceipt>, u64)>,
}

#[derive(Default)]
struct RunState {
    records: Vec<StageRecord>,
    toolchain_digest: Option<String>,
    tests: Option<TestSummary>,
    failed_tests: Vec<TestOutcome>,
    coverage: Option<CoverageTotals>,
    coverage_reports: Vec<PathBuf>,
    artifact: Option<PackagedArtifact>,
    gate: Option<GateVerdict>,
    receipt: Option<PublishReceipt>,
    warnings: Vec<String>,
}

impl RunState {
    fn pass(&mut self, stage: Stage, duration_ms: u64) {
        info!(stage = %stage, duration_ms, "Stage passed");
        self.records.push(StageRecord::passed(stage, duration_ms));
    }

    fn fail(&mut self, stage: Stage, duration_ms: u64, err: &KilnError) {
        warn!(stage = %stage, duration_ms, error = %err, "Stage failed");
        self.records
            .push(StageRecord::failed(stage, duration_ms, failure_detail(err)));
    }

    /// Record a failure that aborts the run and hand the error back.
    fn abort(&mut self, stage: Stage, start: Instant, err: KilnError) -> KilnError {
        self.fail(stage, elapsed_ms(start), &err);
        err
    }

    fn skip(&mut self, stage: Stage, reason: &str) {
        info!(stage = %stage, reason, "Stage skipped");
        self.records.push(StageRecord::skipped(stage, reason));
    }
}

/// Remember the first error that aborts the run.
fn keep_fatal(err: KilnError, fatal: &mut Option<KilnError>) {
    if err.is_fatal() && fatal.is_none() {
        *fatal = Some(err);
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn failure_detail(err: &KilnError) -> String {
    match err {
        KilnError::CompilationFailed { stderr, .. } if !stderr.trim().is_empty() => {
            format!("{err}\n{}", stderr.trim_end())
        }
        _ => err.to_string(),
    }
}

/// Pipeline orchestrator for one project.
pub struct Pipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Where the run report is written.
    pub fn report_path(&self) -> PathBuf {
        self.config.reports_dir().join("kiln").join("pipeline.json")
    }

    /// Run `selection` and its prerequisite stages.
    ///
    /// Stage-scoped failures (failing tests, report, signing, transport) are
    /// recorded in the returned report. Failures that abort the run are
    /// returned as errors after the partial report has been written.
    pub async fn run(
        &self,
        selection: StageSelection,
        cancellation: Cancellation,
    ) -> Result<PipelineReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            run_id = %run_id,
            selection = selection.name(),
            project = %self.config.identity.coordinates(),
            "Starting pipeline"
        );

        let mut state = RunState::default();
        let outcome = self.execute(selection, cancellation, &mut state).await;

        for stage in selection.stages(self.config.publish.gate_on_tests) {
            if !state.records.iter().any(|r| r.stage == stage) {
                state
                    .records
                    .push(StageRecord::skipped(stage, "not run: an earlier stage failed"));
            }
        }
        state.records.sort_by_key(|r| r.stage);

        let success = outcome.is_ok() && !state.records.iter().any(StageRecord::is_failed);
        let report = PipelineReport {
            run_id,
            identity: self.config.identity.clone(),
            selection,
            toolchain_digest: state.toolchain_digest,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed_ms(start),
            success,
            stages: state.records,
            tests: state.tests,
            failed_tests: state.failed_tests,
            coverage: state.coverage,
            coverage_reports: state.coverage_reports,
            artifact: state.artifact,
            gate: state.gate,
            receipt: state.receipt,
            warnings: state.warnings,
            error: outcome.as_ref().err().map(failure_detail),
        };

        let path = self.report_path();
        let written = report.write(&path);
        outcome?;
        written?;

        info!(
            run_id = %report.run_id,
            success = report.success,
            passed = report.passed_count(),
            failed = report.failed_count(),
            report = %path.display(),
            "Pipeline finished"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        selection: StageSelection,
        cancellation: Cancellation,
        state: &mut RunState,
    ) -> Result<()> {
        let gate_on_tests = self.config.publish.gate_on_tests;
        let includes = |stage| selection.includes(stage, gate_on_tests);

        let t = Instant::now();
        let resolved = self
            .resolve()
            .await
            .map_err(|e| state.abort(Stage::Resolve, t, e))?;
        state.toolchain_digest = Some(resolved.toolchain.digest().to_string());
        state.pass(Stage::Resolve, elapsed_ms(t));

        if includes(Stage::Compile) {
            match &self.config.compile {
                Some(compile) => {
                    let t = Instant::now();
                    Compiler::new(&resolved.toolchain)
                        .compile(
                            compile,
                            &resolved.compile_classpath,
                            &self.config.classes_dir(),
                            &self.config.project_dir,
                        )
                        .await
                        .map_err(|e| state.abort(Stage::Compile, t, e))?;
                    state.pass(Stage::Compile, elapsed_ms(t));
                }
                None => state.skip(Stage::Compile, "no [compile] command configured"),
            }
        }

        let test_run = if includes(Stage::Test) {
            let t = Instant::now();
            let run = self
                .test(&resolved, cancellation)
                .await
                .map_err(|e| state.abort(Stage::Test, t, e))?;
            self.record_tests(state, &run, elapsed_ms(t));
            Some(run)
        } else {
            None
        };

        // Test process has terminated; reporting and delivery may overlap.
        let run = test_run.as_ref();
        let report_task = async {
            if !includes(Stage::Report) {
                return None;
            }
            let t = Instant::now();
            Some((self.report(run).await, elapsed_ms(t)))
        };
        let delivery_task = async {
            if !includes(Stage::Package) {
                return None;
            }
            Some(self.deliver(run, includes(Stage::Publish)).await)
        };
        let (report, delivery) = tokio::join!(report_task, delivery_task);

        let mut fatal = None;

        if let Some((result, duration_ms)) = report {
            match result {
                Ok(coverage) => {
                    if coverage.data.is_empty() {
                        state
                            .warnings
                            .push("test run recorded no coverage".to_string());
                    }
                    state.coverage = Some(coverage.totals);
                    state.coverage_reports = coverage.outputs;
                    state.pass(Stage::Report, duration_ms);
                }
                Err(e) => {
                    state.fail(Stage::Report, duration_ms, &e);
                    keep_fatal(e, &mut fatal);
                }
            }
        }

        if let Some(delivery) = delivery {
            let (packaged, duration_ms) = delivery.package;
            match packaged {
                Ok(artifact) => {
                    state.artifact = Some(artifact);
                    state.pass(Stage::Package, duration_ms);
                }
                Err(e) => {
                    state.fail(Stage::Package, duration_ms, &e);
                    keep_fatal(e, &mut fatal);
                }
            }

            state.gate = delivery.gate;
            if let Some((published, duration_ms)) = delivery.publish {
                match published {
                    Ok(receipt) => {
                        state.receipt = Some(receipt);
                        state.pass(Stage::Publish, duration_ms);
                    }
                    Err(e) => {
                        state.fail(Stage::Publish, duration_ms, &e);
                        keep_fatal(e, &mut fatal);
                    }
                }
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Select the toolchain and resolve both classpaths.
    async fn resolve(&self) -> Result<Resolved> {
        let mut selector = ToolchainSelector::new(self.collaborators.provisioner.clone());
        let toolchain = selector.select(self.config.toolchain.language_version)?;

        let resolver = self.collaborators.resolver.as_ref();
        let dependencies = &self.config.dependencies;
        let compile_specs = dependencies.in_scope(Scope::Compile);
        let test_specs = dependencies.test_classpath();
        let (compile_files, test_files) = futures::future::try_join(
            resolve_all(resolver, &compile_specs),
            resolve_all(resolver, &test_specs),
        )
        .await?;

        info!(
            compile = compile_files.len(),
            test = test_files.len(),
            "Resolved dependencies"
        );

        Ok(Resolved {
            toolchain,
            compile_classpath: classpath(&compile_files)?,
            test_classpath: classpath(&test_files)?,
        })
    }

    /// Prepare the agent, then launch the test process.
    async fn test(&self, resolved: &Resolved, cancellation: Cancellation) -> Result<TestRunResult> {
        let agent_args = match &self.config.agent {
            Some(agent) => {
                prepare_agent(self.collaborators.resolver.as_ref(), agent)
                    .await?
                    .args
            }
            None => Vec::new(),
        };

        let request = TestRunRequest {
            command: self.config.test.run.clone(),
            working_dir: self.config.project_dir.clone(),
            classpath: resolved.test_classpath.clone(),
            classes_dir: self.config.classes_dir(),
            trace_dir: self.config.coverage_trace_dir(),
            agent_args,
        };

        TestRunner::new(resolved.toolchain.clone(), self.collaborators.sink.clone())
            .run(&request, cancellation)
            .await
    }

    fn record_tests(&self, state: &mut RunState, run: &TestRunResult, duration_ms: u64) {
        state.tests = Some(run.summary());
        state.failed_tests = run.failures().cloned().collect();

        if run.is_empty() {
            match self.config.test.empty_suite {
                EmptySuitePolicy::Allow => {}
                EmptySuitePolicy::Warn => {
                    warn!("Test run executed zero tests");
                    state.warnings.push("test run executed zero tests".to_string());
                }
                EmptySuitePolicy::Fail => {
                    state.records.push(StageRecord::failed(
                        Stage::Test,
                        duration_ms,
                        "test run executed zero tests",
                    ));
                    return;
                }
            }
        }

        match run.to_error() {
            Some(err) => state.fail(Stage::Test, duration_ms, &err),
            None => state.pass(Stage::Test, duration_ms),
        }
    }

    async fn report(&self, run: Option<&TestRunResult>) -> Result<CoverageReport> {
        let run = run.ok_or_else(|| {
            KilnError::IncompleteTrace("no test run to aggregate coverage from".to_string())
        })?;
        CoverageAggregator::new(
            self.config.reports_dir().join("coverage"),
            self.config.identity.name.clone(),
        )
        .aggregate(run, self.config.coverage)
        .await
    }

    async fn package(&self) -> Result<PackagedArtifact> {
        let packager = Packager::new(self.config.libs_dir());
        let classes_dir = self.config.classes_dir();
        let identity = self.config.identity.clone();
        tokio::task::spawn_blocking(move || packager.package(&classes_dir, &identity))
            .await
            .map_err(|e| KilnError::Archive(format!("packaging task failed: {e}")))?
    }

    /// Package, then publish if selected and the gate allows it.
    async fn deliver(&self, run: Option<&TestRunResult>, publish: bool) -> Delivery {
        let t = Instant::now();
        let artifact = match self.package().await {
            Ok(artifact) => artifact,
            Err(e) => {
                return Delivery {
                    package: (Err(e), elapsed_ms(t)),
                    gate: None,
                    publish: None,
                }
            }
        };
        let package_ms = elapsed_ms(t);

        if !publish {
            return Delivery {
                package: (Ok(artifact), package_ms),
                gate: None,
                publish: None,
            };
        }

        let gate = self
            .config
            .publish
            .gate_on_tests
            .then(|| PublishGate::evaluate(run, self.config.test.empty_suite, true));

        if let Some(verdict) = gate.as_ref().filter(|v| !v.passed) {
            warn!(violations = verdict.violations.len(), "{}", verdict.message);
            let blocked = KilnError::PublishBlocked(verdict.violations.join("; "));
            return Delivery {
                package: (Ok(artifact), package_ms),
                gate,
                publish: Some((Err(blocked), 0)),
            };
        }

        let t = Instant::now();
        let publisher = Publisher::new(
            self.collaborators.signer.clone(),
            self.collaborators.registry.clone(),
        );
        let published = publisher
            .publish(
                &artifact,
                &self.config.identity.manifest(),
                self.config.publish.target,
            )
            .await;

        Delivery {
            package: (Ok(artifact), package_ms),
            gate,
            publish: Some((published, elapsed_ms(t))),
        }
    }
}
