//! Kiln - build pipeline orchestrator CLI
//!
//! The `kiln` command runs a project's pipeline from its `kiln.toml`.
//!
//! ## Commands
//!
//! - `resolve`: Select the toolchain and resolve dependencies
//! - `compile-and-test`: Compile and run the instrumented tests
//! - `report`: Run the tests and aggregate coverage reports
//! - `publish`: Package, sign and upload the artifact
//! - `build`: Every stage
//!
//! Exit codes: 0 ok, 1 stage failure, 2 configuration error, 130 cancelled.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_ci::{Cancellation, Collaborators, Pipeline, PipelineReport, StageSelection, StageStatus};
use kiln_core::{init_tracing, KilnError, PipelineConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};

const EXIT_STAGE_FAILURE: u8 = 1;
const EXIT_CONFIGURATION: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build pipeline orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Project directory containing kiln.toml
    #[arg(short, long, global = true, default_value = ".", env = "KILN_PROJECT_DIR")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Select the toolchain and resolve dependency classpaths
    Resolve,

    /// Compile and run the instrumented test process
    CompileAndTest,

    /// Run the tests and write coverage reports
    Report,

    /// Package, sign and upload (gated on tests unless disabled)
    Publish,

    /// Run every stage
    Build,
}

impl Commands {
    fn selection(self) -> StageSelection {
        match self {
            Commands::Resolve => StageSelection::Resolve,
            Commands::CompileAndTest => StageSelection::CompileAndTest,
            Commands::Report => StageSelection::Report,
            Commands::Publish => StageSelection::Publish,
            Commands::Build => StageSelection::Build,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cmd_run(&cli.project, cli.command.selection(), cli.json).await {
        Ok(report) if report.success => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_STAGE_FAILURE),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Map an aborted run to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<KilnError>() {
        Some(KilnError::Cancelled { .. }) => EXIT_CANCELLED,
        Some(e) if e.is_configuration() => EXIT_CONFIGURATION,
        _ => EXIT_STAGE_FAILURE,
    }
}

/// Load the project, run `selection` and print the outcome.
async fn cmd_run(project: &Path, selection: StageSelection, json: bool) -> Result<PipelineReport> {
    let config = PipelineConfig::load(project)
        .with_context(|| format!("Failed to load configuration from {}", project.display()))?;
    let collaborators =
        Collaborators::host(&config).context("Failed to set up pipeline collaborators")?;
    let pipeline = Pipeline::new(config, collaborators);

    let (handle, cancellation) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pipeline");
            handle.cancel();
        }
    });

    let report = pipeline
        .run(selection, cancellation)
        .await
        .with_context(|| {
            format!(
                "Pipeline aborted (partial report at {})",
                pipeline.report_path().display()
            )
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    info!(report = %pipeline.report_path().display(), "Wrote pipeline report");

    Ok(report)
}

fn print_summary(report: &PipelineReport) {
    println!(
        "{} [{}] run {}",
        report.identity.coordinates(),
        report.selection.name(),
        report.run_id
    );
    println!();

    for record in &report.stages {
        let status = match record.status {
            StageStatus::Passed => "PASS",
            StageStatus::Failed => "FAIL",
            StageStatus::Skipped => "SKIP",
        };
        let detail = record
            .detail
            .as_deref()
            .and_then(|d| d.lines().next())
            .unwrap_or("");
        println!(
            "  {status}  {:<8} {:>7}ms  {detail}",
            record.stage.name(),
            record.duration_ms
        );
    }

    if let Some(tests) = &report.tests {
        println!();
        println!(
            "Tests: {} total, {} passed, {} failed, {} skipped (exit code {})",
            tests.total, tests.passed, tests.failed, tests.skipped, tests.exit_code
        );
        for outcome in &report.failed_tests {
            println!("  ✗ {}", outcome.test_id);
            if let Some(failure) = &outcome.failure {
                for line in failure.render_full().lines() {
                    println!("      {line}");
                }
            }
        }
    }

    if let Some(coverage) = &report.coverage {
        println!(
            "Coverage: lines {:.1}%, branches {:.1}%, methods {:.1}%",
            coverage.line.percent(),
            coverage.branch.percent(),
            coverage.method.percent()
        );
        for path in &report.coverage_reports {
            println!("  {}", path.display());
        }
    }

    if let Some(gate) = report.gate.as_ref().filter(|g| !g.passed) {
        println!("Gate: {}", gate.message);
        for violation in &gate.violations {
            println!("  - {violation}");
        }
    }

    if let Some(receipt) = &report.receipt {
        print!("Published {} to {}", receipt.coordinates, receipt.endpoint);
        match &receipt.deployment_id {
            Some(id) => println!(" (deployment {id})"),
            None => println!(),
        }
    }

    for warning in &report.warnings {
        println!("warning: {warning}");
    }

    println!();
    if report.success {
        println!("✓ Pipeline passed ({}ms)", report.duration_ms);
    } else {
        println!(
            "✗ Pipeline failed: {} stage(s) failed ({}ms)",
            report.failed_count(),
            report.duration_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["kiln", "compile-and-test"]).unwrap();
        assert_eq!(cli.command, Commands::CompileAndTest);
        assert_eq!(cli.command.selection(), StageSelection::CompileAndTest);
        assert!(!cli.verbose);

        let cli =
            Cli::try_parse_from(["kiln", "--json", "publish", "--project", "/srv/app"]).unwrap();
        assert_eq!(cli.command.selection(), StageSelection::Publish);
        assert!(cli.json);
        assert_eq!(cli.project, PathBuf::from("/srv/app"));

        assert!(Cli::try_parse_from(["kiln", "deploy"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let cancelled = anyhow::Error::new(KilnError::Cancelled { exit_code: 143 })
            .context("Pipeline aborted");
        assert_eq!(exit_code(&cancelled), EXIT_CANCELLED);

        let config = anyhow::Error::new(KilnError::Configuration("GROUP is missing".into()))
            .context("Failed to load configuration");
        assert_eq!(exit_code(&config), EXIT_CONFIGURATION);

        let crash = anyhow::Error::new(KilnError::TestProcessCrashed {
            exit_code: 134,
            reason: "core dumped".into(),
        });
        assert_eq!(exit_code(&crash), EXIT_STAGE_FAILURE);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), EXIT_STAGE_FAILURE);
    }

    #[tokio::test]
    async fn test_missing_config_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_run(dir.path(), StageSelection::Build, false)
            .await
            .unwrap_err();
        assert_eq!(exit_code(&err), EXIT_CONFIGURATION);
    }

    #[tokio::test]
    async fn test_invalid_toml_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kiln.toml"), "[toolchain\nlanguage_version = ").unwrap();
        let err = cmd_run(dir.path(), StageSelection::Resolve, false)
            .await
            .unwrap_err();
        assert_eq!(exit_code(&err), EXIT_CONFIGURATION);
    }
}
