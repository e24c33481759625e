//! Coverage aggregation.
//!
//! Reads the sealed traces of a test run, merges them and renders the
//! enabled report formats into the coverage report directory.

pub mod lcov;
pub mod render;
pub mod trace;

pub use lcov::{CoverageData, SourceCoverage};
pub use render::{Counter, CoverageTotals};
pub use trace::TraceSet;

use kiln_core::{KilnError, ReportFormats, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::runner::TestRunResult;

pub const XML_REPORT: &str = "coverage.xml";
pub const CSV_REPORT: &str = "coverage.csv";
pub const HTML_REPORT: &str = "index.html";

/// Aggregated coverage and the files written for it.
#[derive(Debug, Clone)]
pub struct CoverageReport {
    pub formats: ReportFormats,
    pub data: CoverageData,
    pub totals: CoverageTotals,
    pub outputs: Vec<PathBuf>,
}

/// Turns the traces of a finished test run into reports.
#[derive(Debug, Clone)]
pub struct CoverageAggregator {
    output_dir: PathBuf,
    report_name: String,
}

impl CoverageAggregator {
    pub fn new(output_dir: impl Into<PathBuf>, report_name: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            report_name: report_name.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Aggregate the traces of `run` into every enabled format.
    ///
    /// Fails before touching the output directory when no format is enabled
    /// or the traces were not sealed. Runs with failing tests are still
    /// aggregated.
    pub async fn aggregate(&self, run: &TestRunResult, formats: ReportFormats) -> Result<CoverageReport> {
        if !formats.any_enabled() {
            return Err(KilnError::NoReportFormatSelected);
        }
        let traces = &run.traces;
        if !traces.is_sealed() {
            return Err(KilnError::IncompleteTrace(format!(
                "traces in {} are still being written",
                traces.dir().display()
            )));
        }

        let mut data = CoverageData::default();
        for file in traces.files() {
            let content = tokio::fs::read_to_string(file).await?;
            data.merge(lcov::parse(&content, file)?);
        }
        if data.is_empty() {
            warn!(dir = %traces.dir().display(), "No coverage recorded by the test run");
        }

        let totals = CoverageTotals::of_data(&data);
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut outputs = Vec::new();
        let rendered = [
            (formats.xml, XML_REPORT, render::render_xml as fn(&str, &CoverageData) -> String),
            (formats.csv, CSV_REPORT, render::render_csv),
            (formats.html, HTML_REPORT, render::render_html),
        ];
        for (enabled, file_name, render) in rendered {
            if !enabled {
                continue;
            }
            let path = self.output_dir.join(file_name);
            tokio::fs::write(&path, render(&self.report_name, &data)).await?;
            outputs.push(path);
        }

        info!(
            sources = data.sources.len(),
            lines_covered = totals.line.covered,
            lines_total = totals.line.total(),
            reports = outputs.len(),
            "Coverage reports written"
        );

        Ok(CoverageReport {
            formats,
            data,
            totals,
            outputs,
        })
    }
}
