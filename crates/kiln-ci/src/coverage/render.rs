//! Report rendering: XML, CSV and HTML.

use serde::Serialize;
use std::fmt::Write as _;

use super::lcov::{CoverageData, SourceCoverage};

/// Missed and covered items of one kind.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Counter {
    pub missed: u64,
    pub covered: u64,
}

impl Counter {
    fn tally<'a>(hits: impl Iterator<Item = &'a u64>) -> Self {
        hits.fold(Counter::default(), |mut c, &h| {
            if h > 0 {
                c.covered += 1;
            } else {
                c.missed += 1;
            }
            c
        })
    }

    fn add(&mut self, other: Counter) {
        self.missed += other.missed;
        self.covered += other.covered;
    }

    pub fn total(&self) -> u64 {
        self.missed + self.covered
    }

    /// Covered share in percent; 0 when there is nothing to cover.
    pub fn percent(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.covered as f64 * 100.0 / self.total() as f64
        }
    }
}

/// Line, branch and method counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CoverageTotals {
    pub line: Counter,
    pub branch: Counter,
    pub method: Counter,
}

impl CoverageTotals {
    pub fn of_source(source: &SourceCoverage) -> Self {
        Self {
            line: Counter::tally(source.lines.values()),
            branch: Counter::tally(source.branches.values()),
            method: Counter::tally(source.methods.values()),
        }
    }

    pub fn of_data(data: &CoverageData) -> Self {
        let mut totals = CoverageTotals::default();
        for source in data.sources.values() {
            let t = Self::of_source(source);
            totals.line.add(t.line);
            totals.branch.add(t.branch);
            totals.method.add(t.method);
        }
        totals
    }

    fn counters(&self) -> [(&'static str, Counter); 3] {
        [
            ("LINE", self.line),
            ("BRANCH", self.branch),
            ("METHOD", self.method),
        ]
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn push_counters(out: &mut String, indent: &str, totals: &CoverageTotals) {
    for (kind, counter) in totals.counters() {
        let _ = writeln!(
            out,
            r#"{indent}<counter type="{kind}" missed="{}" covered="{}"/>"#,
            counter.missed, counter.covered
        );
    }
}

/// Machine-readable XML report.
pub fn render_xml(report_name: &str, data: &CoverageData) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
    let _ = writeln!(out, r#"<report name="{}">"#, escape(report_name));

    for (name, source) in &data.sources {
        let _ = writeln!(out, r#"  <sourcefile name="{}">"#, escape(name));
        for (line, hits) in &source.lines {
            let (mb, cb) = source
                .branches
                .iter()
                .filter(|((l, _, _), _)| l == line)
                .fold((0u64, 0u64), |(mb, cb), (_, &h)| {
                    if h > 0 {
                        (mb, cb + 1)
                    } else {
                        (mb + 1, cb)
                    }
                });
            let (mi, ci) = if *hits > 0 { (0, 1) } else { (1, 0) };
            let _ = writeln!(
                out,
                r#"    <line nr="{line}" mi="{mi}" ci="{ci}" mb="{mb}" cb="{cb}"/>"#
            );
        }
        push_counters(&mut out, "    ", &CoverageTotals::of_source(source));
        out.push_str("  </sourcefile>\n");
    }

    push_counters(&mut out, "  ", &CoverageTotals::of_data(data));
    out.push_str("</report>\n");
    out
}

pub const CSV_HEADER: &str = "REPORT,SOURCE_FILE,LINE_MISSED,LINE_COVERED,BRANCH_MISSED,BRANCH_COVERED,METHOD_MISSED,METHOD_COVERED";

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One row per source file.
pub fn render_csv(report_name: &str, data: &CoverageData) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for (name, source) in &data.sources {
        let t = CoverageTotals::of_source(source);
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            csv_field(report_name),
            csv_field(name),
            t.line.missed,
            t.line.covered,
            t.branch.missed,
            t.branch.covered,
            t.method.missed,
            t.method.covered
        );
    }
    out
}

/// Single-page human-readable summary.
pub fn render_html(report_name: &str, data: &CoverageData) -> String {
    let title = escape(report_name);
    let totals = CoverageTotals::of_data(data);

    let mut out = String::new();
    let _ = writeln!(out, "<!DOCTYPE html>");
    let _ = writeln!(out, "<html lang=\"en\">");
    let _ = writeln!(
        out,
        "<head><meta charset=\"UTF-8\"><title>{title} coverage</title></head>"
    );
    let _ = writeln!(out, "<body>");
    let _ = writeln!(out, "<h1>{title}</h1>");
    let _ = writeln!(out, "<table>");
    let _ = writeln!(
        out,
        "<thead><tr><th>Source file</th><th>Lines</th><th>Branches</th><th>Methods</th></tr></thead>"
    );
    let _ = writeln!(out, "<tbody>");
    for (name, source) in &data.sources {
        let t = CoverageTotals::of_source(source);
        let _ = writeln!(
            out,
            "<tr><td>{}</td>{}{}{}</tr>",
            escape(name),
            cell(t.line),
            cell(t.branch),
            cell(t.method)
        );
    }
    let _ = writeln!(out, "</tbody>");
    let _ = writeln!(
        out,
        "<tfoot><tr><td>Total</td>{}{}{}</tr></tfoot>",
        cell(totals.line),
        cell(totals.branch),
        cell(totals.method)
    );
    let _ = writeln!(out, "</table>");
    let _ = writeln!(out, "</body>");
    let _ = writeln!(out, "</html>");
    out
}

fn cell(counter: Counter) -> String {
    format!(
        "<td>{:.1}% ({}/{})</td>",
        counter.percent(),
        counter.covered,
        counter.total()
    )
}
