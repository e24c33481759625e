//! LCOV tracefile parsing.
//!
//! Only the records needed for line, branch and method counters are read:
//! `SF`, `DA`, `FN`, `FNDA`, `BRDA` and `end_of_record`. Anything else is
//! ignored.

use kiln_core::{KilnError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Coverage collected for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCoverage {
    /// Hits per line number.
    pub lines: BTreeMap<u32, u64>,

    /// Hits per `(line, block, branch)`.
    pub branches: BTreeMap<(u32, u32, u32), u64>,

    /// Hits per method name.
    pub methods: BTreeMap<String, u64>,
}

impl SourceCoverage {
    fn merge(&mut self, other: SourceCoverage) {
        for (line, hits) in other.lines {
            add_hits(self.lines.entry(line).or_default(), hits);
        }
        for (branch, hits) in other.branches {
            add_hits(self.branches.entry(branch).or_default(), hits);
        }
        for (method, hits) in other.methods {
            add_hits(self.methods.entry(method).or_default(), hits);
        }
    }
}

/// Coverage keyed by source file, merged across tracefiles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageData {
    pub sources: BTreeMap<String, SourceCoverage>,
}

impl CoverageData {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sum hits of `other` into `self`.
    pub fn merge(&mut self, other: CoverageData) {
        for (source, coverage) in other.sources {
            self.sources.entry(source).or_default().merge(coverage);
        }
    }
}

/// Parse one tracefile.
///
/// Every `SF` record must be closed by `end_of_record`; a trace that stops
/// mid-record was cut off and is rejected.
pub fn parse(content: &str, origin: &Path) -> Result<CoverageData> {
    let mut data = CoverageData::default();
    let mut current: Option<(String, SourceCoverage)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let malformed = |what: &str| {
            KilnError::IncompleteTrace(format!(
                "{}:{lineno}: malformed {what} record",
                origin.display()
            ))
        };

        if line == "end_of_record" {
            let (source, coverage) = current.take().ok_or_else(|| {
                KilnError::IncompleteTrace(format!(
                    "{}:{lineno}: end_of_record without SF",
                    origin.display()
                ))
            })?;
            data.sources.entry(source).or_default().merge(coverage);
            continue;
        }

        let Some((tag, value)) = line.split_once(':') else {
            continue;
        };

        if tag == "SF" {
            if let Some((open, _)) = &current {
                return Err(KilnError::IncompleteTrace(format!(
                    "{}:{lineno}: record for {open} not terminated",
                    origin.display()
                )));
            }
            current = Some((value.to_string(), SourceCoverage::default()));
            continue;
        }

        let Some((_, coverage)) = current.as_mut() else {
            continue;
        };

        match tag {
            "DA" => {
                let mut fields = value.split(',');
                let line_no = parse_num::<u32>(fields.next()).ok_or_else(|| malformed("DA"))?;
                let hits = parse_num::<u64>(fields.next()).ok_or_else(|| malformed("DA"))?;
                add_hits(coverage.lines.entry(line_no).or_default(), hits);
            }
            "FN" => {
                let (_, name) = value.split_once(',').ok_or_else(|| malformed("FN"))?;
                coverage.methods.entry(name.to_string()).or_default();
            }
            "FNDA" => {
                let (hits, name) = value.split_once(',').ok_or_else(|| malformed("FNDA"))?;
                let hits = parse_num::<u64>(Some(hits)).ok_or_else(|| malformed("FNDA"))?;
                add_hits(coverage.methods.entry(name.to_string()).or_default(), hits);
            }
            "BRDA" => {
                let fields: Vec<&str> = value.split(',').collect();
                if fields.len() != 4 {
                    return Err(malformed("BRDA"));
                }
                let key = (
                    parse_num(Some(fields[0])).ok_or_else(|| malformed("BRDA"))?,
                    parse_num(Some(fields[1])).ok_or_else(|| malformed("BRDA"))?,
                    parse_num(Some(fields[2])).ok_or_else(|| malformed("BRDA"))?,
                );
                // "-" marks a branch whose block never ran
                let hits = match fields[3] {
                    "-" => 0,
                    taken => parse_num::<u64>(Some(taken)).ok_or_else(|| malformed("BRDA"))?,
                };
                add_hits(coverage.branches.entry(key).or_default(), hits);
            }
            _ => {}
        }
    }

    if let Some((source, _)) = current {
        return Err(KilnError::IncompleteTrace(format!(
            "{}: record for {source} not terminated by end_of_record",
            origin.display()
        )));
    }

    Ok(data)
}

fn parse_num<T: std::str::FromStr>(field: Option<&str>) -> Option<T> {
    field?.trim().parse().ok()
}

/// Hit counts saturate instead of wrapping.
fn add_hits(slot: &mut u64, hits: u64) {
    *slot = slot.saturating_add(hits);
}
