//! Coverage trace files written by the test process.

use kiln_core::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension of LCOV tracefiles.
pub const TRACE_EXTENSION: &str = "info";

/// Traces of one test run.
///
/// A set starts `open` while the test process runs and is sealed by the test
/// runner once the process has exited. Only sealed sets can be aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSet {
    dir: PathBuf,
    files: Vec<PathBuf>,
    sealed: bool,
}

impl TraceSet {
    /// Prepare an empty trace directory for a new run.
    pub fn open(dir: &Path) -> Result<Self> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: Vec::new(),
            sealed: false,
        })
    }

    /// Freeze the set after the test process has terminated.
    pub(crate) fn seal(mut self) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == TRACE_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        debug!(dir = %self.dir.display(), traces = files.len(), "Sealed coverage traces");

        self.files = files;
        self.sealed = true;
        Ok(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}
