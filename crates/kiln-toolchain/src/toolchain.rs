//! A located language runtime.

use kiln_core::{sha256_hex, ToolchainSpec};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// A runtime home on the host matching a [`ToolchainSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toolchain {
    spec: ToolchainSpec,
    home: PathBuf,
    digest: String,
}

impl Toolchain {
    pub fn new(spec: ToolchainSpec, home: PathBuf) -> Self {
        let digest = compute_digest(&spec, &home);
        Self { spec, home, digest }
    }

    pub fn spec(&self) -> &ToolchainSpec {
        &self.spec
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// SHA-256 over version and home, recorded with each run.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Resolve a program name against the toolchain `bin/` first.
    ///
    /// Paths containing a separator are returned unchanged; names not found in
    /// `bin/` are left for `PATH` lookup.
    pub fn program(&self, name: &str) -> PathBuf {
        if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
            return PathBuf::from(name);
        }
        let candidate = self.bin_dir().join(name);
        if candidate.is_file() {
            candidate
        } else {
            PathBuf::from(name)
        }
    }

    /// `PATH` value with the toolchain `bin/` prepended to `current`.
    pub fn path_env(&self, current: Option<OsString>) -> OsString {
        let mut paths = vec![self.bin_dir()];
        if let Some(current) = current {
            paths.extend(std::env::split_paths(&current));
        }
        // bin_dir never contains the separator unless the home itself does
        std::env::join_paths(paths).unwrap_or_else(|_| self.bin_dir().into_os_string())
    }
}

fn compute_digest(spec: &ToolchainSpec, home: &Path) -> String {
    let mut material = spec.language_version.to_string().into_bytes();
    material.push(0);
    material.extend_from_slice(home.to_string_lossy().as_bytes());
    sha256_hex(&material)
}
