//! Toolchain provisioning
//!
//! Locates a language runtime on the host for a [`ToolchainSpec`]. The
//! lookup order is:
//! 1. `KILN_TOOLCHAIN_<version>` pointing at a runtime home
//! 2. Children of each search root whose name carries the version
//!    (`21`, `jdk-21`, `temurin-21.0.2`)
//!
//! A home must contain `bin/`. When it also has a `release` file, the
//! `JAVA_VERSION` recorded there must agree with the requested version.

use kiln_core::{KilnError, Result, ToolchainSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::toolchain::Toolchain;

/// Environment variable prefix for explicit toolchain homes.
pub const TOOLCHAIN_ENV_PREFIX: &str = "KILN_TOOLCHAIN_";

/// Supplies executable runtimes for a toolchain spec.
pub trait ToolchainProvisioner: Send + Sync {
    fn locate(&self, spec: &ToolchainSpec) -> Result<Toolchain>;
}

impl<T: ToolchainProvisioner + ?Sized> ToolchainProvisioner for Arc<T> {
    fn locate(&self, spec: &ToolchainSpec) -> Result<Toolchain> {
        (**self).locate(spec)
    }
}

/// Provisioner that searches the local host.
#[derive(Debug, Clone, Default)]
pub struct HostProvisioner {
    search_roots: Vec<PathBuf>,
    explicit_home: Option<PathBuf>,
}

impl HostProvisioner {
    pub fn new(search_roots: Vec<PathBuf>) -> Self {
        Self {
            search_roots,
            explicit_home: None,
        }
    }

    /// Provisioner that also honours `KILN_TOOLCHAIN_<version>` for `spec`.
    pub fn from_env(search_roots: Vec<PathBuf>, spec: &ToolchainSpec) -> Self {
        let var = format!("{TOOLCHAIN_ENV_PREFIX}{}", spec.language_version);
        let explicit_home = std::env::var_os(&var).map(PathBuf::from);
        if let Some(home) = &explicit_home {
            debug!(var = %var, home = %home.display(), "Toolchain home set in environment");
        }
        Self {
            search_roots,
            explicit_home,
        }
    }

    /// Use `home` before any search root.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.explicit_home = Some(home.into());
        self
    }

    fn candidates(&self, version: u32) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(home) = &self.explicit_home {
            candidates.push(home.clone());
        }

        for root in &self.search_roots {
            let Ok(entries) = std::fs::read_dir(root) else {
                debug!(root = %root.display(), "Toolchain search root not readable");
                continue;
            };
            let mut matches: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(major_version_in_name)
                        == Some(version)
                })
                .collect();
            matches.sort();
            candidates.extend(matches);
        }

        candidates
    }
}

impl ToolchainProvisioner for HostProvisioner {
    fn locate(&self, spec: &ToolchainSpec) -> Result<Toolchain> {
        let version = spec.language_version;

        for home in self.candidates(version) {
            let bin = home.join("bin");
            if !bin.is_dir() {
                debug!(home = %home.display(), "Candidate has no bin directory");
                continue;
            }
            if let Some(recorded) = release_major_version(&home) {
                if recorded != version {
                    warn!(
                        home = %home.display(),
                        recorded,
                        requested = version,
                        "Skipping toolchain with mismatched release version"
                    );
                    continue;
                }
            }

            info!(version, home = %home.display(), "Located toolchain");
            return Ok(Toolchain::new(*spec, home));
        }

        Err(KilnError::ToolchainUnavailable {
            version,
            reason: format!(
                "no runtime home found (set {TOOLCHAIN_ENV_PREFIX}{version} or add a search root)"
            ),
        })
    }
}

/// First numeric component of a directory name: `jdk-21.0.2` → 21.
fn major_version_in_name(name: &str) -> Option<u32> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Major version from a runtime `release` file, if present.
///
/// Legacy `1.8.0_392` style versions report the second component.
fn release_major_version(home: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(home.join("release")).ok()?;
    let value = content.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "JAVA_VERSION").then(|| value.trim().trim_matches('"').to_string())
    })?;

    let mut parts = value.split(['.', '_', '+', '-']);
    let first: u32 = parts.next()?.parse().ok()?;
    if first == 1 {
        parts.next()?.parse().ok()
    } else {
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_home(root: &Path, name: &str, release: Option<&str>) -> PathBuf {
        let home = root.join(name);
        std::fs::create_dir_all(home.join("bin")).unwrap();
        if let Some(version) = release {
            std::fs::write(
                home.join("release"),
                format!("IMPLEMENTOR=\"Eclipse Adoptium\"\nJAVA_VERSION=\"{version}\"\n"),
            )
            .unwrap();
        }
        home
    }

    #[test]
    fn test_major_version_in_name() {
        assert_eq!(major_version_in_name("21"), Some(21));
        assert_eq!(major_version_in_name("jdk-21"), Some(21));
        assert_eq!(major_version_in_name("temurin-17.0.9"), Some(17));
        assert_eq!(major_version_in_name("default"), None);
    }

    #[test]
    fn test_release_major_version() {
        let dir = tempfile::tempdir().unwrap();
        let modern = make_home(dir.path(), "a", Some("21.0.2"));
        let legacy = make_home(dir.path(), "b", Some("1.8.0_392"));
        let none = make_home(dir.path(), "c", None);

        assert_eq!(release_major_version(&modern), Some(21));
        assert_eq!(release_major_version(&legacy), Some(8));
        assert_eq!(release_major_version(&none), None);
    }

    #[test]
    fn test_locate_from_search_root() {
        let dir = tempfile::tempdir().unwrap();
        make_home(dir.path(), "jdk-17", None);
        let home21 = make_home(dir.path(), "temurin-21.0.2", Some("21.0.2"));

        let provisioner = HostProvisioner::new(vec![dir.path().to_path_buf()]);
        let toolchain = provisioner.locate(&ToolchainSpec::new(21).unwrap()).unwrap();

        assert_eq!(toolchain.home(), home21.as_path());
        assert_eq!(toolchain.spec().language_version, 21);
    }

    #[test]
    fn test_mismatched_release_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        make_home(dir.path(), "jdk-21", Some("17.0.9"));

        let provisioner = HostProvisioner::new(vec![dir.path().to_path_buf()]);
        let err = provisioner.locate(&ToolchainSpec::new(21).unwrap()).unwrap_err();
        assert!(matches!(err, KilnError::ToolchainUnavailable { version: 21, .. }));
    }

    #[test]
    fn test_explicit_home_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        make_home(dir.path(), "jdk-21", None);
        let pinned = make_home(dir.path(), "pinned", None);

        let provisioner =
            HostProvisioner::new(vec![dir.path().to_path_buf()]).with_home(&pinned);
        let toolchain = provisioner.locate(&ToolchainSpec::new(21).unwrap()).unwrap();
        assert_eq!(toolchain.home(), pinned.as_path());
    }

    #[test]
    fn test_home_without_bin_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("jdk-21")).unwrap();

        let provisioner = HostProvisioner::new(vec![dir.path().to_path_buf()]);
        assert!(provisioner.locate(&ToolchainSpec::new(21).unwrap()).is_err());
    }

    #[test]
    fn test_unavailable_when_no_roots() {
        let provisioner = HostProvisioner::default();
        let err = provisioner.locate(&ToolchainSpec::new(11).unwrap()).unwrap_err();
        assert!(err.to_string().contains("toolchain 11 unavailable"));
    }
}
