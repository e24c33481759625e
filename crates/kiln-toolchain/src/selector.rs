//! Single-toolchain selection for a pipeline run.

use kiln_core::{KilnError, Result, ToolchainSpec};
use tracing::info;

use crate::provision::ToolchainProvisioner;
use crate::toolchain::Toolchain;

/// Pins one toolchain for the whole run.
///
/// Compilation and test execution share the selected toolchain; a second
/// selection on the same selector is rejected.
pub struct ToolchainSelector<P> {
    provisioner: P,
    selected: Option<Toolchain>,
}

impl<P: ToolchainProvisioner> ToolchainSelector<P> {
    pub fn new(provisioner: P) -> Self {
        Self {
            provisioner,
            selected: None,
        }
    }

    /// Locate the runtime for `language_version` and pin it.
    pub fn select(&mut self, language_version: u32) -> Result<Toolchain> {
        if let Some(current) = &self.selected {
            return Err(KilnError::Configuration(format!(
                "toolchain {} already selected; re-selection ({}) is not allowed mid-run",
                current.spec().language_version,
                language_version
            )));
        }

        let spec = ToolchainSpec::new(language_version)?;
        let toolchain = self.provisioner.locate(&spec)?;
        info!(
            version = language_version,
            home = %toolchain.home().display(),
            "Toolchain selected"
        );
        self.selected = Some(toolchain.clone());
        Ok(toolchain)
    }

    pub fn selected(&self) -> Option<&Toolchain> {
        self.selected.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvisioner {
        calls: AtomicUsize,
    }

    impl ToolchainProvisioner for CountingProvisioner {
        fn locate(&self, spec: &ToolchainSpec) -> Result<Toolchain> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if spec.language_version == 21 {
                Ok(Toolchain::new(*spec, PathBuf::from("/opt/jdk-21")))
            } else {
                Err(KilnError::ToolchainUnavailable {
                    version: spec.language_version,
                    reason: "not installed".to_string(),
                })
            }
        }
    }

    #[test]
    fn test_select_pins_toolchain() {
        let mut selector = ToolchainSelector::new(CountingProvisioner::default());
        let toolchain = selector.select(21).unwrap();
        assert_eq!(toolchain.spec().language_version, 21);
        assert_eq!(selector.selected(), Some(&toolchain));
    }

    #[test]
    fn test_reselection_forbidden() {
        let mut selector = ToolchainSelector::new(CountingProvisioner::default());
        selector.select(21).unwrap();

        let err = selector.select(17).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(selector.selected().unwrap().spec().language_version, 21);
        assert_eq!(selector.provisioner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_toolchain() {
        let mut selector = ToolchainSelector::new(CountingProvisioner::default());
        let err = selector.select(8).unwrap_err();
        assert!(matches!(err, KilnError::ToolchainUnavailable { version: 8, .. }));
        assert!(selector.selected().is_none());
    }
}
