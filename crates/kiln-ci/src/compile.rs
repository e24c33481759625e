//! Compile stage.

use kiln_core::{CommandConfig, KilnError, Result};
use kiln_toolchain::Toolchain;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::launch::{toolchain_command, ENV_CLASSES_DIR, ENV_COMPILE_CLASSPATH};

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub classes_dir: PathBuf,
    pub duration_ms: u64,
    pub stdout: String,
}

/// Runs the configured compile command under the selected toolchain.
pub struct Compiler<'a> {
    toolchain: &'a Toolchain,
}

impl<'a> Compiler<'a> {
    pub fn new(toolchain: &'a Toolchain) -> Self {
        Self { toolchain }
    }

    /// Compile into a fresh `classes_dir`.
    ///
    /// The output directory is cleared first so stale classes never leak
    /// into the test or package stages.
    pub async fn compile(
        &self,
        config: &CommandConfig,
        classpath: &OsString,
        classes_dir: &Path,
        working_dir: &Path,
    ) -> Result<CompileOutput> {
        let start = Instant::now();

        if classes_dir.exists() {
            tokio::fs::remove_dir_all(classes_dir).await?;
        }
        tokio::fs::create_dir_all(classes_dir).await?;

        let mut command = toolchain_command(self.toolchain, &config.command, &[], working_dir)?;
        command
            .env(ENV_COMPILE_CLASSPATH, classpath)
            .env(ENV_CLASSES_DIR, classes_dir);

        info!(command = ?config.command, classes = %classes_dir.display(), "Compiling");
        let child = command.spawn().map_err(|e| KilnError::CompilationFailed {
            exit_code: -1,
            stderr: format!("failed to launch {:?}: {e}", config.command[0]),
        })?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| KilnError::CompilationFailed {
                exit_code: -1,
                stderr: format!("timed out after {} seconds", config.timeout_secs),
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, duration_ms, "Compilation failed");
            return Err(KilnError::CompilationFailed { exit_code, stderr });
        }

        info!(duration_ms, "Compilation finished");
        Ok(CompileOutput {
            classes_dir: classes_dir.to_path_buf(),
            duration_ms,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}
