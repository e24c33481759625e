//! Process launch under the selected toolchain.
//!
//! Compile and test processes are started the same way: the program is looked
//! up in the toolchain `bin/` first, `PATH` gets the toolchain prepended, and
//! the toolchain home is exported.

use kiln_core::{KilnError, Result};
use kiln_toolchain::Toolchain;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Runtime home of the selected toolchain.
pub const ENV_TOOLCHAIN_HOME: &str = "KILN_TOOLCHAIN_HOME";

/// Resolved compile dependencies, joined with the platform path separator.
pub const ENV_COMPILE_CLASSPATH: &str = "KILN_COMPILE_CLASSPATH";

/// Resolved test dependencies, joined with the platform path separator.
pub const ENV_TEST_CLASSPATH: &str = "KILN_TEST_CLASSPATH";

/// Output directory of the compile stage.
pub const ENV_CLASSES_DIR: &str = "KILN_CLASSES_DIR";

/// Directory the test process writes LCOV traces into.
pub const ENV_COVERAGE_DIR: &str = "KILN_COVERAGE_DIR";

/// Build a command for `argv` under `toolchain`.
///
/// `injected` arguments are placed directly after the program, ahead of the
/// configured arguments.
pub fn toolchain_command(
    toolchain: &Toolchain,
    argv: &[String],
    injected: &[String],
    working_dir: &Path,
) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| KilnError::Configuration("command must not be empty".to_string()))?;

    let mut command = Command::new(toolchain.program(program));
    command
        .args(injected)
        .args(args)
        .current_dir(working_dir)
        .env("PATH", toolchain.path_env(std::env::var_os("PATH")))
        .env(ENV_TOOLCHAIN_HOME, toolchain.home())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    Ok(command)
}

/// Join resolved files into a classpath value.
pub fn classpath(files: &[PathBuf]) -> Result<OsString> {
    std::env::join_paths(files).map_err(|e| {
        KilnError::Configuration(format!("dependency path cannot be placed on a classpath: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ToolchainSpec;

    #[test]
    fn test_classpath_join() {
        let files = vec![PathBuf::from("/repo/a.jar"), PathBuf::from("/repo/b.jar")];
        let joined = classpath(&files).unwrap();
        let split: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(split, files);
    }

    #[test]
    fn test_empty_command_rejected() {
        let toolchain = Toolchain::new(ToolchainSpec::new(21).unwrap(), PathBuf::from("/opt/jdk"));
        let err = toolchain_command(&toolchain, &[], &[], Path::new(".")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_injected_args_precede_configured_args() {
        let toolchain = Toolchain::new(ToolchainSpec::new(21).unwrap(), PathBuf::from("/opt/jdk"));
        let argv = vec!["java".to_string(), "-jar".to_string(), "runner.jar".to_string()];
        let injected = vec!["-javaagent:/repo/agent.jar".to_string()];

        let command = toolchain_command(&toolchain, &argv, &injected, Path::new(".")).unwrap();
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-javaagent:/repo/agent.jar", "-jar", "runner.jar"]);
    }
}
