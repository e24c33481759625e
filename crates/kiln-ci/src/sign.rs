//! Detached artifact signatures.

use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

/// Key id used for signing.
pub const ENV_SIGNING_KEY: &str = "KILN_SIGNING_KEY";

/// Optional passphrase for the signing key.
pub const ENV_SIGNING_PASSWORD: &str = "KILN_SIGNING_PASSWORD";

/// Produces a detached signature next to an artifact.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `artifact` and return the path of the signature file.
    async fn sign(&self, artifact: &Path) -> Result<PathBuf>;
}

/// Signature path for an artifact: `<artifact>.asc`.
pub fn signature_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".asc");
    PathBuf::from(name)
}

/// Signs with the `gpg` command line tool.
#[derive(Clone, Default)]
pub struct GpgSigner {
    program: String,
    key_id: Option<String>,
    passphrase: Option<String>,
}

impl std::fmt::Debug for GpgSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpgSigner")
            .field("program", &self.program)
            .field("key_id", &self.key_id)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

impl GpgSigner {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            program: "gpg".to_string(),
            key_id: Some(key_id.into()),
            passphrase: None,
        }
    }

    /// Signer configured from `KILN_SIGNING_KEY` / `KILN_SIGNING_PASSWORD`.
    ///
    /// A missing key is reported when signing, not here.
    pub fn from_env() -> Self {
        Self {
            program: "gpg".to_string(),
            key_id: std::env::var(ENV_SIGNING_KEY).ok().filter(|k| !k.trim().is_empty()),
            passphrase: std::env::var(ENV_SIGNING_PASSWORD).ok(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

#[async_trait]
impl Signer for GpgSigner {
    async fn sign(&self, artifact: &Path) -> Result<PathBuf> {
        let key_id = self.key_id.as_deref().ok_or_else(|| {
            KilnError::Signing(format!("no signing key configured ({ENV_SIGNING_KEY} is unset)"))
        })?;
        let output_path = signature_path(artifact);

        let mut command = Command::new(&self.program);
        command
            .args(["--batch", "--yes", "--armor", "--detach-sign", "--local-user", key_id])
            .arg("--output")
            .arg(&output_path);
        if self.passphrase.is_some() {
            command.args(["--pinentry-mode", "loopback", "--passphrase-fd", "0"]);
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }
        command
            .arg(artifact)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| KilnError::Signing(format!("cannot run {}: {e}", self.program)))?;

        let signing_io = |e: std::io::Error| KilnError::Signing(format!("{}: {e}", self.program));
        if let (Some(passphrase), Some(mut stdin)) = (&self.passphrase, child.stdin.take()) {
            stdin
                .write_all(format!("{passphrase}\n").as_bytes())
                .await
                .map_err(signing_io)?;
        }

        let output = child.wait_with_output().await.map_err(signing_io)?;
        if !output.status.success() {
            return Err(KilnError::Signing(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !output_path.is_file() {
            return Err(KilnError::Signing(format!(
                "{} produced no signature at {}",
                self.program,
                output_path.display()
            )));
        }

        info!(artifact = %artifact.display(), key = %key_id, "Signed artifact");
        Ok(output_path)
    }
}
