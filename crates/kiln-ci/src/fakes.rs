//! In-memory fakes for pipeline collaborators (testing only)
//!
//! - `RecordingSink` keeps every test event in arrival order
//! - `StaticSigner` writes a fixed signature next to the artifact
//! - `MemoryRegistry` records uploads instead of sending them

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use kiln_core::{KilnError, PublishTarget, Result};

use crate::events::{TestEvent, TestEventSink};
use crate::registry::{Registry, Upload, UploadReceipt, CENTRAL_PORTAL_ENDPOINT, DEFAULT_ENDPOINT};
use crate::sign::{signature_path, Signer};

/// Event sink that records everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TestEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TestEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TestEventSink for RecordingSink {
    fn on_event(&self, event: &TestEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Signer that writes a constant armored block.
#[derive(Debug, Default)]
pub struct StaticSigner {
    error: Option<String>,
    signed: Mutex<Vec<PathBuf>>,
}

impl StaticSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signer that always fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            signed: Mutex::new(Vec::new()),
        }
    }

    pub fn signed(&self) -> Vec<PathBuf> {
        self.signed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Signer for StaticSigner {
    async fn sign(&self, artifact: &Path) -> Result<PathBuf> {
        if let Some(message) = &self.error {
            return Err(KilnError::Signing(message.clone()));
        }
        let output = signature_path(artifact);
        tokio::fs::write(
            &output,
            "-----BEGIN PGP SIGNATURE-----\nkiln\n-----END PGP SIGNATURE-----\n",
        )
        .await?;
        self.signed.lock().unwrap().push(artifact.to_path_buf());
        Ok(output)
    }
}

/// One upload seen by [`MemoryRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub target: PublishTarget,
    pub endpoint: String,
    pub coordinates: String,
    pub files: Vec<PathBuf>,
}

/// Registry that keeps uploads in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    error: Option<String>,
    attempts: Mutex<usize>,
    uploads: Mutex<Vec<RecordedUpload>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that rejects every upload with a transport error.
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Successful uploads, oldest first.
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    /// Every call to `upload`, failed or not.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn upload(&self, target: PublishTarget, upload: &Upload) -> Result<UploadReceipt> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(message) = &self.error {
            return Err(KilnError::PublishTransport(message.clone()));
        }

        let endpoint = match target {
            PublishTarget::RegistryDefault => DEFAULT_ENDPOINT,
            PublishTarget::RegistryCentralPortal => CENTRAL_PORTAL_ENDPOINT,
        }
        .to_string();

        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(RecordedUpload {
            target,
            endpoint: endpoint.clone(),
            coordinates: upload.identity.coordinates(),
            files: vec![upload.artifact.clone(), upload.signature.clone()],
        });

        let deployment_id = match target {
            PublishTarget::RegistryDefault => None,
            PublishTarget::RegistryCentralPortal => Some(format!("deployment-{}", uploads.len())),
        };
        Ok(UploadReceipt {
            endpoint,
            deployment_id,
        })
    }
}
