//! Publisher: manifest, signature, upload.

use chrono::{DateTime, Utc};
use kiln_core::{KilnError, ManifestMetadata, PublishTarget, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::package::{embed_manifest, PackagedArtifact};
use crate::registry::{Registry, Upload};
use crate::sign::Signer;

/// Record of a completed publication.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublishReceipt {
    pub target: PublishTarget,
    pub endpoint: String,
    pub coordinates: String,
    pub artifact_digest: String,
    pub signature: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Signs and uploads packaged artifacts.
#[derive(Clone)]
pub struct Publisher {
    signer: Arc<dyn Signer>,
    registry: Arc<dyn Registry>,
}

impl Publisher {
    pub fn new(signer: Arc<dyn Signer>, registry: Arc<dyn Registry>) -> Self {
        Self { signer, registry }
    }

    /// Publish `artifact` to `target`.
    ///
    /// The manifest is embedded before signing so the signature covers the
    /// final bytes. Errors from the signer or registry are returned
    /// unchanged; nothing is retried.
    pub async fn publish(
        &self,
        artifact: &PackagedArtifact,
        manifest: &ManifestMetadata,
        target: PublishTarget,
    ) -> Result<PublishReceipt> {
        let embedded = {
            let artifact = artifact.clone();
            let manifest = manifest.clone();
            tokio::task::spawn_blocking(move || embed_manifest(&artifact, &manifest))
                .await
                .map_err(|e| KilnError::Archive(format!("manifest task failed: {e}")))??
        };

        let signature = self.signer.sign(&embedded.path).await?;

        let upload = Upload {
            identity: embedded.identity.clone(),
            artifact: embedded.path.clone(),
            signature: signature.clone(),
        };
        let receipt = self.registry.upload(target, &upload).await?;

        info!(
            target = %target,
            coordinates = %embedded.identity.coordinates(),
            digest = %embedded.digest,
            "Published artifact"
        );

        Ok(PublishReceipt {
            target,
            endpoint: receipt.endpoint,
            coordinates: embedded.identity.coordinates(),
            artifact_digest: embedded.digest,
            signature,
            deployment_id: receipt.deployment_id,
            published_at: Utc::now(),
        })
    }
}
