//! Package registry uploads.
//!
//! Each [`PublishTarget`] maps to exactly one endpoint. An upload goes to the
//! configured target only; a failure is returned as-is and never retried
//! against the other endpoint.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_core::{KilnError, ProjectIdentity, PublishTarget, Result};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Staging deploy endpoint of the legacy host.
pub const DEFAULT_ENDPOINT: &str = "https://oss.sonatype.org/service/local/staging/deploy/maven2/";

/// Central Portal publisher upload endpoint.
pub const CENTRAL_PORTAL_ENDPOINT: &str = "https://central.sonatype.com/api/v1/publisher/upload";

pub const ENV_REGISTRY_USERNAME: &str = "KILN_REGISTRY_USERNAME";
pub const ENV_REGISTRY_PASSWORD: &str = "KILN_REGISTRY_PASSWORD";

/// Files of one publication.
#[derive(Debug, Clone)]
pub struct Upload {
    pub identity: ProjectIdentity,
    pub artifact: PathBuf,
    pub signature: PathBuf,
}

impl Upload {
    fn artifact_name(&self) -> String {
        self.identity.artifact_file_name("jar")
    }

    fn signature_name(&self) -> String {
        self.identity.artifact_file_name("jar.asc")
    }
}

/// What the registry acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub endpoint: String,
    pub deployment_id: Option<String>,
}

/// Remote package registry.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn upload(&self, target: PublishTarget, upload: &Upload) -> Result<UploadReceipt>;
}

/// Registry account.
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl RegistryCredentials {
    /// Central Portal user token: base64 of `username:password`.
    pub fn portal_token(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.username, self.password))
    }

    /// Read `KILN_REGISTRY_USERNAME` / `KILN_REGISTRY_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(ENV_REGISTRY_USERNAME).ok()?;
        let password = std::env::var(ENV_REGISTRY_PASSWORD).ok()?;
        Some(Self { username, password })
    }
}

fn transport_err(e: impl std::fmt::Display) -> KilnError {
    KilnError::PublishTransport(e.to_string())
}

/// Registry client over HTTP.
pub struct HttpRegistry {
    http_client: reqwest::Client,
    credentials: Option<RegistryCredentials>,
    endpoints: HashMap<PublishTarget, String>,
}

impl HttpRegistry {
    pub fn new(credentials: Option<RegistryCredentials>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport_err)?;

        let endpoints = HashMap::from([
            (PublishTarget::RegistryDefault, DEFAULT_ENDPOINT.to_string()),
            (
                PublishTarget::RegistryCentralPortal,
                CENTRAL_PORTAL_ENDPOINT.to_string(),
            ),
        ]);

        Ok(Self {
            http_client,
            credentials,
            endpoints,
        })
    }

    /// Client configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(RegistryCredentials::from_env())
    }

    /// Point `target` at another URL (mirrors, tests).
    pub fn with_endpoint(mut self, target: PublishTarget, url: impl Into<String>) -> Self {
        self.endpoints.insert(target, url.into());
        self
    }

    pub fn endpoint(&self, target: PublishTarget) -> Result<&str> {
        self.endpoints
            .get(&target)
            .map(String::as_str)
            .ok_or_else(|| transport_err(format!("no endpoint configured for {target}")))
    }

    fn credentials(&self) -> Result<&RegistryCredentials> {
        self.credentials.as_ref().ok_or_else(|| {
            transport_err(format!(
                "registry credentials missing ({ENV_REGISTRY_USERNAME} / {ENV_REGISTRY_PASSWORD})"
            ))
        })
    }

    async fn put_file(&self, url: &str, body: Vec<u8>) -> Result<()> {
        let credentials = self.credentials()?;
        let response = self
            .http_client
            .put(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .body(body)
            .send()
            .await
            .map_err(transport_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport_err(format!("PUT {url} returned {status}")));
        }
        debug!(url = %url, status = %status, "Uploaded file");
        Ok(())
    }

    /// PUT the artifact and its signature at the Maven layout path.
    async fn upload_default(&self, base: &str, upload: &Upload) -> Result<UploadReceipt> {
        let base = base.trim_end_matches('/');
        let prefix = format!("{base}/{}", upload.identity.repository_path());

        let files = [
            (upload.artifact_name(), &upload.artifact),
            (upload.signature_name(), &upload.signature),
        ];
        for (name, path) in files {
            let body = tokio::fs::read(path).await?;
            self.put_file(&format!("{prefix}/{name}"), body).await?;
        }

        Ok(UploadReceipt {
            endpoint: format!("{base}/"),
            deployment_id: None,
        })
    }

    /// POST a bundle zip; the portal answers with a deployment id.
    async fn upload_portal(&self, url: &str, upload: &Upload) -> Result<UploadReceipt> {
        let credentials = self.credentials()?;
        let bundle = bundle(upload).await?;

        let part = reqwest::multipart::Part::bytes(bundle)
            .file_name(upload.identity.artifact_file_name("zip"))
            .mime_str("application/octet-stream")
            .map_err(transport_err)?;
        let form = reqwest::multipart::Form::new().part("bundle", part);

        let response = self
            .http_client
            .post(url)
            .query(&[
                ("name", upload.identity.coordinates().as_str()),
                ("publishingType", "USER_MANAGED"),
            ])
            .bearer_auth(credentials.portal_token())
            .multipart(form)
            .send()
            .await
            .map_err(transport_err)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_err)?;
        if !status.is_success() {
            return Err(transport_err(format!(
                "POST {url} returned {status}: {}",
                body.trim()
            )));
        }

        let deployment_id = body.trim().trim_matches('"').to_string();
        Ok(UploadReceipt {
            endpoint: url.to_string(),
            deployment_id: (!deployment_id.is_empty()).then_some(deployment_id),
        })
    }
}

/// Maven-layout bundle of the artifact and its signature.
async fn bundle(upload: &Upload) -> Result<Vec<u8>> {
    let prefix = upload.identity.repository_path();
    let entries = [
        (format!("{prefix}/{}", upload.artifact_name()), tokio::fs::read(&upload.artifact).await?),
        (format!("{prefix}/{}", upload.signature_name()), tokio::fs::read(&upload.signature).await?),
    ];

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().last_modified_time(zip::DateTime::default());
    for (name, bytes) in entries {
        writer.start_file(name, options).map_err(|e| KilnError::Archive(e.to_string()))?;
        writer.write_all(&bytes)?;
    }
    let cursor = writer.finish().map_err(|e| KilnError::Archive(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn upload(&self, target: PublishTarget, upload: &Upload) -> Result<UploadReceipt> {
        let endpoint = self.endpoint(target)?.to_string();
        info!(target = %target, endpoint = %endpoint, coordinates = %upload.identity.coordinates(), "Uploading");

        let receipt = match target {
            PublishTarget::RegistryDefault => self.upload_default(&endpoint, upload).await?,
            PublishTarget::RegistryCentralPortal => self.upload_portal(&endpoint, upload).await?,
        };

        info!(
            target = %target,
            deployment_id = receipt.deployment_id.as_deref().unwrap_or("-"),
            "Upload accepted"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug, Default)]
    struct Seen {
        lines: Vec<String>,
        authorization: Vec<String>,
    }

    /// Minimal HTTP server: records request lines and `authorization`
    /// headers and answers every request with `status` and `body`.
    async fn serve(status: u16, body: &'static str) -> (String, Arc<Mutex<Seen>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Seen::default()));
        let log = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                let first_line = request.lines().next().unwrap_or_default().to_string();
                let authorization = request.lines().find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("authorization")
                        .then(|| value.trim().to_string())
                });
                {
                    let mut log = log.lock().unwrap();
                    log.lines.push(first_line);
                    log.authorization.extend(authorization);
                }
                let response = format!(
                    "HTTP/1.1 {status} OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), seen)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let headers = text[..header_end].to_ascii_lowercase();
            let body_len = buf.len() - (header_end + 4);
            let complete = if let Some(len) = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
            {
                body_len >= len
            } else if headers.contains("transfer-encoding: chunked") {
                text.ends_with("0\r\n\r\n")
            } else {
                true
            };
            if complete {
                break;
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn upload(dir: &std::path::Path) -> Upload {
        let artifact = dir.join("embedded-1.4.0.jar");
        let signature = dir.join("embedded-1.4.0.jar.asc");
        std::fs::write(&artifact, b"jar").unwrap();
        std::fs::write(&signature, b"sig").unwrap();
        Upload {
            identity: ProjectIdentity::new("net.uiqui", "embedded", "1.4.0").unwrap(),
            artifact,
            signature,
        }
    }

    fn credentials() -> Option<RegistryCredentials> {
        Some(RegistryCredentials {
            username: "deployer".to_string(),
            password: "secret".to_string(),
        })
    }

    #[test]
    fn test_default_endpoints() {
        let registry = HttpRegistry::new(None).unwrap();
        assert_eq!(registry.endpoint(PublishTarget::RegistryDefault).unwrap(), DEFAULT_ENDPOINT);
        assert_eq!(
            registry.endpoint(PublishTarget::RegistryCentralPortal).unwrap(),
            CENTRAL_PORTAL_ENDPOINT
        );
    }

    #[test]
    fn test_portal_token() {
        assert_eq!(credentials().unwrap().portal_token(), "ZGVwbG95ZXI6c2VjcmV0");
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", credentials().unwrap());
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HttpRegistry::new(None).unwrap();
        let err = registry
            .upload(PublishTarget::RegistryDefault, &upload(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::PublishTransport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_default_target_puts_maven_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (base, seen) = serve(201, "").await;
        let registry = HttpRegistry::new(credentials())
            .unwrap()
            .with_endpoint(PublishTarget::RegistryDefault, format!("{base}/deploy/"));

        let receipt = registry
            .upload(PublishTarget::RegistryDefault, &upload(dir.path()))
            .await
            .unwrap();

        assert_eq!(receipt.endpoint, format!("{base}/deploy/"));
        assert_eq!(receipt.deployment_id, None);
        let seen = seen.lock().unwrap();
        assert!(seen.authorization.iter().all(|a| a.starts_with("Basic ")));
        assert_eq!(
            seen.lines,
            vec![
                "PUT /deploy/net/uiqui/embedded/1.4.0/embedded-1.4.0.jar HTTP/1.1".to_string(),
                "PUT /deploy/net/uiqui/embedded/1.4.0/embedded-1.4.0.jar.asc HTTP/1.1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_portal_returns_deployment_id() {
        let dir = tempfile::tempdir().unwrap();
        let (base, seen) = serve(201, "28570f16-da32-4c14-bd2e-c1acc0782365").await;
        let registry = HttpRegistry::new(credentials())
            .unwrap()
            .with_endpoint(PublishTarget::RegistryCentralPortal, format!("{base}/upload"));

        let receipt = registry
            .upload(PublishTarget::RegistryCentralPortal, &upload(dir.path()))
            .await
            .unwrap();

        assert_eq!(
            receipt.deployment_id.as_deref(),
            Some("28570f16-da32-4c14-bd2e-c1acc0782365")
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.lines.len(), 1);
        assert!(seen.lines[0].starts_with("POST /upload?"));
        assert_eq!(seen.authorization, vec!["Bearer ZGVwbG95ZXI6c2VjcmV0".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_upload_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = serve(401, "unauthorized").await;
        let registry = HttpRegistry::new(credentials())
            .unwrap()
            .with_endpoint(PublishTarget::RegistryCentralPortal, format!("{base}/upload"));

        let err = registry
            .upload(PublishTarget::RegistryCentralPortal, &upload(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::PublishTransport(_)));
        assert!(err.to_string().contains("401"));
    }
}
