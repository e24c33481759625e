//! Artifact packaging.
//!
//! Builds a jar (zip) from the compiled classes with `META-INF/MANIFEST.MF`
//! as the first file entry. Entries are written in sorted order with a fixed
//! timestamp so the same classes always produce the same bytes.

use kiln_core::{sha256_hex, KilnError, ManifestMetadata, ProjectIdentity, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_DIR: &str = "META-INF/";
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// A packaged artifact on disk.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub path: PathBuf,
    pub identity: ProjectIdentity,

    /// SHA-256 of the archive bytes.
    pub digest: String,
    pub size: u64,
}

impl PackagedArtifact {
    fn load(path: PathBuf, identity: ProjectIdentity) -> Result<Self> {
        let bytes = std::fs::read(&path)?;
        Ok(Self {
            digest: sha256_hex(&bytes),
            size: bytes.len() as u64,
            path,
            identity,
        })
    }
}

fn archive_err(e: impl std::fmt::Display) -> KilnError {
    KilnError::Archive(e.to_string())
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

/// Packages compiled output into `<libs>/<name>-<version>.jar`.
#[derive(Debug, Clone)]
pub struct Packager {
    libs_dir: PathBuf,
}

impl Packager {
    pub fn new(libs_dir: impl Into<PathBuf>) -> Self {
        Self {
            libs_dir: libs_dir.into(),
        }
    }

    /// Blocking; run under `spawn_blocking` from async code.
    pub fn package(&self, classes_dir: &Path, identity: &ProjectIdentity) -> Result<PackagedArtifact> {
        if !classes_dir.is_dir() {
            return Err(KilnError::Archive(format!(
                "classes directory {} does not exist",
                classes_dir.display()
            )));
        }
        std::fs::create_dir_all(&self.libs_dir)?;
        let path = self.libs_dir.join(identity.artifact_file_name("jar"));

        let mut writer = ZipWriter::new(File::create(&path)?);
        let options = entry_options();

        writer.add_directory(MANIFEST_DIR, options).map_err(archive_err)?;
        writer.start_file(MANIFEST_PATH, options).map_err(archive_err)?;
        writer.write_all(identity.manifest().render().as_bytes())?;

        let mut entries = 0usize;
        for entry in WalkDir::new(classes_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(archive_err)?;
            let relative = entry.path().strip_prefix(classes_dir).map_err(archive_err)?;
            let name = entry_name(relative)?;

            if entry.file_type().is_dir() {
                if name != MANIFEST_DIR.trim_end_matches('/') {
                    writer
                        .add_directory(format!("{name}/"), options)
                        .map_err(archive_err)?;
                }
                continue;
            }
            if name == MANIFEST_PATH {
                debug!("Replacing manifest found in classes directory");
                continue;
            }

            writer.start_file(name, options).map_err(archive_err)?;
            let mut source = File::open(entry.path())?;
            std::io::copy(&mut source, &mut writer)?;
            entries += 1;
        }

        writer.finish().map_err(archive_err)?;

        let artifact = PackagedArtifact::load(path, identity.clone())?;
        info!(
            path = %artifact.path.display(),
            entries,
            size = artifact.size,
            digest = %artifact.digest,
            "Packaged artifact"
        );
        Ok(artifact)
    }
}

/// Archive entry name with `/` separators.
fn entry_name(relative: &Path) -> Result<String> {
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    parts
        .map(|parts| parts.join("/"))
        .ok_or_else(|| KilnError::Archive(format!("non UTF-8 path {}", relative.display())))
}

/// Manifest text of an archive, if it has one.
pub fn read_manifest(path: &Path) -> Result<Option<String>> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?)).map_err(archive_err)?;
    let mut entry = match archive.by_name(MANIFEST_PATH) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(archive_err(e)),
    };
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(Some(content))
}

/// Write `manifest` into the artifact, replacing any existing manifest.
///
/// Leaves the archive untouched when it already carries exactly this
/// manifest, so embedding twice yields the same bytes.
pub fn embed_manifest(artifact: &PackagedArtifact, manifest: &ManifestMetadata) -> Result<PackagedArtifact> {
    let rendered = manifest.render();
    if read_manifest(&artifact.path)?.as_deref() == Some(rendered.as_str()) {
        return Ok(artifact.clone());
    }

    let staging = artifact.path.with_extension("jar.tmp");
    {
        let mut source =
            ZipArchive::new(BufReader::new(File::open(&artifact.path)?)).map_err(archive_err)?;
        let mut writer = ZipWriter::new(File::create(&staging)?);
        let options = entry_options();

        writer.add_directory(MANIFEST_DIR, options).map_err(archive_err)?;
        writer.start_file(MANIFEST_PATH, options).map_err(archive_err)?;
        writer.write_all(rendered.as_bytes())?;

        for idx in 0..source.len() {
            let entry = source.by_index_raw(idx).map_err(archive_err)?;
            if entry.name() == MANIFEST_DIR || entry.name() == MANIFEST_PATH {
                continue;
            }
            writer.raw_copy_file(entry).map_err(archive_err)?;
        }
        writer.finish().map_err(archive_err)?;
    }
    std::fs::rename(&staging, &artifact.path)?;

    debug!(path = %artifact.path.display(), "Embedded manifest");
    PackagedArtifact::load(artifact.path.clone(), artifact.identity.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ProjectIdentity {
        ProjectIdentity::new("net.uiqui", "embedded", "1.4.0").unwrap()
    }

    fn classes(dir: &Path) -> PathBuf {
        let classes = dir.join("classes");
        std::fs::create_dir_all(classes.join("net/uiqui/embedded")).unwrap();
        std::fs::write(classes.join("net/uiqui/embedded/Server.class"), b"cafebabe").unwrap();
        std::fs::write(classes.join("app.properties"), b"port=8080").unwrap();
        classes
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_package_layout() {
        let dir = tempfile::tempdir().unwrap();
        let classes = classes(dir.path());
        let artifact = Packager::new(dir.path().join("libs"))
            .package(&classes, &identity())
            .unwrap();

        assert_eq!(artifact.path, dir.path().join("libs/embedded-1.4.0.jar"));
        let names = entry_names(&artifact.path);
        assert_eq!(names[0], MANIFEST_DIR);
        assert_eq!(names[1], MANIFEST_PATH);
        assert!(names.contains(&"net/uiqui/embedded/Server.class".to_string()));
        assert!(names.contains(&"app.properties".to_string()));

        let manifest = read_manifest(&artifact.path).unwrap().unwrap();
        assert!(manifest.contains("Implementation-Title: embedded\r\n"));
        assert!(manifest.contains("Implementation-Version: 1.4.0\r\n"));
    }

    #[test]
    fn test_package_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let classes = classes(dir.path());
        let first = Packager::new(dir.path().join("a")).package(&classes, &identity()).unwrap();
        let second = Packager::new(dir.path().join("b")).package(&classes, &identity()).unwrap();
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn test_missing_classes_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = Packager::new(dir.path().join("libs"))
            .package(&dir.path().join("nope"), &identity())
            .unwrap_err();
        assert!(matches!(err, KilnError::Archive(_)));
    }

    #[test]
    fn test_embed_manifest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let classes = classes(dir.path());
        let artifact = Packager::new(dir.path().join("libs"))
            .package(&classes, &identity())
            .unwrap();

        let mut release = identity().manifest();
        release.implementation_version = "1.4.1".to_string();

        let once = embed_manifest(&artifact, &release).unwrap();
        let twice = embed_manifest(&once, &release).unwrap();
        assert_ne!(once.digest, artifact.digest);
        assert_eq!(once.digest, twice.digest);

        let manifest = read_manifest(&twice.path).unwrap().unwrap();
        assert!(manifest.contains("Implementation-Version: 1.4.1\r\n"));
        assert_eq!(manifest.matches("Implementation-Version").count(), 1);

        let names = entry_names(&twice.path);
        assert_eq!(names[1], MANIFEST_PATH);
        assert_eq!(names.iter().filter(|n| *n == MANIFEST_PATH).count(), 1);
        assert!(names.contains(&"net/uiqui/embedded/Server.class".to_string()));
    }
}
