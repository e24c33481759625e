//! Project identity and the manifest metadata derived from it.

use serde::{Deserialize, Serialize};

use super::error::{KilnError, Result};

/// Maximum manifest line length in bytes, excluding the line break.
const MANIFEST_LINE_LIMIT: usize = 70;

/// Identity of the project being built.
///
/// Read once at configuration time and immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdentity {
    /// Maven-style group, e.g. `net.uiqui`.
    pub group: String,

    /// Project name, used as the artifact base name and implementation title.
    pub name: String,

    /// Version label, e.g. `1.4.0`.
    pub version_name: String,
}

impl ProjectIdentity {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version_name: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            group: group.into().trim().to_string(),
            name: name.into().trim().to_string(),
            version_name: version_name.into().trim().to_string(),
        };

        if identity.group.is_empty() {
            return Err(KilnError::Configuration("GROUP must not be empty".into()));
        }
        if identity.name.is_empty() {
            return Err(KilnError::Configuration("project name must not be empty".into()));
        }
        if identity.version_name.is_empty() {
            return Err(KilnError::Configuration(
                "VERSION_NAME must not be empty".into(),
            ));
        }

        Ok(identity)
    }

    /// `group:name:version` coordinates.
    pub fn coordinates(&self) -> String {
        format!("{}:{}:{}", self.group, self.name, self.version_name)
    }

    /// File name of an artifact with the given extension, e.g. `name-1.0.jar`.
    pub fn artifact_file_name(&self, extension: &str) -> String {
        format!("{}-{}.{}", self.name, self.version_name, extension)
    }

    /// Registry path prefix in Maven layout: `net/uiqui/name/1.0`.
    pub fn repository_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group.replace('.', "/"),
            self.name,
            self.version_name
        )
    }

    /// Manifest metadata embedded into the packaged artifact.
    pub fn manifest(&self) -> ManifestMetadata {
        ManifestMetadata {
            implementation_title: self.name.clone(),
            implementation_version: self.version_name.clone(),
        }
    }
}

/// Metadata written into the artifact's manifest segment at package time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub implementation_title: String,
    pub implementation_version: String,
}

impl ManifestMetadata {
    /// Render as a `META-INF/MANIFEST.MF` document.
    ///
    /// Lines use CRLF and are wrapped with single-space continuation lines so
    /// that no line exceeds the manifest byte limit.
    pub fn render(&self) -> String {
        let attributes = [
            ("Manifest-Version", "1.0"),
            ("Created-By", concat!("kiln ", env!("CARGO_PKG_VERSION"))),
            ("Implementation-Title", self.implementation_title.as_str()),
            ("Implementation-Version", self.implementation_version.as_str()),
        ];

        let mut out = String::new();
        for (key, value) in attributes {
            write_manifest_line(&mut out, &format!("{key}: {value}"));
        }
        out.push_str("\r\n");
        out
    }
}

fn write_manifest_line(out: &mut String, line: &str) {
    let mut limit = MANIFEST_LINE_LIMIT;
    let mut current = 0;
    let mut start = 0;

    for (idx, ch) in line.char_indices() {
        let width = ch.len_utf8();
        if current + width > limit {
            out.push_str(&line[start..idx]);
            out.push_str("\r\n ");
            start = idx;
            current = 0;
            // continuation lines lose one byte to the leading space
            limit = MANIFEST_LINE_LIMIT - 1;
        }
        current += width;
    }
    out.push_str(&line[start..]);
    out.push_str("\r\n");
}
