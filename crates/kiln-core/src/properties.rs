//! Project property source.
//!
//! Reads `gradle.properties`-style files (`key=value` or `key: value`, `#`
//! and `!` comments) and applies `KILN_<KEY>` environment overrides. The
//! project identity is taken from the `GROUP` and `VERSION_NAME` properties.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::domain::{KilnError, ProjectIdentity, Result};

pub const GROUP: &str = "GROUP";
pub const VERSION_NAME: &str = "VERSION_NAME";

/// Environment variable prefix for property overrides.
const ENV_PREFIX: &str = "KILN_";

/// Parsed project properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectProperties {
    values: BTreeMap<String, String>,
}

impl ProjectProperties {
    /// Parse properties from text.
    pub fn parse(content: &str) -> Self {
        let mut values = BTreeMap::new();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let split = line.find(['=', ':']);
            let (key, value) = match split {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line, ""),
            };

            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        Self { values }
    }

    /// Read a properties file. A missing file yields an empty set so that
    /// environment overrides alone can supply the identity.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No properties file, relying on environment");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Apply overrides from `(name, value)` pairs such as `std::env::vars()`.
    ///
    /// `KILN_VERSION_NAME=2.0` overrides `VERSION_NAME`.
    pub fn with_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                if key == GROUP || key == VERSION_NAME {
                    debug!(property = %key, "Property overridden from environment");
                    self.values.insert(key.to_string(), value);
                }
            }
        }
        self
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(std::env::vars())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(KilnError::Configuration(format!(
                "required project property {key} is missing"
            ))),
        }
    }

    /// Build the project identity. Missing `GROUP` or `VERSION_NAME` is fatal.
    pub fn identity(&self, project_name: &str) -> Result<ProjectIdentity> {
        let group = self.require(GROUP)?;
        let version = self.require(VERSION_NAME)?;
        ProjectIdentity::new(group, project_name, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# published coordinates
GROUP=net.uiqui
VERSION_NAME = 1.4.0
! legacy comment
POM_NAME: embedhttp
org.gradle.jvmargs=-Xmx2g -Dfile.encoding=UTF-8
";

    #[test]
    fn test_parse_properties() {
        let props = ProjectProperties::parse(SAMPLE);
        assert_eq!(props.get("GROUP"), Some("net.uiqui"));
        assert_eq!(props.get("VERSION_NAME"), Some("1.4.0"));
        assert_eq!(props.get("POM_NAME"), Some("embedhttp"));
        assert_eq!(
            props.get("org.gradle.jvmargs"),
            Some("-Xmx2g -Dfile.encoding=UTF-8")
        );
    }

    #[test]
    fn test_identity_from_properties() {
        let props = ProjectProperties::parse(SAMPLE);
        let id = props.identity("embedhttp").unwrap();
        assert_eq!(id.group, "net.uiqui");
        assert_eq!(id.version_name, "1.4.0");
        assert_eq!(id.name, "embedhttp");
    }

    #[test]
    fn test_missing_group_is_configuration_error() {
        let props = ProjectProperties::parse("VERSION_NAME=1.0\n");
        let err = props.identity("lib").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("GROUP"));
    }

    #[test]
    fn test_missing_version_is_configuration_error() {
        let props = ProjectProperties::parse("GROUP=net.uiqui\nVERSION_NAME=\n");
        let err = props.identity("lib").unwrap_err();
        assert!(err.to_string().contains("VERSION_NAME"));
    }

    #[test]
    fn test_overrides() {
        let props = ProjectProperties::parse(SAMPLE).with_overrides(vec![
            ("KILN_VERSION_NAME".to_string(), "1.5.0-SNAPSHOT".to_string()),
            ("KILN_POM_NAME".to_string(), "ignored".to_string()),
            ("VERSION_NAME".to_string(), "ignored".to_string()),
        ]);
        assert_eq!(props.get("VERSION_NAME"), Some("1.5.0-SNAPSHOT"));
        assert_eq!(props.get("POM_NAME"), Some("embedhttp"));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let props = ProjectProperties::load(&dir.path().join("gradle.properties")).unwrap();
        assert_eq!(props, ProjectProperties::default());
    }
}
