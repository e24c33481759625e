//! Dependency resolution seam.
//!
//! Resolution algorithms are external to Kiln: a [`DependencyResolver`] turns
//! a declared dependency into concrete files. [`LocalRepository`] is the
//! host-backed implementation over a Maven-style directory tree:
//!
//! ```text
//! <root>/org/mockito/mockito-core/5.17.0/mockito-core-5.17.0.jar
//! <root>/org/mockito/mockito-core/5.17.0/deps      # "group:artifact:version" per line
//! ```
//!
//! Only the main `<artifact>-<version>.jar` is resolved; poms, checksums and
//! classifier jars in the same directory are ignored.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::{DependencySpec, KilnError, Result};

/// File listing an artifact's own dependencies, one `name:version` per line.
pub const DEPS_FILE: &str = "deps";

/// Resolves declared dependencies to files.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Resolve one declaration. With `transitive = false` only the declared
    /// artifact's own files are returned.
    async fn resolve(&self, spec: &DependencySpec) -> Result<Vec<PathBuf>>;
}

/// Resolve a list of declarations, de-duplicating files while keeping the
/// first-seen order.
pub async fn resolve_all(
    resolver: &dyn DependencyResolver,
    specs: &[&DependencySpec],
) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for spec in specs {
        for file in resolver.resolve(spec).await? {
            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
    }

    Ok(files)
}

/// Resolver over a local Maven-style repository directory.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `name` at `version`.
    fn artifact_dir(&self, name: &str, version: &str) -> PathBuf {
        let mut dir = self.root.clone();
        match name.split_once(':') {
            Some((group, artifact)) => {
                for part in group.split('.') {
                    dir.push(part);
                }
                dir.push(artifact);
            }
            None => dir.push(name),
        }
        dir.push(version);
        dir
    }

    /// Files of one artifact plus its declared `deps` entries.
    async fn artifact_files(
        &self,
        name: &str,
        version: &str,
    ) -> Result<(Vec<PathBuf>, Vec<(String, String)>)> {
        let dir = self.artifact_dir(name, version);
        let artifact = format!("{name}:{version}");

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            KilnError::DependencyResolution {
                artifact: artifact.clone(),
                reason: format!("{}: {e}", dir.display()),
            }
        })?;

        let artifact_id = name.rsplit_once(':').map_or(name, |(_, id)| id);
        let jar_name = format!("{artifact_id}-{version}.jar");

        let mut files = Vec::new();
        let mut deps = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if file_name == DEPS_FILE {
                let content = tokio::fs::read_to_string(&path).await?;
                deps = parse_deps(&content, &artifact)?;
            } else if file_name.to_str() == Some(jar_name.as_str()) {
                files.push(path);
            } else {
                debug!(file = %path.display(), "Ignoring non-artifact file");
            }
        }
        files.sort();

        Ok((files, deps))
    }
}

fn parse_deps(content: &str, owner: &str) -> Result<Vec<(String, String)>> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|line| match line.rsplit_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok((name.to_string(), version.to_string()))
            }
            _ => Err(KilnError::DependencyResolution {
                artifact: owner.to_string(),
                reason: format!("malformed deps entry: {line}"),
            }),
        })
        .collect()
}

#[async_trait]
impl DependencyResolver for LocalRepository {
    async fn resolve(&self, spec: &DependencySpec) -> Result<Vec<PathBuf>> {
        let (mut files, deps) = self.artifact_files(&spec.name, &spec.version).await?;

        if !spec.transitive {
            debug!(artifact = %spec.notation(), files = files.len(), "Resolved (non-transitive)");
            return Ok(files);
        }

        let mut visited: HashSet<(String, String)> = HashSet::new();
        visited.insert((spec.name.clone(), spec.version.clone()));
        let mut queue: VecDeque<(String, String)> = deps.into_iter().collect();

        while let Some((name, version)) = queue.pop_front() {
            if !visited.insert((name.clone(), version.clone())) {
                continue;
            }
            let (more, nested) = self.artifact_files(&name, &version).await?;
            files.extend(more);
            queue.extend(nested);
        }

        info!(
            artifact = %spec.notation(),
            files = files.len(),
            artifacts = visited.len(),
            "Resolved dependency"
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Scope;

    fn spec(name: &str, version: &str, transitive: bool) -> DependencySpec {
        DependencySpec {
            name: name.to_string(),
            version: version.to_string(),
            scope: Scope::TestOnly,
            transitive,
        }
    }

    fn publish(root: &Path, group: &str, artifact: &str, version: &str, deps: &[&str]) -> PathBuf {
        let dir = root
            .join(group.replace('.', "/"))
            .join(artifact)
            .join(version);
        std::fs::create_dir_all(&dir).unwrap();
        let jar = dir.join(format!("{artifact}-{version}.jar"));
        std::fs::write(&jar, b"PK").unwrap();
        if !deps.is_empty() {
            std::fs::write(dir.join(DEPS_FILE), deps.join("\n")).unwrap();
        }
        jar
    }

    #[test]
    fn test_artifact_dir_layout() {
        let repo = LocalRepository::new("/repo");
        assert_eq!(
            repo.artifact_dir("org.mockito:mockito-core", "5.17.0"),
            PathBuf::from("/repo/org/mockito/mockito-core/5.17.0")
        );
        assert_eq!(
            repo.artifact_dir("lib-a", "1.0"),
            PathBuf::from("/repo/lib-a/1.0")
        );
    }

    #[test]
    fn test_parse_deps_rejects_malformed() {
        assert!(parse_deps("org.a:b:1.0\n# comment\n\n", "x").unwrap().len() == 1);
        assert!(parse_deps("no-version", "x").is_err());
    }

    #[tokio::test]
    async fn test_transitive_resolution_follows_deps() {
        let dir = tempfile::tempdir().unwrap();
        let mockito = publish(
            dir.path(),
            "org.mockito",
            "mockito-core",
            "5.17.0",
            &["net.bytebuddy:byte-buddy:1.15.11", "org.objenesis:objenesis:3.3"],
        );
        let buddy = publish(dir.path(), "net.bytebuddy", "byte-buddy", "1.15.11", &[]);
        let objenesis = publish(dir.path(), "org.objenesis", "objenesis", "3.3", &[]);

        let repo = LocalRepository::new(dir.path());
        let files = repo
            .resolve(&spec("org.mockito:mockito-core", "5.17.0", true))
            .await
            .unwrap();

        assert_eq!(files, vec![mockito, buddy, objenesis]);
    }

    #[tokio::test]
    async fn test_non_transitive_returns_only_declared_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mockito = publish(
            dir.path(),
            "org.mockito",
            "mockito-core",
            "5.17.0",
            &["net.bytebuddy:byte-buddy:1.15.11"],
        );
        publish(dir.path(), "net.bytebuddy", "byte-buddy", "1.15.11", &[]);

        let repo = LocalRepository::new(dir.path());
        let files = repo
            .resolve(&spec("org.mockito:mockito-core", "5.17.0", false))
            .await
            .unwrap();

        assert_eq!(files, vec![mockito]);
    }

    #[tokio::test]
    async fn test_dependency_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "org.a", "a", "1.0", &["org.b:b:1.0"]);
        publish(dir.path(), "org.b", "b", "1.0", &["org.a:a:1.0"]);

        let repo = LocalRepository::new(dir.path());
        let files = repo.resolve(&spec("org.a:a", "1.0", true)).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(dir.path());
        let err = repo.resolve(&spec("org.a:a", "9.9", true)).await.unwrap_err();
        assert!(matches!(err, KilnError::DependencyResolution { .. }));
    }

    #[tokio::test]
    async fn test_resolve_all_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "org.a", "a", "1.0", &["org.c:c:1.0"]);
        publish(dir.path(), "org.b", "b", "1.0", &["org.c:c:1.0"]);
        publish(dir.path(), "org.c", "c", "1.0", &[]);

        let repo = LocalRepository::new(dir.path());
        let a = spec("org.a:a", "1.0", true);
        let b = spec("org.b:b", "1.0", true);
        let files = resolve_all(&repo, &[&a, &b]).await.unwrap();
        assert_eq!(files.len(), 3);
    }
}
