//! In-memory fakes for external collaborators (testing only)
//!
//! Provides `MemoryResolver`, which satisfies the [`DependencyResolver`]
//! contract without touching the filesystem layout of a real repository.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{DependencySpec, KilnError, Result};
use crate::resolver::DependencyResolver;

#[derive(Debug, Clone, Default)]
struct Artifact {
    files: Vec<PathBuf>,
    deps: Vec<(String, String)>,
}

/// In-memory resolver keyed by `(name, version)`.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    artifacts: Mutex<HashMap<(String, String), Artifact>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact with its files and `name:version` dependencies.
    pub fn add(&self, name: &str, version: &str, files: &[&str], deps: &[&str]) {
        let deps = deps
            .iter()
            .filter_map(|d| d.rsplit_once(':'))
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        let artifact = Artifact {
            files: files.iter().map(PathBuf::from).collect(),
            deps,
        };
        self.artifacts
            .lock()
            .unwrap()
            .insert((name.to_string(), version.to_string()), artifact);
    }

    /// Notations passed to `resolve`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, name: &str, version: &str) -> Result<Artifact> {
        self.artifacts
            .lock()
            .unwrap()
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| KilnError::DependencyResolution {
                artifact: format!("{name}:{version}"),
                reason: "not found".to_string(),
            })
    }
}

#[async_trait]
impl DependencyResolver for MemoryResolver {
    async fn resolve(&self, spec: &DependencySpec) -> Result<Vec<PathBuf>> {
        self.calls.lock().unwrap().push(spec.notation());

        let root = self.lookup(&spec.name, &spec.version)?;
        let mut files = root.files;
        if !spec.transitive {
            return Ok(files);
        }

        let mut visited = HashSet::new();
        visited.insert((spec.name.clone(), spec.version.clone()));
        let mut queue: VecDeque<_> = root.deps.into_iter().collect();
        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let artifact = self.lookup(&key.0, &key.1)?;
            files.extend(artifact.files);
            queue.extend(artifact.deps);
        }
        Ok(files)
    }
}
