//! Dependency declarations.
//!
//! The table is keyed by `(name, scope)` with insert-or-replace semantics: a
//! later declaration for the same key overrides the earlier one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::error::{KilnError, Result};

/// Lifecycle phase during which a dependency is visible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible to compilation and at runtime.
    Compile,

    /// Visible to test compilation and test execution.
    TestOnly,

    /// Visible to test execution only.
    TestRuntimeOnly,

    /// Resolved for the instrumentation agent, never placed on a classpath.
    AgentOnly,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Compile => "compile",
            Scope::TestOnly => "test_only",
            Scope::TestRuntimeOnly => "test_runtime_only",
            Scope::AgentOnly => "agent_only",
        }
    }

    /// Scopes placed on the test process classpath.
    pub fn test_scopes() -> [Scope; 3] {
        [Scope::Compile, Scope::TestOnly, Scope::TestRuntimeOnly]
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Logical library name, `group:artifact` or a bare artifact name.
    pub name: String,

    pub version: String,

    pub scope: Scope,

    /// Whether the resolver should follow the artifact's own dependencies.
    #[serde(default = "default_transitive")]
    pub transitive: bool,
}

fn default_transitive() -> bool {
    true
}

impl DependencySpec {
    /// `name:version` notation.
    pub fn notation(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DependencyKey {
    name: String,
    scope: Scope,
}

/// Declared dependencies, at most one per `(name, scope)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyTable {
    entries: BTreeMap<DependencyKey, DependencySpec>,
}

impl DependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a dependency, replacing any earlier declaration for the same
    /// `(name, scope)`.
    pub fn declare(
        &mut self,
        name: &str,
        version: &str,
        scope: Scope,
        transitive: bool,
    ) -> Result<()> {
        let name = name.trim();
        let version = version.trim();

        if name.is_empty() {
            return Err(KilnError::Configuration(
                "dependency name must not be empty".to_string(),
            ));
        }
        if version.is_empty() {
            return Err(KilnError::Configuration(format!(
                "dependency {name} ({scope}) has an empty version"
            )));
        }

        let key = DependencyKey {
            name: name.to_string(),
            scope,
        };
        let spec = DependencySpec {
            name: name.to_string(),
            version: version.to_string(),
            scope,
            transitive,
        };

        if let Some(previous) = self.entries.insert(key, spec) {
            debug!(
                dependency = %name,
                scope = %scope,
                previous = %previous.version,
                version = %version,
                "Dependency redeclared, later declaration wins"
            );
        }
        Ok(())
    }

    /// Declare from an already-built spec.
    pub fn declare_spec(&mut self, spec: &DependencySpec) -> Result<()> {
        self.declare(&spec.name, &spec.version, spec.scope, spec.transitive)
    }

    pub fn get(&self, name: &str, scope: Scope) -> Option<&DependencySpec> {
        self.entries.get(&DependencyKey {
            name: name.to_string(),
            scope,
        })
    }

    /// Dependencies declared in `scope`, ordered by name.
    pub fn in_scope(&self, scope: Scope) -> Vec<&DependencySpec> {
        self.entries.values().filter(|d| d.scope == scope).collect()
    }

    /// Dependencies visible to the test process, ordered by scope then name.
    pub fn test_classpath(&self) -> Vec<&DependencySpec> {
        Scope::test_scopes()
            .into_iter()
            .flat_map(|scope| self.in_scope(scope))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependencySpec> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
