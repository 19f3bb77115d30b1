use crate::unit::SourceUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Opaque token for a fully-qualified identity stored in the dependency cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactIdentity(pub i64);

/// Errors surfaced by the dependency cache.
///
/// `Malformed` is artifact-local and turns into a diagnostic; `Corrupted`
/// aborts the current analysis and schedules a full rebuild for the next
/// invocation.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Bad artifact format: {0}")]
    Malformed(String),

    #[error("Dependency cache corrupted: {0}")]
    Corrupted(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Store of class/source relationships maintained outside the orchestrator.
///
/// The orchestrator never inspects artifact bytes itself; it asks the cache
/// to reparse an artifact into an identity, and to answer "what depends on
/// the identities produced this round".
pub trait DependencyCache: Send + Sync {
    /// Parse the structural metadata of a staged artifact and register it,
    /// returning the fully-qualified identity the artifact implements.
    fn reparse_artifact(&self, path: &Path) -> CacheResult<ArtifactIdentity>;

    /// Qualified name for an identity, e.g. `pkg.sub.Foo`.
    fn resolve(&self, identity: ArtifactIdentity) -> CacheResult<String>;

    /// Source file name the artifact declares, e.g. `Foo.src`.
    fn source_file_name(&self, identity: ArtifactIdentity) -> CacheResult<String>;

    /// Identities that depend on classes produced by the given units.
    fn find_dependent_units(
        &self,
        compiled: &HashSet<SourceUnit>,
    ) -> CacheResult<Vec<ArtifactIdentity>>;

    /// Flush this round's registrations into the persistent cache.
    fn update(&self) -> CacheResult<()>;
}

/// Root-relative source path declared by an artifact: the package part of the
/// qualified name as directories, then the declared source file name, with a
/// leading `/`. This is the match key compared against a unit's actual
/// root-relative path during relocation.
pub fn source_relative_path(qualified_name: &str, source_file_name: &str) -> String {
    match qualified_name.rsplit_once('.') {
        Some((package, _)) if !package.is_empty() => {
            format!("/{}/{}", package.replace('.', "/"), source_file_name)
        }
        _ => format!("/{source_file_name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_relative_path_with_package() {
        assert_eq!(
            source_relative_path("pkg.sub.Foo", "Foo.src"),
            "/pkg/sub/Foo.src"
        );
    }

    #[test]
    fn test_source_relative_path_default_package() {
        assert_eq!(source_relative_path("Foo", "Foo.src"), "/Foo.src");
    }

    #[test]
    fn test_source_relative_path_nested_declaration() {
        // A nested declaration keeps its enclosing source file name and
        // shares that file's relative path.
        assert_eq!(
            source_relative_path("pkg.Foo$Inner", "Foo.src"),
            "/pkg/Foo.src"
        );
    }
}
