use crate::chunk::TargetKind;
use crate::unit::{ModuleId, SourceUnit};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Host project/module/file index, consumed at its interface only.
pub trait ProjectIndex: Send + Sync {
    /// Owning module of a unit, or `None` when the unit has been invalidated.
    fn module_of(&self, unit: &SourceUnit) -> Option<ModuleId>;

    /// Whether the unit lives under a test source root.
    fn is_test_source(&self, unit: &SourceUnit) -> bool;

    /// Real output directory for main sources, if configured.
    fn output_directory(&self, module: &ModuleId) -> Option<PathBuf>;

    /// Real output directory for test sources, if configured.
    fn test_output_directory(&self, module: &ModuleId) -> Option<PathBuf>;

    /// Source roots of a module participating in a pass of the given kind.
    fn source_roots(&self, module: &ModuleId, kind: TargetKind) -> Vec<PathBuf>;

    /// Package name the root maps to, if any (dotted form, e.g. `com.acme`).
    fn package_prefix(&self, root: &Path) -> Option<String>;

    /// Compilable source units located under the given root.
    fn units_under(&self, root: &Path) -> Vec<SourceUnit>;
}

/// Opaque module-dependency chunker. Returns an ordered list of module
/// groups; each group is a single module or a set of mutually cyclic modules.
/// Cycle grouping is external by design and never re-derived here.
pub trait ModuleTopology: Send + Sync {
    fn module_groups(&self, modules: &[ModuleId]) -> Vec<Vec<ModuleId>>;
}

/// Maps a qualified name plus the declared source file name back to a live
/// source unit.
pub trait SourceLocator: Send + Sync {
    fn find_source_file(
        &self,
        qualified_name: &str,
        declared_source_name: &str,
    ) -> Option<SourceUnit>;
}

/// Boundary of the compile operation. Dependency-affected units outside the
/// scope are never compiled in the extra round; excluded units are dropped
/// from dependency analysis entirely.
pub trait CompileScope: Send + Sync {
    fn contains(&self, unit: &SourceUnit) -> bool;

    fn is_excluded(&self, _unit: &SourceUnit) -> bool {
        false
    }
}

/// Cooperative cancellation and status text, polled between chunks and rounds.
pub trait ProgressReporter: Send + Sync {
    fn is_canceled(&self) -> bool;

    fn set_status(&self, _text: &str) {}

    /// Secondary line, used for running statistics.
    fn set_detail(&self, _text: &str) {}
}

/// Scope that admits everything. Useful for whole-project operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedScope;

impl CompileScope for UnboundedScope {
    fn contains(&self, _unit: &SourceUnit) -> bool {
        true
    }
}

/// Progress reporter with a cancellation flag and no status output.
#[derive(Debug, Default)]
pub struct SilentProgress {
    canceled: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl ProgressReporter for SilentProgress {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}
