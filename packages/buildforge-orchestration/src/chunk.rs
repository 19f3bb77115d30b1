use crate::error::Result;
use crate::project::{ModuleTopology, ProjectIndex};
use crate::session::CompileSession;
use crate::unit::{ModuleId, SourceKind, SourceUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

/// Which selection of a chunk's sources one pass compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Main,
    Test,
    Combined,
}

impl TargetKind {
    pub fn selects(&self, kind: SourceKind) -> bool {
        match self {
            TargetKind::Main => kind == SourceKind::Main,
            TargetKind::Test => kind == SourceKind::Test,
            TargetKind::Combined => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Main => "main",
            TargetKind::Test => "test",
            TargetKind::Combined => "combined",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output directory and source selection for one compiler pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub dir: PathBuf,
    pub kind: TargetKind,
}

impl OutputTarget {
    pub fn new(dir: impl Into<PathBuf>, kind: TargetKind) -> Self {
        Self {
            dir: dir.into(),
            kind,
        }
    }
}

/// A set of mutually cyclic modules compiled together in one backend pass,
/// plus the units selected for this round. Created per scheduling pass and
/// discarded after the chunk finishes.
#[derive(Debug, Clone)]
pub struct CompilationChunk {
    modules: Vec<ModuleId>,
    units: Vec<(SourceUnit, SourceKind)>,
}

impl CompilationChunk {
    pub fn new(modules: Vec<ModuleId>, units: Vec<(SourceUnit, SourceKind)>) -> Self {
        Self { modules, units }
    }

    pub fn modules(&self) -> &[ModuleId] {
        &self.modules
    }

    pub fn units(&self) -> &[(SourceUnit, SourceKind)] {
        &self.units
    }

    /// Units this pass compiles, filtered by the target's source selection.
    pub fn selected_units(&self, kind: TargetKind) -> Vec<SourceUnit> {
        self.units
            .iter()
            .filter(|(_, source_kind)| kind.selects(*source_kind))
            .map(|(unit, _)| unit.clone())
            .collect()
    }

    /// Comma-separated module names, used for status text.
    pub fn display_name(&self) -> String {
        self.modules
            .iter()
            .map(ModuleId::name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Partitions the requested units into dependency-ordered chunks and assigns
/// output targets per chunk.
pub struct ChunkScheduler {
    project: Arc<dyn ProjectIndex>,
    topology: Arc<dyn ModuleTopology>,
    session: Arc<CompileSession>,
}

impl ChunkScheduler {
    pub fn new(
        project: Arc<dyn ProjectIndex>,
        topology: Arc<dyn ModuleTopology>,
        session: Arc<CompileSession>,
    ) -> Self {
        Self {
            project,
            topology,
            session,
        }
    }

    /// Group units by owning module and partition them along the external
    /// chunker's ordered module groups. Units whose module cannot be resolved
    /// have been invalidated and are dropped.
    pub fn schedule(&self, units: &[SourceUnit]) -> Vec<CompilationChunk> {
        let mut by_module: HashMap<ModuleId, Vec<(SourceUnit, SourceKind)>> = HashMap::new();
        for unit in units {
            let Some(module) = self.project.module_of(unit) else {
                debug!(unit = %unit, "dropping unit with unresolved module");
                continue;
            };
            let kind = if self.project.is_test_source(unit) {
                SourceKind::Test
            } else {
                SourceKind::Main
            };
            by_module.entry(module).or_default().push((unit.clone(), kind));
        }

        let mut modules: Vec<ModuleId> = by_module.keys().cloned().collect();
        modules.sort();

        self.topology
            .module_groups(&modules)
            .into_iter()
            .filter_map(|group| {
                let mut chunk_units = Vec::new();
                for module in &group {
                    if let Some(module_units) = by_module.get(module) {
                        chunk_units.extend(module_units.iter().cloned());
                    }
                }
                if chunk_units.is_empty() {
                    None
                } else {
                    Some(CompilationChunk::new(group, chunk_units))
                }
            })
            .collect()
    }

    /// Output targets for one chunk.
    ///
    /// A single-module chunk whose test output directory differs from its
    /// main output directory gets two passes (main then test); otherwise one
    /// combined pass into the real directory. A multi-module chunk always
    /// compiles into one freshly created staging directory: cyclic modules
    /// cannot safely target divergent real directories in one pass.
    pub fn output_targets(&self, chunk: &CompilationChunk) -> Result<Vec<OutputTarget>> {
        if let [module] = chunk.modules() {
            let main = self.session.output_directory(self.project.as_ref(), module);
            let test = self.session.test_output_directory(self.project.as_ref(), module);

            let mut targets = Vec::new();
            match test {
                Some(test_dir) if main.as_ref() != Some(&test_dir) => {
                    if let Some(main_dir) = main {
                        targets.push(OutputTarget::new(main_dir, TargetKind::Main));
                    }
                    targets.push(OutputTarget::new(test_dir, TargetKind::Test));
                }
                _ => match main {
                    Some(main_dir) => targets.push(OutputTarget::new(main_dir, TargetKind::Combined)),
                    None => error!(module = %module, "no output directory configured for module"),
                },
            }
            return Ok(targets);
        }

        let staging = tempfile::Builder::new()
            .prefix("compile")
            .suffix("output")
            .tempdir()?
            .keep();
        self.session.register_staging_dir(staging.clone());
        Ok(vec![OutputTarget::new(staging, TargetKind::Combined)])
    }
}
