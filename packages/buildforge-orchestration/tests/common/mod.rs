//! Shared fakes for the integration tests: an in-memory project index, a
//! scripted in-process backend, and a dependency cache that reparses the
//! metadata the backend writes into each staged artifact.

#![allow(dead_code)]

use async_trait::async_trait;
use buildforge_orchestration::{
    ArtifactIdentity, BackendCompiler, CacheError, CacheResult, CompilationChunk, CompileScope,
    CompilerEvent, CompilerHandle, DependencyCache, Diagnostic, InProcessHandle, ModuleId,
    ModuleTopology, OutputParser, ProjectIndex, Result, SourceKind, SourceLocator, SourceUnit,
    TargetKind,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SENTINEL: &str = "__COMPILE_FINISHED__";

/// Route tracing output through the test harness, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// In-memory project: units with module, kind and owning source root, plus
/// per-module output directories.
#[derive(Default)]
pub struct FakeProject {
    units: HashMap<PathBuf, (ModuleId, SourceKind)>,
    roots: Vec<(PathBuf, SourceKind)>,
    outputs: HashMap<ModuleId, PathBuf>,
    test_outputs: HashMap<ModuleId, PathBuf>,
}

impl FakeProject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>, kind: SourceKind) {
        self.roots.push((root.into(), kind));
    }

    pub fn add_unit(
        &mut self,
        path: impl Into<PathBuf>,
        module: &str,
        kind: SourceKind,
    ) -> SourceUnit {
        let path = path.into();
        self.units
            .insert(path.clone(), (ModuleId::new(module), kind));
        SourceUnit::new(path)
    }

    pub fn set_output(&mut self, module: &str, dir: impl Into<PathBuf>) {
        self.outputs.insert(ModuleId::new(module), dir.into());
    }

    pub fn set_test_output(&mut self, module: &str, dir: impl Into<PathBuf>) {
        self.test_outputs.insert(ModuleId::new(module), dir.into());
    }
}

impl ProjectIndex for FakeProject {
    fn module_of(&self, unit: &SourceUnit) -> Option<ModuleId> {
        self.units.get(unit.path()).map(|(m, _)| m.clone())
    }

    fn is_test_source(&self, unit: &SourceUnit) -> bool {
        self.units
            .get(unit.path())
            .map(|(_, k)| *k == SourceKind::Test)
            .unwrap_or(false)
    }

    fn output_directory(&self, module: &ModuleId) -> Option<PathBuf> {
        self.outputs.get(module).cloned()
    }

    fn test_output_directory(&self, module: &ModuleId) -> Option<PathBuf> {
        self.test_outputs.get(module).cloned()
    }

    fn source_roots(&self, _module: &ModuleId, kind: TargetKind) -> Vec<PathBuf> {
        self.roots
            .iter()
            .filter(|(_, root_kind)| kind.selects(*root_kind))
            .map(|(root, _)| root.clone())
            .collect()
    }

    fn package_prefix(&self, _root: &Path) -> Option<String> {
        None
    }

    fn units_under(&self, root: &Path) -> Vec<SourceUnit> {
        self.units
            .keys()
            .filter(|p| p.starts_with(root))
            .map(SourceUnit::new)
            .collect()
    }
}

/// Groups every module into its own chunk, in the given order.
pub struct SingletonTopology;

impl ModuleTopology for SingletonTopology {
    fn module_groups(&self, modules: &[ModuleId]) -> Vec<Vec<ModuleId>> {
        modules.iter().map(|m| vec![m.clone()]).collect()
    }
}

/// Preset grouping, restricted to the modules actually requested.
pub struct PresetTopology {
    pub groups: Vec<Vec<ModuleId>>,
}

impl ModuleTopology for PresetTopology {
    fn module_groups(&self, modules: &[ModuleId]) -> Vec<Vec<ModuleId>> {
        let requested: HashSet<_> = modules.iter().cloned().collect();
        self.groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter(|m| requested.contains(*m))
                    .cloned()
                    .collect()
            })
            .filter(|group: &Vec<ModuleId>| !group.is_empty())
            .collect()
    }
}

/// Line protocol of the scripted backend: `artifact:<path>`, `processed`,
/// `error:<unit path>:<message>`, and the sentinel.
pub struct ScriptParser;

impl OutputParser for ScriptParser {
    fn parse_line(&mut self, line: &str) -> Option<CompilerEvent> {
        if line == SENTINEL {
            return Some(CompilerEvent::Terminated);
        }
        if let Some(path) = line.strip_prefix("artifact:") {
            return Some(CompilerEvent::ArtifactWritten(PathBuf::from(path)));
        }
        if line == "processed" {
            return Some(CompilerEvent::SourceProcessed);
        }
        if let Some(rest) = line.strip_prefix("error:") {
            let (unit, message) = rest.split_once(':').unwrap_or((rest, "compile failed"));
            return Some(CompilerEvent::Diagnostic(
                Diagnostic::error(message.to_string()).with_unit(unit),
            ));
        }
        None
    }
}

/// In-process backend that "compiles" each unit by writing an artifact file
/// into the target directory. The artifact content carries the qualified name
/// and declared source name on two lines; `FakeCache` reparses them.
pub struct FakeBackend {
    /// Unit path to produced artifacts: (qualified name, declared source
    /// name, artifact path relative to the target directory). A unit may
    /// produce several artifacts (nested declarations).
    units: HashMap<PathBuf, Vec<(String, String, String)>>,
    failing: HashSet<PathBuf>,
    launches: Mutex<Vec<Vec<PathBuf>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
            failing: HashSet::new(),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Registers one artifact compiling `unit` produces. `artifact_rel` is
    /// the package path of the artifact inside the target directory.
    pub fn produces(&mut self, unit: &SourceUnit, qualified: &str, source: &str, artifact_rel: &str) {
        self.units
            .entry(unit.path().to_path_buf())
            .or_default()
            .push((
                qualified.to_string(),
                source.to_string(),
                artifact_rel.to_string(),
            ));
    }

    pub fn fail_unit(&mut self, unit: &SourceUnit) {
        self.failing.insert(unit.path().to_path_buf());
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    /// Unit paths of each invocation, in launch order.
    pub fn launched_units(&self) -> Vec<Vec<PathBuf>> {
        self.launches.lock().clone()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendCompiler for FakeBackend {
    async fn launch(
        &self,
        _chunk: &CompilationChunk,
        units: &[SourceUnit],
        target_dir: &Path,
    ) -> Result<Box<dyn CompilerHandle>> {
        let mut unit_paths: Vec<PathBuf> = units.iter().map(|u| u.path().to_path_buf()).collect();
        unit_paths.sort();
        self.launches.lock().push(unit_paths.clone());

        let mut script: Vec<(PathBuf, Vec<(String, String, PathBuf)>, bool)> = Vec::new();
        for path in unit_paths {
            let produced = self
                .units
                .get(&path)
                .into_iter()
                .flatten()
                .map(|(qualified, source, artifact_rel)| {
                    (
                        qualified.clone(),
                        source.clone(),
                        target_dir.join(artifact_rel),
                    )
                })
                .collect();
            let failing = self.failing.contains(&path);
            script.push((path, produced, failing));
        }

        Ok(Box::new(InProcessHandle::new(
            SENTINEL,
            Box::new(move || {
                let mut exit_code = 0;
                let mut lines = Vec::new();
                for (unit_path, produced, failing) in script {
                    // A failing unit may still emit artifacts first, the way
                    // real backends do for partially compiled sources.
                    for (qualified, source, artifact) in produced {
                        if let Some(parent) = artifact.parent() {
                            std::fs::create_dir_all(parent).ok();
                        }
                        std::fs::write(&artifact, format!("{qualified}\n{source}\n")).ok();
                        lines.push(format!("artifact:{}", artifact.display()));
                    }
                    if failing {
                        exit_code = 1;
                        lines.push(format!("error:{}:compilation failed", unit_path.display()));
                    } else {
                        lines.push("processed".to_string());
                    }
                }
                (exit_code, lines)
            }),
        )))
    }

    fn create_parser(&self) -> Box<dyn OutputParser> {
        Box::new(ScriptParser)
    }
}

/// Dependency cache fake. Reparses the two-line metadata the backend wrote
/// into each artifact and hands out preset dependents.
#[derive(Default)]
pub struct FakeCache {
    interned: Mutex<Vec<(String, String)>>,
    dependents: Mutex<Vec<(String, String)>>,
    pub corrupt_on_find: bool,
    pub corrupt_on_update: bool,
    updates: Mutex<usize>,
}

impl FakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity (qualified name, declared source name) reported as dependent
    /// on whatever this operation compiles.
    pub fn add_dependent(&self, qualified: &str, source: &str) {
        self.dependents
            .lock()
            .push((qualified.to_string(), source.to_string()));
    }

    pub fn update_count(&self) -> usize {
        *self.updates.lock()
    }

    fn intern(&self, qualified: String, source: String) -> ArtifactIdentity {
        let mut interned = self.interned.lock();
        let existing = interned.iter().position(|entry| entry.0 == qualified);
        let id = match existing {
            Some(id) => id,
            None => {
                interned.push((qualified, source));
                interned.len() - 1
            }
        };
        ArtifactIdentity(id as i64)
    }
}

impl DependencyCache for FakeCache {
    fn reparse_artifact(&self, path: &Path) -> CacheResult<ArtifactIdentity> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Malformed(format!("unreadable artifact: {e}")))?;
        let mut lines = content.lines();
        let (Some(qualified), Some(source)) = (lines.next(), lines.next()) else {
            return Err(CacheError::Malformed("missing metadata".into()));
        };
        Ok(self.intern(qualified.to_string(), source.to_string()))
    }

    fn resolve(&self, identity: ArtifactIdentity) -> CacheResult<String> {
        self.interned
            .lock()
            .get(identity.0 as usize)
            .map(|(qualified, _)| qualified.clone())
            .ok_or_else(|| CacheError::Malformed("unknown identity".into()))
    }

    fn source_file_name(&self, identity: ArtifactIdentity) -> CacheResult<String> {
        self.interned
            .lock()
            .get(identity.0 as usize)
            .map(|(_, source)| source.clone())
            .ok_or_else(|| CacheError::Malformed("unknown identity".into()))
    }

    fn find_dependent_units(
        &self,
        compiled: &HashSet<SourceUnit>,
    ) -> CacheResult<Vec<ArtifactIdentity>> {
        if self.corrupt_on_find {
            return Err(CacheError::Corrupted("dependency index unreadable".into()));
        }
        if compiled.is_empty() {
            return Ok(vec![]);
        }
        Ok(self
            .dependents
            .lock()
            .clone()
            .into_iter()
            .map(|(qualified, source)| self.intern(qualified, source))
            .collect())
    }

    fn update(&self) -> CacheResult<()> {
        *self.updates.lock() += 1;
        if self.corrupt_on_update {
            return Err(CacheError::Corrupted("cache flush failed".into()));
        }
        Ok(())
    }
}

/// Maps qualified names back to registered source units.
#[derive(Default)]
pub struct FakeLocator {
    sources: HashMap<String, SourceUnit>,
}

impl FakeLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, qualified: &str, unit: &SourceUnit) {
        self.sources.insert(qualified.to_string(), unit.clone());
    }
}

impl SourceLocator for FakeLocator {
    fn find_source_file(
        &self,
        qualified_name: &str,
        _declared_source_name: &str,
    ) -> Option<SourceUnit> {
        self.sources.get(qualified_name).cloned()
    }
}

/// Scope admitting only units under a path prefix.
pub struct PrefixScope {
    pub prefix: PathBuf,
}

impl CompileScope for PrefixScope {
    fn contains(&self, unit: &SourceUnit) -> bool {
        unit.path().starts_with(&self.prefix)
    }
}

/// Convenience holder wiring the fakes into a `CompileContext`.
pub struct Fixture {
    pub backend: Arc<FakeBackend>,
    pub cache: Arc<FakeCache>,
    pub sink: Arc<buildforge_orchestration::CollectingSink>,
}

impl Fixture {
    pub fn context(
        &self,
        project: FakeProject,
        topology: impl ModuleTopology + 'static,
        locator: FakeLocator,
        scope: impl CompileScope + 'static,
    ) -> buildforge_orchestration::CompileContext {
        self.context_with_progress(
            project,
            topology,
            locator,
            scope,
            Arc::new(buildforge_orchestration::SilentProgress::new()),
        )
    }

    pub fn context_with_progress(
        &self,
        project: FakeProject,
        topology: impl ModuleTopology + 'static,
        locator: FakeLocator,
        scope: impl CompileScope + 'static,
        progress: Arc<dyn buildforge_orchestration::ProgressReporter>,
    ) -> buildforge_orchestration::CompileContext {
        buildforge_orchestration::CompileContext::new(
            Arc::new(project),
            Arc::new(topology),
            Arc::new(locator),
            self.cache.clone(),
            self.backend.clone(),
            self.sink.clone(),
            Arc::new(scope),
            progress,
        )
    }
}

pub fn fixture(backend: FakeBackend, cache: FakeCache) -> Fixture {
    init_tracing();
    Fixture {
        backend: Arc::new(backend),
        cache: Arc::new(cache),
        sink: Arc::new(buildforge_orchestration::CollectingSink::new()),
    }
}
