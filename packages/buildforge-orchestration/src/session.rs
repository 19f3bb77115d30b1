use crate::project::{ProgressReporter, ProjectIndex};
use crate::unit::{ModuleId, OutputItem, RecordTable, SourceUnit};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Mutable state scoped to one compile operation.
///
/// Holds the per-invocation caches (module to resolved output directories,
/// created staging directories), the pending-record table shared with the
/// pipeline workers, and the accumulating results. Created per `compile`
/// call and discarded at its end; nothing here is process-wide.
pub struct CompileSession {
    id: Uuid,
    records: RecordTable,
    files_processed: AtomicUsize,
    artifacts_indexed: AtomicUsize,
    current_chunk: Mutex<Option<String>>,
    module_output: Mutex<HashMap<ModuleId, Option<PathBuf>>>,
    module_test_output: Mutex<HashMap<ModuleId, Option<PathBuf>>>,
    staging_dirs: Mutex<Vec<PathBuf>>,
    files_to_refresh: Mutex<Vec<PathBuf>>,
    output_items: Mutex<Vec<OutputItem>>,
    successes: Mutex<HashSet<SourceUnit>>,
}

impl CompileSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            records: RecordTable::new(),
            files_processed: AtomicUsize::new(0),
            artifacts_indexed: AtomicUsize::new(0),
            current_chunk: Mutex::new(None),
            module_output: Mutex::new(HashMap::new()),
            module_test_output: Mutex::new(HashMap::new()),
            staging_dirs: Mutex::new(Vec::new()),
            files_to_refresh: Mutex::new(Vec::new()),
            output_items: Mutex::new(Vec::new()),
            successes: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn records(&self) -> &RecordTable {
        &self.records
    }

    /// Real main output directory of a module, resolved lazily and cached for
    /// the rest of the operation.
    pub fn output_directory(
        &self,
        project: &dyn ProjectIndex,
        module: &ModuleId,
    ) -> Option<PathBuf> {
        self.module_output
            .lock()
            .entry(module.clone())
            .or_insert_with(|| project.output_directory(module))
            .clone()
    }

    /// Real test output directory of a module, cached like `output_directory`.
    pub fn test_output_directory(
        &self,
        project: &dyn ProjectIndex,
        module: &ModuleId,
    ) -> Option<PathBuf> {
        self.module_test_output
            .lock()
            .entry(module.clone())
            .or_insert_with(|| project.test_output_directory(module))
            .clone()
    }

    /// Register a staging directory for best-effort deletion at operation end.
    pub fn register_staging_dir(&self, dir: PathBuf) {
        self.staging_dirs.lock().push(dir);
    }

    pub fn take_staging_dirs(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.staging_dirs.lock())
    }

    /// Schedule a final output path for a host filesystem refresh.
    pub fn schedule_refresh(&self, path: PathBuf) {
        self.files_to_refresh.lock().push(path);
    }

    pub fn take_files_to_refresh(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.files_to_refresh.lock())
    }

    pub fn push_output_item(&self, item: OutputItem) {
        tracing::debug!(
            output_dir = %item.output_dir.display(),
            output_path = %item.output_path.display(),
            unit = %item.unit,
            "adding output item"
        );
        self.output_items.lock().push(item);
    }

    pub fn take_output_items(&self) -> Vec<OutputItem> {
        std::mem::take(&mut *self.output_items.lock())
    }

    pub fn add_success(&self, unit: SourceUnit) {
        self.successes.lock().insert(unit);
    }

    pub fn successes(&self) -> HashSet<SourceUnit> {
        self.successes.lock().clone()
    }

    pub fn has_successes(&self) -> bool {
        !self.successes.lock().is_empty()
    }

    pub fn set_current_chunk(&self, label: Option<String>) {
        *self.current_chunk.lock() = label;
    }

    pub fn record_source_processed(&self, progress: &dyn ProgressReporter) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
        progress.set_detail(&self.detail_text());
    }

    pub fn record_artifact_indexed(&self, progress: &dyn ProgressReporter) {
        self.artifacts_indexed.fetch_add(1, Ordering::Relaxed);
        progress.set_detail(&self.detail_text());
    }

    fn detail_text(&self) -> String {
        let files = self.files_processed.load(Ordering::Relaxed);
        let artifacts = self.artifacts_indexed.load(Ordering::Relaxed);
        match &*self.current_chunk.lock() {
            Some(label) => format!("Files: {files} - Artifacts: {artifacts} - Module: {label}"),
            None => format!("Files: {files} - Artifacts: {artifacts}"),
        }
    }
}

impl Default for CompileSession {
    fn default() -> Self {
        Self::new()
    }
}
