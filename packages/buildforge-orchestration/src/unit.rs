use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifier of a module owning source units. Module lifecycle and
/// topology live in the host project index; the orchestrator only groups by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub String);

impl ModuleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Main vs test classification of a source unit, answered by the project index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Main,
    Test,
}

/// Reference to a source item scheduled for compilation.
///
/// The unit does not own the file; the external project index controls its
/// lifecycle. Units whose module can no longer be resolved are treated as
/// invalidated and silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceUnit {
    path: PathBuf,
}

impl SourceUnit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component, the bucket key of the pending-record table.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for SourceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Confirmed result of one successfully compiled and relocated unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputItem {
    pub output_dir: PathBuf,
    pub output_path: PathBuf,
    pub unit: SourceUnit,
}

/// Interim record produced by the artifact indexer, awaiting match-and-relocate.
///
/// `relative_path` is the source path the artifact declares, relative to its
/// source root with a leading `/` and `/` separators. It is the authoritative
/// match key: bucket collisions on `source_name` are resolved by comparing it
/// against the unit's actual root-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub source_name: String,
    pub relative_path: String,
    pub staged_path: PathBuf,
}

/// Pending records for one chunk/target pass, keyed by declared source name.
///
/// Multiple records may share a name (nested declarations compile to several
/// artifacts from one source). Written by the artifact indexer while the
/// stream reader is still producing; read by the relocator only after both
/// workers have joined. Cleared after every pass so names cannot collide
/// across chunks or rounds.
#[derive(Default)]
pub struct RecordTable {
    records: DashMap<String, Vec<PendingRecord>>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: PendingRecord) {
        tracing::debug!(
            source_name = %record.source_name,
            relative_path = %record.relative_path,
            staged_path = %record.staged_path.display(),
            "registering pending record"
        );
        self.records
            .entry(record.source_name.clone())
            .or_default()
            .push(record);
    }

    /// All records registered under the given source name.
    pub fn records_for(&self, source_name: &str) -> Vec<PendingRecord> {
        self.records
            .get(source_name)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Total number of records across all names.
    pub fn len(&self) -> usize {
        self.records.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}
