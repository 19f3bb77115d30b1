use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Diagnostic severity reported by the backend compiler or the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single compiler message, optionally tied to a source unit and position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub unit: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            unit: None,
            line: None,
            column: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn with_unit(mut self, unit: impl Into<PathBuf>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

/// Sink for diagnostics produced during one compile operation.
///
/// The success set is computed against this sink: a unit with any reported
/// error is never marked successfully compiled, even if its artifact moved.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    /// Number of error-severity diagnostics reported so far.
    fn error_count(&self) -> usize;

    /// Paths of source units that have at least one error diagnostic.
    fn units_with_errors(&self) -> HashSet<PathBuf>;
}

/// In-memory sink. The default choice for embedding and for tests.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    pub fn errors_for(&self, unit: &Path) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error && d.unit.as_deref() == Some(unit))
            .cloned()
            .collect()
    }
}

impl DiagnosticsSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    fn units_with_errors(&self) -> HashSet<PathBuf> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .filter_map(|d| d.unit.clone())
            .collect()
    }
}
