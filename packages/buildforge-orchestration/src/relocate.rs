use crate::chunk::{CompilationChunk, OutputTarget};
use crate::diagnostics::DiagnosticsSink;
use crate::project::ProjectIndex;
use crate::session::CompileSession;
use crate::unit::{OutputItem, SourceUnit};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// Separator-normalized form of a path for match-key comparison.
pub(crate) fn normalized(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Normalized string comparison, never identity: stale records left by
/// bucket collisions must not match on pointer or raw-string equality.
pub(crate) fn paths_equal(a: &str, b: &str) -> bool {
    a.replace('\\', "/") == b.replace('\\', "/")
}

/// Matches staged artifacts to source units and moves them to their final
/// locations. Runs once per chunk/target pass, strictly after both pipeline
/// workers have joined, so the record table is complete.
pub struct OutputRelocator {
    project: Arc<dyn ProjectIndex>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    session: Arc<CompileSession>,
}

impl OutputRelocator {
    pub fn new(
        project: Arc<dyn ProjectIndex>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        session: Arc<CompileSession>,
    ) -> Self {
        Self {
            project,
            diagnostics,
            session,
        }
    }

    /// Walk every unit under every source root of the pass, relocate matched
    /// artifacts, and record successes. Clears the record table afterwards so
    /// names cannot collide across chunks or rounds.
    pub async fn run(&self, chunk: &CompilationChunk, target: &OutputTarget) {
        let errored = self.diagnostics.units_with_errors();
        debug!(
            records = self.session.records().len(),
            target_dir = %target.dir.display(),
            "building output items"
        );
        for module in chunk.modules() {
            for root in self.project.source_roots(module, target.kind) {
                let prefix = self.project.package_prefix(&root);
                for unit in self.project.units_under(&root) {
                    self.process_unit(&unit, &root, prefix.as_deref(), target, &errored)
                        .await;
                }
            }
        }
        self.session.records().clear();
    }

    async fn process_unit(
        &self,
        unit: &SourceUnit,
        root: &Path,
        package_prefix: Option<&str>,
        target: &OutputTarget,
        errored: &HashSet<PathBuf>,
    ) {
        let records = self.session.records().records_for(unit.file_name());
        if records.is_empty() {
            return;
        }
        let Ok(root_relative) = unit.path().strip_prefix(root) else {
            return;
        };

        let prefix_path = package_prefix
            .filter(|p| !p.is_empty())
            .map(|p| format!("{}/", p.replace('.', "/")))
            .unwrap_or_default();
        let unit_relative = format!("/{}{}", prefix_path, normalized(root_relative));

        for record in records {
            if !paths_equal(&unit_relative, &record.relative_path) {
                continue;
            }
            match self
                .move_to_real_location(&record.staged_path, target, unit)
                .await
            {
                Some((output_dir, output_path)) => {
                    // Errors take precedence: a unit that produced any error
                    // diagnostic is never confirmed, even if its artifact moved.
                    if !errored.contains(unit.path()) {
                        self.session.add_success(unit.clone());
                        self.session.push_output_item(OutputItem {
                            output_dir,
                            output_path,
                            unit: unit.clone(),
                        });
                    }
                }
                None => {
                    debug!(
                        staged = %record.staged_path.display(),
                        unit = %unit,
                        "relocation failed; unit stays eligible for retry"
                    );
                }
            }
        }
    }

    /// Resolve the unit's real output directory and move the staged artifact
    /// there. Returns the final (directory, path) on success; `None` leaves
    /// the unit out of the success set so a later invocation retries it.
    async fn move_to_real_location(
        &self,
        staged: &Path,
        target: &OutputTarget,
        unit: &SourceUnit,
    ) -> Option<(PathBuf, PathBuf)> {
        // No module: the source has been invalidated mid-run, needs recompilation.
        let module = self.project.module_of(unit)?;
        let real_dir = if self.project.is_test_source(unit) {
            self.session
                .test_output_directory(self.project.as_ref(), &module)
        } else {
            self.session.output_directory(self.project.as_ref(), &module)
        }?;

        if paths_equal(&normalized(&target.dir), &normalized(&real_dir)) {
            // Already compiled into the real directory; only a refresh is due.
            self.session.schedule_refresh(staged.to_path_buf());
            return Some((real_dir, staged.to_path_buf()));
        }

        let suffix = staged.strip_prefix(&target.dir).ok()?;
        let destination = real_dir.join(suffix);
        if !move_file(staged, &destination).await {
            return None;
        }
        self.session.schedule_refresh(destination.clone());
        Some((real_dir, destination))
    }
}

/// Crash/retry-safe move: atomic rename, then rename again after creating
/// missing parent directories, then copy-and-delete (for destinations on a
/// different mount point).
pub(crate) async fn move_file(from: &Path, to: &Path) -> bool {
    if fs::rename(from, to).await.is_ok() {
        return true;
    }
    if let Some(parent) = to.parent() {
        let _ = fs::create_dir_all(parent).await;
        if fs::rename(from, to).await.is_ok() {
            return true;
        }
    }
    copy_then_delete(from, to).await
}

async fn copy_then_delete(from: &Path, to: &Path) -> bool {
    match fs::copy(from, to).await {
        Ok(_) => {
            if let Err(error) = fs::remove_file(from).await {
                warn!(
                    from = %from.display(),
                    %error,
                    "copied artifact but failed to remove the staged copy"
                );
            }
            true
        }
        Err(error) => {
            warn!(
                from = %from.display(),
                to = %to.display(),
                %error,
                "failed to relocate artifact"
            );
            false
        }
    }
}
