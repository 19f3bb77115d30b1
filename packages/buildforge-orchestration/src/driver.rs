use crate::backend::BackendCompiler;
use crate::chunk::ChunkScheduler;
use crate::deps::{CacheError, DependencyCache};
use crate::diagnostics::DiagnosticsSink;
use crate::error::{CompileError, Result};
use crate::pipeline::ProcessPipeline;
use crate::project::{CompileScope, ModuleTopology, ProgressReporter, ProjectIndex, SourceLocator};
use crate::relocate::OutputRelocator;
use crate::session::CompileSession;
use crate::unit::{OutputItem, SourceUnit};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One-shot request to rebuild everything on the next invocation, raised on
/// dependency cache corruption. First reason wins; later ones are logged.
#[derive(Clone, Default)]
pub struct RebuildRequest {
    reason: Arc<Mutex<Option<String>>>,
}

impl RebuildRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, reason: &str) {
        let mut slot = self.reason.lock();
        match &*slot {
            Some(existing) => {
                warn!(existing = %existing, ignored = %reason, "rebuild already requested");
            }
            None => {
                info!(%reason, "requesting full rebuild on next invocation");
                *slot = Some(reason.to_string());
            }
        }
    }

    pub fn requested(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

/// Everything a compile operation needs from its host, bundled once. Cheap to
/// clone; all collaborators are shared.
#[derive(Clone)]
pub struct CompileContext {
    project: Arc<dyn ProjectIndex>,
    topology: Arc<dyn ModuleTopology>,
    source_locator: Arc<dyn SourceLocator>,
    dependency_cache: Arc<dyn DependencyCache>,
    backend: Arc<dyn BackendCompiler>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    scope: Arc<dyn CompileScope>,
    progress: Arc<dyn ProgressReporter>,
    rebuild: RebuildRequest,
}

impl CompileContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project: Arc<dyn ProjectIndex>,
        topology: Arc<dyn ModuleTopology>,
        source_locator: Arc<dyn SourceLocator>,
        dependency_cache: Arc<dyn DependencyCache>,
        backend: Arc<dyn BackendCompiler>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        scope: Arc<dyn CompileScope>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            project,
            topology,
            source_locator,
            dependency_cache,
            backend,
            diagnostics,
            scope,
            progress,
            rebuild: RebuildRequest::new(),
        }
    }

    pub fn request_rebuild_next_time(&self, reason: &str) {
        self.rebuild.request(reason);
    }

    /// Reason a full rebuild has been scheduled, if any. The host checks this
    /// after `compile` returns and widens the next invocation accordingly.
    pub fn rebuild_requested(&self) -> Option<String> {
        self.rebuild.requested()
    }

    pub(crate) fn rebuild_handle(&self) -> RebuildRequest {
        self.rebuild.clone()
    }
}

/// Result of one compile operation.
#[derive(Debug, Clone, Default)]
pub struct CompileOutcome {
    /// Confirmed output items for units that compiled without errors and
    /// whose artifacts reached their real output directories.
    pub output_items: Vec<OutputItem>,
    /// Units still considered not compiled: requested or dependency-affected
    /// units without a confirmed success. Input for the next invocation.
    pub outstanding: Vec<SourceUnit>,
    /// Final output paths to refresh in the host filesystem view.
    pub files_to_refresh: Vec<std::path::PathBuf>,
}

/// Orchestrates one compile operation end to end: schedules chunks, runs the
/// backend pipeline per chunk and target, relocates artifacts, runs one extra
/// round over dependency-affected units, and settles caches and temp state.
pub struct CompileDriver {
    ctx: CompileContext,
    requested: Vec<SourceUnit>,
}

impl CompileDriver {
    pub fn new(ctx: CompileContext, requested: Vec<SourceUnit>) -> Self {
        Self { ctx, requested }
    }

    pub async fn compile(self) -> Result<CompileOutcome> {
        let session = Arc::new(CompileSession::new());
        info!(
            session = %session.id(),
            requested = self.requested.len(),
            "starting compile operation"
        );

        let rounds_result = self.run_rounds(&session).await;

        // Cleanup runs regardless of how the rounds ended.
        self.ctx.progress.set_status("Deleting temp files...");
        for staging_dir in session.take_staging_dirs() {
            tokio::spawn(async move {
                if let Err(error) = tokio::fs::remove_dir_all(&staging_dir).await {
                    debug!(dir = %staging_dir.display(), %error, "staging dir not removed");
                }
            });
        }

        let dependents_found = rounds_result
            .as_ref()
            .map(|dependents| !dependents.is_empty())
            .unwrap_or(false);
        if session.has_successes() || dependents_found {
            self.ctx.progress.set_status("Updating caches...");
            if let Err(cache_error) = self.ctx.dependency_cache.update() {
                if rounds_result.is_ok() {
                    return Err(self.cache_failure(cache_error));
                }
                warn!(%cache_error, "cache update failed after an already failing operation");
            }
        }

        let dependents = rounds_result?;
        let outstanding = outstanding_units(&self.requested, &dependents, &session.successes());
        info!(
            session = %session.id(),
            confirmed = session.successes().len(),
            outstanding = outstanding.len(),
            "compile operation finished"
        );

        Ok(CompileOutcome {
            output_items: session.take_output_items(),
            outstanding,
            files_to_refresh: session.take_files_to_refresh(),
        })
    }

    /// First round over the requested units, then exactly one extra round
    /// over in-scope dependency-affected units. Returns every dependent found,
    /// in scope or not; the outstanding set needs them all.
    async fn run_rounds(&self, session: &Arc<CompileSession>) -> Result<Vec<SourceUnit>> {
        if !self.requested.is_empty() {
            self.compile_round(&self.requested, session).await?;
        }

        // Dependency analysis only runs on a clean first round; an errored or
        // canceled operation reports its outstanding set from the request alone.
        if self.ctx.progress.is_canceled() || self.ctx.diagnostics.error_count() > 0 {
            return Ok(vec![]);
        }

        let dependents = self.find_dependent_units(session)?;
        let successes = session.successes();
        let in_scope: Vec<SourceUnit> = dependents
            .iter()
            .filter(|unit| self.ctx.scope.contains(unit) && !successes.contains(*unit))
            .cloned()
            .collect();
        if !in_scope.is_empty() {
            debug!(units = in_scope.len(), "compiling dependency-affected units");
            self.compile_round(&in_scope, session).await?;
        }

        Ok(dependents)
    }

    /// Compile one set of units chunk by chunk. Stops at the first chunk that
    /// reports errors or when the operation is canceled.
    async fn compile_round(&self, units: &[SourceUnit], session: &Arc<CompileSession>) -> Result<()> {
        let scheduler = ChunkScheduler::new(
            self.ctx.project.clone(),
            self.ctx.topology.clone(),
            session.clone(),
        );
        let relocator = OutputRelocator::new(
            self.ctx.project.clone(),
            self.ctx.diagnostics.clone(),
            session.clone(),
        );
        let pipeline = ProcessPipeline::new(
            self.ctx.backend.clone(),
            self.ctx.dependency_cache.clone(),
            self.ctx.diagnostics.clone(),
            self.ctx.progress.clone(),
            session.clone(),
            self.ctx.rebuild_handle(),
        );

        'chunks: for chunk in scheduler.schedule(units) {
            if self.ctx.progress.is_canceled() {
                break;
            }
            session.set_current_chunk(Some(chunk.display_name()));
            self.ctx
                .progress
                .set_status(&format!("Compiling {}", chunk.display_name()));

            for target in scheduler.output_targets(&chunk)? {
                if chunk.selected_units(target.kind).is_empty() {
                    continue;
                }
                pipeline.run(&chunk, &target).await?;
                relocator.run(&chunk, &target).await;

                // Checked per pass: a failing main pass must not start the
                // module's test pass.
                if self.ctx.diagnostics.error_count() > 0 {
                    debug!(chunk = %chunk.display_name(), "stopping round after errors");
                    break 'chunks;
                }
            }
        }
        session.set_current_chunk(None);
        Ok(())
    }

    /// Resolve every identity affected by this round's successes back to a
    /// live source unit. Excluded units are dropped from the analysis.
    fn find_dependent_units(&self, session: &Arc<CompileSession>) -> Result<Vec<SourceUnit>> {
        self.ctx.progress.set_status("Checking dependencies...");
        let successes = session.successes();
        let identities = self
            .ctx
            .dependency_cache
            .find_dependent_units(&successes)
            .map_err(|cache_error| self.cache_failure(cache_error))?;

        let mut dependents = HashSet::new();
        for identity in identities {
            let qualified_name = self
                .ctx
                .dependency_cache
                .resolve(identity)
                .map_err(|cache_error| self.cache_failure(cache_error))?;
            let source_name = self
                .ctx
                .dependency_cache
                .source_file_name(identity)
                .map_err(|cache_error| self.cache_failure(cache_error))?;

            let Some(unit) = self
                .ctx
                .source_locator
                .find_source_file(&qualified_name, &source_name)
            else {
                debug!(%qualified_name, "no live source for dependent identity");
                continue;
            };
            if self.ctx.scope.is_excluded(&unit) {
                continue;
            }
            dependents.insert(unit);
        }

        let mut dependents: Vec<SourceUnit> = dependents.into_iter().collect();
        dependents.sort_by(|a, b| a.path().cmp(b.path()));
        info!("Found {} dependent files", dependents.len());
        Ok(dependents)
    }

    fn cache_failure(&self, error: CacheError) -> CompileError {
        match error {
            CacheError::Corrupted(message) => {
                self.ctx.request_rebuild_next_time(&message);
                CompileError::CacheCorrupted(message)
            }
            malformed => CompileError::Other(anyhow::Error::new(malformed)),
        }
    }
}

/// Requested and dependency-affected units without a confirmed success, in
/// stable path order. Out-of-scope dependents stay outstanding: they were
/// affected but this operation was not allowed to compile them.
fn outstanding_units(
    requested: &[SourceUnit],
    dependents: &[SourceUnit],
    successes: &HashSet<SourceUnit>,
) -> Vec<SourceUnit> {
    let mut outstanding: HashSet<SourceUnit> = requested.iter().cloned().collect();
    outstanding.extend(dependents.iter().cloned());
    let mut outstanding: Vec<SourceUnit> = outstanding
        .into_iter()
        .filter(|unit| !successes.contains(unit))
        .collect();
    outstanding.sort_by(|a, b| a.path().cmp(b.path()));
    outstanding
}
