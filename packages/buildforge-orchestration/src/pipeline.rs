use crate::backend::{BackendCompiler, CompilerEvent, OutputParser};
use crate::chunk::{CompilationChunk, OutputTarget};
use crate::deps::{source_relative_path, CacheError, DependencyCache};
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::driver::RebuildRequest;
use crate::error::{CompileError, Result};
use crate::project::ProgressReporter;
use crate::session::CompileSession;
use crate::unit::PendingRecord;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Backpressure bound between the stream reader and the artifact indexer.
pub const ARTIFACT_QUEUE_CAPACITY: usize = 256;

/// Runs one backend invocation: launches the compiler, fans its output into
/// the diagnostics sink and the artifact indexer, and joins everything in a
/// fixed order so the record table is complete before relocation starts.
pub struct ProcessPipeline {
    backend: Arc<dyn BackendCompiler>,
    dependency_cache: Arc<dyn DependencyCache>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    progress: Arc<dyn ProgressReporter>,
    session: Arc<CompileSession>,
    rebuild: RebuildRequest,
    interrupt: CancellationToken,
}

impl ProcessPipeline {
    pub fn new(
        backend: Arc<dyn BackendCompiler>,
        dependency_cache: Arc<dyn DependencyCache>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        progress: Arc<dyn ProgressReporter>,
        session: Arc<CompileSession>,
        rebuild: RebuildRequest,
    ) -> Self {
        Self {
            backend,
            dependency_cache,
            diagnostics,
            progress,
            session,
            rebuild,
            interrupt: CancellationToken::new(),
        }
    }

    /// Token that force-terminates a running invocation when cancelled.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Run one invocation to completion and return its exit code.
    ///
    /// Join order is wait, then reader, then indexer. The reader keeps
    /// draining the compiler stream even after the indexer is gone, and the
    /// indexer drains every queued artifact after the reader closes the
    /// channel, so a completed invocation always yields a complete table.
    pub async fn run(&self, chunk: &CompilationChunk, target: &OutputTarget) -> Result<i32> {
        let units = chunk.selected_units(target.kind);
        info!(
            chunk = %chunk.display_name(),
            target = %target.kind,
            units = units.len(),
            "launching backend compiler"
        );
        let mut handle = self.backend.launch(chunk, &units, &target.dir).await?;
        let output = handle.take_output().ok_or_else(|| {
            CompileError::invalid_invocation("backend handle yielded no output stream")
        })?;
        let parser = self.backend.create_parser();

        let (artifact_tx, artifact_rx) = mpsc::channel(ARTIFACT_QUEUE_CAPACITY);
        let reader = tokio::spawn(stream_reader(
            output,
            parser,
            self.diagnostics.clone(),
            self.progress.clone(),
            self.session.clone(),
            artifact_tx,
            self.interrupt.clone(),
        ));
        let indexer = tokio::spawn(artifact_indexer(
            artifact_rx,
            self.dependency_cache.clone(),
            self.diagnostics.clone(),
            self.progress.clone(),
            self.session.clone(),
        ));

        let waited = tokio::select! {
            status = handle.wait() => Some(status),
            _ = self.interrupt.cancelled() => None,
        };
        let exit_code = match waited {
            Some(status) => status?,
            // Interrupted: force-terminate and take the last known exit code.
            None => handle.kill().await,
        };

        reader.await?;
        let index_result = indexer.await?;
        match index_result {
            Ok(()) => {}
            Err(CacheError::Corrupted(message)) => {
                self.rebuild.request(&message);
            }
            Err(error @ CacheError::Malformed(_)) => {
                self.diagnostics.report(Diagnostic::error(error.to_string()));
            }
        }

        if exit_code != 0 && !self.progress.is_canceled() && self.diagnostics.error_count() == 0 {
            self.diagnostics.report(Diagnostic::error(format!(
                "Compiler internal error. Process terminated with exit code {exit_code}"
            )));
        }

        self.backend.process_terminated();
        debug!(exit_code, "backend invocation finished");
        Ok(exit_code)
    }
}

/// Reads the compiler stream line by line and dispatches parsed events.
/// Runs until EOF, the terminator sentinel, or interruption; a closed
/// artifact channel only stops forwarding, never draining.
///
/// Interruption must end the reader directly: killing the compiler does not
/// reach its descendants, and an orphan holding the pipe would defer EOF for
/// its whole lifetime.
async fn stream_reader(
    output: Box<dyn AsyncRead + Send + Unpin>,
    mut parser: Box<dyn OutputParser>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    progress: Arc<dyn ProgressReporter>,
    session: Arc<CompileSession>,
    artifacts: mpsc::Sender<PathBuf>,
    interrupt: CancellationToken,
) {
    let mut lines = BufReader::new(output).lines();
    loop {
        let next = tokio::select! {
            next = lines.next_line() => next,
            _ = interrupt.cancelled() => break,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(stream_error) => {
                error!(%stream_error, "failed reading compiler output");
                break;
            }
        };
        match parser.parse_line(&line) {
            Some(CompilerEvent::Diagnostic(diagnostic)) => diagnostics.report(diagnostic),
            Some(CompilerEvent::ArtifactWritten(path)) => {
                // Receiver gone means indexing stopped; keep consuming the
                // stream so the compiler never blocks on a full pipe.
                let _ = artifacts.send(path).await;
            }
            Some(CompilerEvent::SourceProcessed) => {
                session.record_source_processed(progress.as_ref());
            }
            Some(CompilerEvent::Terminated) => break,
            None => {}
        }
    }
}

/// Consumes staged artifact paths and registers their pending records.
///
/// A malformed artifact is reported and skipped; cache corruption stops
/// indexing and is surfaced to the pipeline after join.
async fn artifact_indexer(
    mut artifacts: mpsc::Receiver<PathBuf>,
    cache: Arc<dyn DependencyCache>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    progress: Arc<dyn ProgressReporter>,
    session: Arc<CompileSession>,
) -> std::result::Result<(), CacheError> {
    while let Some(path) = artifacts.recv().await {
        match index_artifact(&path, cache.as_ref(), session.as_ref()) {
            Ok(()) => {}
            Err(CacheError::Malformed(message)) => {
                diagnostics.report(Diagnostic::error(format!(
                    "Bad artifact format: {message}: {}",
                    path.display()
                )));
            }
            Err(corruption @ CacheError::Corrupted(_)) => {
                session.record_artifact_indexed(progress.as_ref());
                return Err(corruption);
            }
        }
        session.record_artifact_indexed(progress.as_ref());
    }
    Ok(())
}

fn index_artifact(
    path: &std::path::Path,
    cache: &dyn DependencyCache,
    session: &CompileSession,
) -> std::result::Result<(), CacheError> {
    let identity = cache.reparse_artifact(path)?;
    let source_name = cache.source_file_name(identity)?;
    let qualified_name = cache.resolve(identity)?;
    session.records().insert(PendingRecord {
        relative_path: source_relative_path(&qualified_name, &source_name),
        source_name,
        staged_path: path.to_path_buf(),
    });
    Ok(())
}
