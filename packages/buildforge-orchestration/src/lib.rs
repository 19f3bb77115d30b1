/*
 * Buildforge Orchestration - Incremental Compile Orchestrator
 *
 * Drives an external backend compiler over dependency-ordered module chunks.
 *
 * Architecture:
 * - Chunk Scheduling (external module topology)
 * - Backend Pipeline (process or in-process, streamed output)
 * - Artifact Indexing (dependency cache registration)
 * - Output Relocation (staging to real directories)
 * - Dependency Rounds (one extra round over affected units)
 */

// Public modules
pub mod backend;
pub mod chunk;
pub mod deps;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod pipeline;
pub mod project;
pub mod relocate;
pub mod session;
pub mod unit;

// Re-exports
pub use backend::{
    BackendCompiler, CompilerEvent, CompilerHandle, InProcessCompileFn, InProcessHandle,
    OsProcessHandle, OutputParser,
};
pub use chunk::{ChunkScheduler, CompilationChunk, OutputTarget, TargetKind};
pub use deps::{source_relative_path, ArtifactIdentity, CacheError, CacheResult, DependencyCache};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticsSink, Severity};
pub use driver::{CompileContext, CompileDriver, CompileOutcome, RebuildRequest};
pub use error::{CompileError, Result};
pub use pipeline::{ProcessPipeline, ARTIFACT_QUEUE_CAPACITY};
pub use project::{
    CompileScope, ModuleTopology, ProgressReporter, ProjectIndex, SilentProgress, SourceLocator,
    UnboundedScope,
};
pub use relocate::OutputRelocator;
pub use session::CompileSession;
pub use unit::{ModuleId, OutputItem, PendingRecord, RecordTable, SourceKind, SourceUnit};
