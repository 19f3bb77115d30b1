use crate::chunk::CompilationChunk;
use crate::diagnostics::Diagnostic;
use crate::error::{CompileError, Result};
use crate::unit::SourceUnit;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream};
use tokio::process::{Child, Command};

/// One parsed event from the backend compiler's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CompilerEvent {
    /// A diagnostic to hand to the sink.
    Diagnostic(Diagnostic),
    /// The compiler wrote an artifact at the given path.
    ArtifactWritten(PathBuf),
    /// One source file finished processing; drives statistics only.
    SourceProcessed,
    /// Sentinel marking the end of a synthetic stream.
    Terminated,
}

/// Line-oriented parser over the compiler's diagnostic/notification stream.
/// Stateful: adapters may accumulate multi-line messages.
pub trait OutputParser: Send {
    fn parse_line(&mut self, line: &str) -> Option<CompilerEvent>;
}

/// Process-like handle for one backend-compiler invocation: either a true OS
/// process or an in-process invocation behind the same interface.
#[async_trait]
pub trait CompilerHandle: Send {
    /// The diagnostics/notification stream. Yields the stream once; the
    /// pipeline's stream reader takes ownership of it.
    fn take_output(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>>;

    /// Block until the invocation completes and return its exit code.
    async fn wait(&mut self) -> Result<i32>;

    /// Force-terminate and return the last known exit code.
    async fn kill(&mut self) -> i32;
}

/// Backend compiler adapter: builds an invocation for one chunk/target pass
/// and a parser for its output.
#[async_trait]
pub trait BackendCompiler: Send + Sync {
    /// Launch one invocation compiling `units` into `target_dir`. A launch
    /// failure fails the entire compile operation.
    async fn launch(
        &self,
        chunk: &CompilationChunk,
        units: &[SourceUnit],
        target_dir: &Path,
    ) -> Result<Box<dyn CompilerHandle>>;

    fn create_parser(&self) -> Box<dyn OutputParser>;

    /// Called after every invocation has fully terminated and joined.
    fn process_terminated(&self) {}
}

/// Handle over a real OS process with piped stdout.
#[derive(Debug)]
pub struct OsProcessHandle {
    child: Child,
    last_exit_code: i32,
}

impl OsProcessHandle {
    /// Spawn the given command with piped stdout. Maps spawn failures to
    /// `CompileError::ProcessNotStarted`.
    pub fn spawn(mut command: Command) -> Result<Self> {
        command.stdout(Stdio::piped()).stderr(Stdio::null());
        let child = command.spawn().map_err(CompileError::ProcessNotStarted)?;
        Ok(Self {
            child,
            last_exit_code: 0,
        })
    }

    /// Wrap an already spawned child whose output stream is `stdout`.
    pub fn from_child(child: Child) -> Self {
        Self {
            child,
            last_exit_code: 0,
        }
    }
}

#[async_trait]
impl CompilerHandle for OsProcessHandle {
    fn take_output(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
    }

    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        self.last_exit_code = status.code().unwrap_or(-1);
        Ok(self.last_exit_code)
    }

    async fn kill(&mut self) -> i32 {
        let _ = self.child.start_kill();
        if let Ok(status) = self.child.wait().await {
            self.last_exit_code = status.code().unwrap_or(-1);
        }
        self.last_exit_code
    }
}

/// Compilation routine run by an in-process invocation: returns the exit code
/// and the diagnostics lines to feed through the synthetic stream.
pub type InProcessCompileFn = Box<dyn FnOnce() -> (i32, Vec<String>) + Send>;

/// Fabricated process-like handle for in-process compilation.
///
/// `wait` performs the compilation synchronously (on the blocking pool),
/// streams the produced lines, and terminates the synthetic stream with the
/// sentinel line so the parser observes the same shutdown as a real process.
pub struct InProcessHandle {
    compile: Option<InProcessCompileFn>,
    writer: Option<DuplexStream>,
    output: Option<DuplexStream>,
    terminator: String,
    last_exit_code: i32,
}

impl InProcessHandle {
    pub fn new(terminator: impl Into<String>, compile: InProcessCompileFn) -> Self {
        let (writer, output) = tokio::io::duplex(64 * 1024);
        Self {
            compile: Some(compile),
            writer: Some(writer),
            output: Some(output),
            terminator: terminator.into(),
            last_exit_code: 0,
        }
    }
}

#[async_trait]
impl CompilerHandle for InProcessHandle {
    fn take_output(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.output
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>)
    }

    async fn wait(&mut self) -> Result<i32> {
        let Some(compile) = self.compile.take() else {
            return Ok(self.last_exit_code);
        };
        let (code, lines) = tokio::task::spawn_blocking(compile).await?;
        if let Some(mut writer) = self.writer.take() {
            for line in &lines {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.write_all(self.terminator.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            let _ = writer.shutdown().await;
        }
        self.last_exit_code = code;
        Ok(code)
    }

    async fn kill(&mut self) -> i32 {
        // Nothing to terminate: either compilation has not started, or wait
        // already ran it to completion. Closing the writer ends the stream.
        self.compile = None;
        self.writer = None;
        self.last_exit_code
    }
}
