use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Compiler process not started: {0}")]
    ProcessNotStarted(#[source] std::io::Error),

    #[error("Invalid compiler invocation: {0}")]
    InvalidInvocation(String),

    #[error("Dependency cache corrupted: {0}")]
    CacheCorrupted(String),

    #[error("Pipeline worker panicked: {0}")]
    WorkerPanicked(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CompileError {
    pub fn invalid_invocation<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidInvocation(e.to_string())
    }

    pub fn cache_corrupted<E: std::fmt::Display>(e: E) -> Self {
        Self::CacheCorrupted(e.to_string())
    }

    /// Cache corruption schedules a full rebuild for the next invocation;
    /// the driver needs to tell it apart from ordinary failures.
    pub fn is_cache_corruption(&self) -> bool {
        matches!(self, Self::CacheCorrupted(_))
    }
}
