//! Stable error codes surfaced in logs and, where appropriate, over HTTP.

use std::path::PathBuf;

/// Every fallible operation in the core returns this error type so callers
/// (the HTTP layer, the event loop, `reindex_all`'s per-file loop) can match
/// on `.code()` rather than parsing message text.
#[derive(thiserror::Error, Debug)]
pub enum PommelError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("embedding model dimensions unknown")]
    UnknownModelDimensions,

    #[error("project root is not a directory: {0}")]
    ProjectRootNotDirectory(PathBuf),

    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("repository I/O error: {0}")]
    RepositoryIo(String),

    #[error("file locked: {0}")]
    FileLocked(PathBuf),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("rerank timed out")]
    RerankTimeout,

    #[error("rerank failed: {0}")]
    RerankFailure(String),

    #[error("not initialized")]
    NotInitialized,

    #[error("operation cancelled")]
    Cancelled,
}

impl PommelError {
    /// Stable string code, suitable for JSON error bodies and structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
            Self::UnknownModelDimensions => "UNKNOWN_MODEL_DIMENSIONS",
            Self::ProjectRootNotDirectory(_) => "PROJECT_ROOT_NOT_DIRECTORY",
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::RepositoryIo(_) => "REPOSITORY_IO",
            Self::FileLocked(_) => "FILE_LOCKED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::EmbeddingFailure(_) => "EMBEDDING_FAILURE",
            Self::RerankTimeout => "RERANK_TIMEOUT",
            Self::RerankFailure(_) => "RERANK_FAILURE",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether a caller may reasonably retry this operation unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FileLocked(_) | Self::EmbeddingFailure(_) | Self::RepositoryIo(_))
    }
}

pub type Result<T> = std::result::Result<T, PommelError>;
