use thiserror::Error;

/// Result type for scoped file operations.
pub type FileResult<T> = Result<T, FileError>;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("directory operation not allowed on file: {0}")]
    NotADirectory(String),

    #[error("file operation not allowed on directory: {0}")]
    NotAFile(String),

    #[error("{tool}: {message}")]
    ExternalTool { tool: String, message: String },
}

impl FileError {
    pub(crate) fn outside_root(path: &str) -> Self {
        FileError::InvalidPath(format!("'{}' escapes the container data directory", path))
    }

    pub(crate) fn unsupported_archive(name: &str) -> Self {
        FileError::ExternalTool {
            tool: "archive".to_string(),
            message: format!("unsupported archive format: {}", name),
        }
    }
}
