//! Error taxonomy for lifecycle, resolver, file and log operations.

use std::path::PathBuf;

use jspanel_files::FileError;
use thiserror::Error;

use crate::container::ContainerError;

pub type PanelResult<T> = Result<T, PanelError>;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A runtime call failed. The runtime's message is passed through unchanged.
    #[error("{op} {identity}: {source}")]
    Runtime {
        op: &'static str,
        identity: String,
        #[source]
        source: ContainerError,
    },

    /// The old runtime object was removed but the replacement could not be
    /// created or started. The data directory is untouched.
    #[error(
        "recreating {identity} failed after the old container was removed (data directory {} is intact): {message}",
        .data_dir.display()
    )]
    RecreateFailed {
        identity: String,
        data_dir: PathBuf,
        message: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool}: {message}")]
    ExternalTool { tool: String, message: String },
}

impl PanelError {
    /// Wrap a runtime failure for `op` on `identity`.
    ///
    /// Input validation failures are reported as `InvalidInput`.
    pub fn runtime(op: &'static str, identity: &str, source: ContainerError) -> Self {
        match source {
            ContainerError::InvalidInput(msg) => PanelError::InvalidInput(msg),
            source => PanelError::Runtime {
                op,
                identity: identity.to_string(),
                source,
            },
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PanelError::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<FileError> for PanelError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound(path) => PanelError::NotFound(path),
            FileError::InvalidPath(msg) => PanelError::InvalidPath(msg),
            FileError::Conflict(path) => PanelError::Conflict(path),
            FileError::Io(source) => PanelError::io("file operation failed", source),
            FileError::ExternalTool { tool, message } => PanelError::ExternalTool { tool, message },
            err @ (FileError::FileTooLarge { .. }
            | FileError::NotADirectory(_)
            | FileError::NotAFile(_)) => PanelError::InvalidInput(err.to_string()),
        }
    }
}
