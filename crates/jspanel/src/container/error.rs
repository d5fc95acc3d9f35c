//! Errors from the docker/podman CLI client.

use thiserror::Error;

pub type ContainerResult<T> = Result<T, ContainerError>;

#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime binary could not be run or exited non-zero. `message` is
    /// its trimmed stderr.
    #[error("{command}: {message}")]
    CommandFailed { command: String, message: String },

    /// `ps` or `inspect` printed something we could not decode.
    #[error("unreadable runtime output: {0}")]
    Parse(String),

    /// Rejected before the runtime was invoked.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
