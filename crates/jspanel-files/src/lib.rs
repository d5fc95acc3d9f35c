//! Scoped file access for container data directories.
//!
//! Every operation is confined to a single root (a container's data directory).
//! Archive handling shells out to the usual system tools through [`ToolRunner`].

pub mod archive;
pub mod error;
pub mod ops;
pub mod path;

pub use archive::{ArchiveKind, ProcessToolRunner, ToolOutput, ToolRunner};
pub use error::{FileError, FileResult};
pub use ops::{DEFAULT_MAX_UPLOAD_SIZE, FileEntry, OpenedFile, ScopedRoot};
pub use path::{resolve_and_verify_path, resolve_path, sanitize_filename};
