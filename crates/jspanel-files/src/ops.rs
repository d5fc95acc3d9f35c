//! File tree operations on a single data directory.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{FileError, FileResult};
use crate::path::{relative_path, resolve_and_verify_path, sanitize_filename};

/// Default upload limit (100 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// One directory entry as returned by [`ScopedRoot::list`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the data directory.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

/// A file opened for streaming download.
#[derive(Debug)]
pub struct OpenedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub file: fs::File,
}

/// File operations confined to one root directory.
#[derive(Debug, Clone)]
pub struct ScopedRoot {
    root: PathBuf,
    max_upload_size: u64,
}

impl ScopedRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }

    pub fn with_max_upload_size(mut self, limit: u64) -> Self {
        self.max_upload_size = limit;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a request path, enforcing containment.
    pub fn resolve(&self, relative: &str) -> FileResult<PathBuf> {
        resolve_and_verify_path(&self.root, relative)
    }

    pub(crate) fn relative(&self, full: &Path) -> String {
        relative_path(&self.root, full)
    }

    /// List a directory (non-recursive).
    pub async fn list(&self, relative: &str) -> FileResult<Vec<FileEntry>> {
        let dir = self.resolve(relative)?;
        let metadata = match fs::metadata(&dir).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::NotFound(relative.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_dir() {
            return Err(FileError::NotADirectory(relative.to_string()));
        }

        let mut entries = Vec::new();
        let mut reader = fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            // lstat so symlinks are reported as themselves
            let meta = match fs::symlink_metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    debug!("Skipping unreadable entry {}: {}", path.display(), e);
                    continue;
                }
            };
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: self.relative(&path),
                is_dir: meta.is_dir(),
                size: meta.len(),
                modified: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
            });
        }

        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(entries)
    }

    /// Read a whole file.
    pub async fn read(&self, relative: &str) -> FileResult<Vec<u8>> {
        let path = self.existing_file(relative).await?;
        Ok(fs::read(&path).await?)
    }

    /// Open a file for streaming.
    pub async fn open(&self, relative: &str) -> FileResult<OpenedFile> {
        let path = self.existing_file(relative).await?;
        let size = fs::metadata(&path).await?.len();
        let file = fs::File::open(&path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());
        Ok(OpenedFile {
            path,
            file_name,
            size,
            file,
        })
    }

    /// Write (create or truncate) a file, creating parent directories.
    pub async fn write(&self, relative: &str, content: &[u8]) -> FileResult<()> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(FileError::InvalidPath("cannot write to the data directory itself".to_string()));
        }
        if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(FileError::NotAFile(relative.to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        debug!("Writing {} bytes to {}", content.len(), path.display());
        fs::write(&path, content).await?;
        Ok(())
    }

    /// Store uploaded bytes.
    ///
    /// When `relative` names an existing directory (or ends in `/`) the sanitized
    /// `filename` is placed inside it; otherwise `relative` is the target file.
    /// Returns the root-relative path written.
    pub async fn upload(&self, relative: &str, filename: &str, data: &[u8]) -> FileResult<String> {
        if data.len() as u64 > self.max_upload_size {
            return Err(FileError::FileTooLarge {
                size: data.len() as u64,
                limit: self.max_upload_size,
            });
        }

        let dest = self.resolve(relative)?;
        let is_dir_target = relative.is_empty()
            || relative.ends_with('/')
            || fs::metadata(&dest).await.map(|m| m.is_dir()).unwrap_or(false);

        let final_path = if is_dir_target {
            let name = sanitize_filename(filename).ok_or_else(|| {
                warn!("Rejected invalid filename: {:?}", filename);
                FileError::InvalidPath(format!("invalid filename: {}", filename))
            })?;
            fs::create_dir_all(&dest).await?;
            let joined = format!("{}/{}", self.relative(&dest), name);
            self.resolve(&joined)?
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            dest
        };

        info!("Uploading file: {} ({} bytes)", final_path.display(), data.len());
        let mut file = fs::File::create(&final_path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(self.relative(&final_path))
    }

    /// Delete a file or directory tree. The data directory itself is never a valid target.
    pub async fn delete(&self, relative: &str) -> FileResult<()> {
        let path = self.resolve(relative)?;
        if path == self.root {
            warn!("Attempted to delete data directory root via {:?}", relative);
            return Err(FileError::InvalidPath(
                "refusing to delete the data directory root".to_string(),
            ));
        }

        let meta = match fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::NotFound(relative.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        info!("Deleting: {}", path.display());
        if meta.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Create an empty file. Fails if something already exists at the path.
    pub async fn create_file(&self, relative: &str) -> FileResult<()> {
        let path = self.resolve(relative)?;
        if path == self.root || fs::symlink_metadata(&path).await.is_ok() {
            return Err(FileError::Conflict(relative.to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => FileError::Conflict(relative.to_string()),
                _ => FileError::Io(e),
            })?;
        Ok(())
    }

    /// Create a directory (and parents). Existing directories are fine.
    pub async fn create_folder(&self, relative: &str) -> FileResult<()> {
        let path = self.resolve(relative)?;
        if let Ok(meta) = fs::metadata(&path).await {
            if meta.is_dir() {
                return Ok(());
            }
            return Err(FileError::Conflict(relative.to_string()));
        }
        info!("Creating directory: {}", path.display());
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    async fn existing_file(&self, relative: &str) -> FileResult<PathBuf> {
        let path = self.resolve(relative)?;
        match fs::metadata(&path).await {
            Ok(m) if m.is_dir() => Err(FileError::NotAFile(relative.to_string())),
            Ok(_) => Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileError::NotFound(relative.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
