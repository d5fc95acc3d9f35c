//! File operations scoped to a container's data directory.

use std::sync::Arc;

use jspanel_files::{
    DEFAULT_MAX_UPLOAD_SIZE, FileEntry, OpenedFile, ScopedRoot, ToolOutput, ToolRunner,
};

use crate::datadir::DataDirResolver;
use crate::error::PanelResult;

/// Resolves an identity to its data directory and runs file operations there.
#[derive(Clone)]
pub struct FileOperator {
    resolver: DataDirResolver,
    tools: Arc<dyn ToolRunner>,
    max_upload_size: u64,
}

impl FileOperator {
    pub fn new(resolver: DataDirResolver, tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            resolver,
            tools,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }

    pub fn with_max_upload_size(mut self, limit: u64) -> Self {
        self.max_upload_size = limit;
        self
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// File root of `identity`.
    pub async fn scope(&self, identity: &str) -> PanelResult<ScopedRoot> {
        let resolved = self.resolver.resolve(identity).await?;
        Ok(ScopedRoot::new(resolved.path).with_max_upload_size(self.max_upload_size))
    }

    pub async fn list(&self, identity: &str, dir: &str) -> PanelResult<Vec<FileEntry>> {
        Ok(self.scope(identity).await?.list(dir).await?)
    }

    pub async fn read(&self, identity: &str, path: &str) -> PanelResult<Vec<u8>> {
        Ok(self.scope(identity).await?.read(path).await?)
    }

    pub async fn download(&self, identity: &str, path: &str) -> PanelResult<OpenedFile> {
        Ok(self.scope(identity).await?.open(path).await?)
    }

    pub async fn write(&self, identity: &str, path: &str, content: &[u8]) -> PanelResult<()> {
        Ok(self.scope(identity).await?.write(path, content).await?)
    }

    /// Store an uploaded file under `dir`. Returns its relative path.
    pub async fn upload(
        &self,
        identity: &str,
        dir: &str,
        filename: &str,
        data: &[u8],
    ) -> PanelResult<String> {
        Ok(self
            .scope(identity)
            .await?
            .upload(dir, filename, data)
            .await?)
    }

    pub async fn delete(&self, identity: &str, path: &str) -> PanelResult<()> {
        Ok(self.scope(identity).await?.delete(path).await?)
    }

    pub async fn create_file(&self, identity: &str, path: &str) -> PanelResult<()> {
        Ok(self.scope(identity).await?.create_file(path).await?)
    }

    pub async fn create_folder(&self, identity: &str, path: &str) -> PanelResult<()> {
        Ok(self.scope(identity).await?.create_folder(path).await?)
    }

    pub async fn extract_archive(
        &self,
        identity: &str,
        path: &str,
        dest: Option<&str>,
    ) -> PanelResult<ToolOutput> {
        Ok(self
            .scope(identity)
            .await?
            .extract_archive(self.tools.as_ref(), path, dest)
            .await?)
    }

    /// Pack `items` from `dir` into `dir/archive_name`. Returns the archive path.
    pub async fn compress(
        &self,
        identity: &str,
        dir: &str,
        items: &[String],
        archive_name: &str,
    ) -> PanelResult<String> {
        Ok(self
            .scope(identity)
            .await?
            .compress(self.tools.as_ref(), dir, items, archive_name)
            .await?)
    }
}
