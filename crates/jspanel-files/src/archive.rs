//! Archive extraction and compression through external tools.
//!
//! The tools (`zip`, `unzip`, `tar`, `gunzip`, `unrar`) are invoked through the
//! [`ToolRunner`] capability with explicit argument vectors. Containment of every
//! path handed to a tool is checked before the tool runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{FileError, FileResult};
use crate::ops::ScopedRoot;
use crate::path::sanitize_filename;

/// Captured result of an external tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs an external program synchronously (from the caller's point of view).
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run_tool(&self, cmd: &str, args: &[String], cwd: &Path) -> FileResult<ToolOutput>;
}

/// [`ToolRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessToolRunner;

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run_tool(&self, cmd: &str, args: &[String], cwd: &Path) -> FileResult<ToolOutput> {
        debug!(tool = cmd, ?args, cwd = %cwd.display(), "Running archive tool");
        let output = Command::new(cmd)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| FileError::ExternalTool {
                tool: cmd.to_string(),
                message: e.to_string(),
            })?;

        Ok(ToolOutput {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}

/// Archive format, sniffed from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    Gz,
    Rar,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if lower.ends_with(".gz") {
            Some(ArchiveKind::Gz)
        } else if lower.ends_with(".rar") {
            Some(ArchiveKind::Rar)
        } else {
            None
        }
    }

    /// Tool and arguments that extract `archive` into `dest`.
    ///
    /// `.gz` decompresses to stdout; the caller writes the output file.
    fn extract_command(self, archive: &Path, dest: &Path) -> (&'static str, Vec<String>) {
        let archive = archive.display().to_string();
        let dest = dest.display().to_string();
        match self {
            ArchiveKind::Zip => ("unzip", vec!["-o".into(), archive, "-d".into(), dest]),
            ArchiveKind::Tar => ("tar", vec!["-xf".into(), archive, "-C".into(), dest]),
            ArchiveKind::TarGz => ("tar", vec!["-xzf".into(), archive, "-C".into(), dest]),
            ArchiveKind::Gz => ("gunzip", vec!["-c".into(), archive]),
            ArchiveKind::Rar => ("unrar", vec!["x".into(), "-o+".into(), archive, format!("{}/", dest)]),
        }
    }

    /// Tool and arguments that pack `items` (relative to the cwd) into `archive_name`.
    fn compress_command(self, archive_name: &str, items: &[String]) -> Option<(&'static str, Vec<String>)> {
        let target = format!("./{}", archive_name);
        let (tool, mut args) = match self {
            ArchiveKind::Zip => ("zip", vec!["-r".to_string(), target]),
            ArchiveKind::Tar => ("tar", vec!["-cf".to_string(), target]),
            ArchiveKind::TarGz => ("tar", vec!["-czf".to_string(), target]),
            ArchiveKind::Gz | ArchiveKind::Rar => return None,
        };
        args.extend(items.iter().cloned());
        Some((tool, args))
    }
}

fn tool_failure(tool: &str, output: &ToolOutput) -> FileError {
    let message = if output.stderr.trim().is_empty() {
        format!("exited with status {:?}", output.exit_code)
    } else {
        output.stderr.trim().to_string()
    };
    FileError::ExternalTool {
        tool: tool.to_string(),
        message,
    }
}

impl ScopedRoot {
    /// Extract an archive inside the data directory.
    ///
    /// `dest` defaults to the directory containing the archive.
    pub async fn extract_archive(
        &self,
        runner: &dyn ToolRunner,
        relative: &str,
        dest: Option<&str>,
    ) -> FileResult<ToolOutput> {
        let archive = self.resolve(relative)?;
        let kind = ArchiveKind::from_name(relative)
            .ok_or_else(|| FileError::unsupported_archive(relative))?;
        match fs::metadata(&archive).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => return Err(FileError::NotAFile(relative.to_string())),
            Err(_) => return Err(FileError::NotFound(relative.to_string())),
        }

        let dest_dir = match dest {
            Some(d) => self.resolve(d)?,
            None => archive
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root().to_path_buf()),
        };
        fs::create_dir_all(&dest_dir).await?;

        let (tool, args) = kind.extract_command(&archive, &dest_dir);
        info!(tool, archive = %archive.display(), dest = %dest_dir.display(), "Extracting archive");
        let output = runner.run_tool(tool, &args, &dest_dir).await?;
        if !output.success() {
            warn!(tool, stderr = %output.stderr, "Archive extraction failed");
            return Err(tool_failure(tool, &output));
        }

        if kind == ArchiveKind::Gz {
            let stem = archive
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "decompressed".to_string());
            let target = self.resolve(&format!("{}/{}", self.relative(&dest_dir), stem))?;
            fs::write(&target, &output.stdout).await?;
        }

        Ok(output)
    }

    /// Pack `items` (relative to `dir`) into `dir/archive_name`.
    ///
    /// Returns the root-relative path of the archive.
    pub async fn compress(
        &self,
        runner: &dyn ToolRunner,
        dir: &str,
        items: &[String],
        archive_name: &str,
    ) -> FileResult<String> {
        if items.is_empty() {
            return Err(FileError::InvalidPath("nothing selected to compress".to_string()));
        }
        let base = self.resolve(dir)?;
        match fs::metadata(&base).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Err(FileError::NotADirectory(dir.to_string())),
            Err(_) => return Err(FileError::NotFound(dir.to_string())),
        }

        let name = sanitize_filename(archive_name)
            .ok_or_else(|| FileError::InvalidPath(format!("invalid archive name: {}", archive_name)))?;
        let kind = ArchiveKind::from_name(&name).ok_or_else(|| FileError::unsupported_archive(&name))?;
        let base_rel = self.relative(&base);

        let mut args_items = Vec::with_capacity(items.len());
        for item in items {
            let full = self.resolve(&format!("{}/{}", base_rel, item))?;
            if full == base {
                return Err(FileError::InvalidPath(format!(
                    "'{}' selects the whole directory",
                    item
                )));
            }
            if fs::symlink_metadata(&full).await.is_err() {
                return Err(FileError::NotFound(item.clone()));
            }
            let within: PathBuf = full.strip_prefix(&base).map(Path::to_path_buf).unwrap_or(full.clone());
            args_items.push(format!("./{}", within.to_string_lossy()));
        }

        let (tool, args) = kind
            .compress_command(&name, &args_items)
            .ok_or_else(|| FileError::unsupported_archive(&name))?;
        let archive_path = self.resolve(&format!("{}/{}", base_rel, name))?;

        info!(tool, archive = %archive_path.display(), count = args_items.len(), "Compressing");
        let output = runner.run_tool(tool, &args, &base).await?;
        if !output.success() {
            warn!(tool, stderr = %output.stderr, "Archive compression failed");
            return Err(tool_failure(tool, &output));
        }

        Ok(self.relative(&archive_path))
    }
}
