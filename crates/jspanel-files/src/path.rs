//! Path containment for container data directories.
//!
//! Every relative path coming from a request is joined onto the resolved data
//! directory component by component. The result must stay lexically inside the
//! root; for paths that already exist the canonical form is checked as well so a
//! symlink inside the tree cannot point the operation elsewhere.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::{FileError, FileResult};

/// Join `relative` onto `root` without leaving it.
///
/// A leading `/` is stripped (the root is always the anchor), `.` is skipped and
/// `..` pops the previously pushed component. Popping past the root is rejected.
pub fn resolve_path(root: &Path, relative: &str) -> FileResult<PathBuf> {
    if relative.contains('\0') {
        warn!("Path contains null byte: {:?}", relative);
        return Err(FileError::InvalidPath("path contains a null byte".to_string()));
    }

    let trimmed = relative.trim_start_matches('/');
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(name) => parts.push(name),
            Component::CurDir => continue,
            Component::ParentDir => {
                if parts.pop().is_none() {
                    warn!("Path traversal attempt detected: {:?}", relative);
                    return Err(FileError::outside_root(relative));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in relative path: {:?}", relative);
                return Err(FileError::outside_root(relative));
            }
        }
    }

    let mut result = root.to_path_buf();
    for part in parts {
        result.push(part);
    }

    if !result.starts_with(root) {
        return Err(FileError::outside_root(relative));
    }

    Ok(result)
}

/// Resolve a path and verify it against the filesystem.
///
/// For an existing path the canonical location must remain under the canonical
/// root. For a path that does not exist yet, the nearest existing ancestor is
/// checked instead. The returned path is the lexical one so callers can still
/// compute root-relative names.
pub fn resolve_and_verify_path(root: &Path, relative: &str) -> FileResult<PathBuf> {
    let built = resolve_path(root, relative)?;
    let canonical_root = root.canonicalize()?;

    let mut probe = built.as_path();
    loop {
        if probe.exists() {
            let canonical = probe.canonicalize()?;
            if !canonical.starts_with(&canonical_root) {
                warn!(
                    "Symlink escape attempt: {:?} resolved to {:?} outside {:?}",
                    built, canonical, canonical_root
                );
                return Err(FileError::outside_root(relative));
            }
            break;
        }
        match probe.parent() {
            Some(parent) if parent.starts_with(root) => probe = parent,
            _ => break,
        }
    }

    Ok(built)
}

/// Path of `full` relative to `root`, using `/` separators.
pub fn relative_path(root: &Path, full: &Path) -> String {
    full.strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

/// Reduce an uploaded or user-chosen file name to a single safe component.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    let sanitized = sanitized.trim_matches(|c| c == '.' || c == ' ');
    if sanitized.is_empty() {
        return None;
    }

    if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        return Some(sanitized[..end].to_string());
    }

    Some(sanitized.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root() -> PathBuf {
        PathBuf::from("/tmp/panelroot")
    }

    #[test]
    fn test_resolve_path_nested() {
        let result = resolve_path(&root(), "app/src/index.js").unwrap();
        assert_eq!(result, root().join("app/src/index.js"));
    }

    #[test]
    fn test_resolve_path_root_aliases() {
        for alias in ["", ".", "/", "./", "//"] {
            assert_eq!(resolve_path(&root(), alias).unwrap(), root(), "{alias:?}");
        }
    }

    #[test]
    fn test_resolve_path_parent_within_root() {
        let result = resolve_path(&root(), "a/b/../c.txt").unwrap();
        assert_eq!(result, root().join("a/c.txt"));
    }

    #[test]
    fn test_resolve_path_rejects_escape() {
        for case in ["..", "../etc/passwd", "a/../../b", "./../x", "a/b/../../../c"] {
            assert!(
                matches!(resolve_path(&root(), case), Err(FileError::InvalidPath(_))),
                "{case} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_path_leading_slash_is_not_absolute() {
        let result = resolve_path(&root(), "/etc/passwd").unwrap();
        assert_eq!(result, root().join("etc/passwd"));
    }

    #[test]
    fn test_resolve_path_rejects_null_bytes() {
        assert!(matches!(
            resolve_path(&root(), "file\0.txt"),
            Err(FileError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_resolve_and_verify_allows_new_nested_paths() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();

        let result = resolve_and_verify_path(temp.path(), "sub/new/deeper/file.txt").unwrap();
        assert_eq!(result, temp.path().join("sub/new/deeper/file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_and_verify_detects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        symlink(outside.path(), temp.path().join("escape")).unwrap();

        let result = resolve_and_verify_path(temp.path(), "escape/secret.txt");
        assert!(matches!(result, Err(FileError::InvalidPath(_))));

        let result = resolve_and_verify_path(temp.path(), "escape/not-yet.txt");
        assert!(matches!(result, Err(FileError::InvalidPath(_))));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("bundle.zip"), Some("bundle.zip".to_string()));
        assert_eq!(sanitize_filename("foo/bar.txt"), Some("foo_bar.txt".to_string()));
        assert_eq!(sanitize_filename("..."), None);
        assert_eq!(sanitize_filename(""), None);
        let sanitized = sanitize_filename("../etc/passwd").unwrap();
        assert!(!sanitized.contains('/'));
    }
}
