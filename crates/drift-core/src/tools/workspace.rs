//! Sandboxed per-agent filesystem
//!
//! Every operation resolves a relative path under the workspace root; any
//! resolved path escaping the root (absolute input, `..`, symlinks) is
//! rejected with `PathEscape`. Writes create missing parents and go through
//! a temp file plus rename.

use std::fs;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::RuntimeError;

/// A file visible inside a workspace listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

/// Filesystem root owned exclusively by one agent.
#[derive(Debug)]
pub struct WorkspaceFS {
    root: PathBuf,
}

impl WorkspaceFS {
    /// Create the root directory if needed and pin its canonical location.
    pub fn create(root: impl AsRef<Path>) -> std::io::Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path under the root.
    ///
    /// Normalizes `.`/`..` lexically, then canonicalizes the deepest existing
    /// ancestor to catch symlink escapes.
    fn resolve(&self, rel: &str) -> Result<PathBuf, RuntimeError> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(RuntimeError::PathEscape(rel_path.to_path_buf()));
        }

        let mut resolved = self.root.clone();
        for component in rel_path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() || !resolved.starts_with(&self.root) {
                        return Err(RuntimeError::PathEscape(rel_path.to_path_buf()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(RuntimeError::PathEscape(rel_path.to_path_buf()));
                }
            }
        }
        if !resolved.starts_with(&self.root) {
            return Err(RuntimeError::PathEscape(rel_path.to_path_buf()));
        }

        // Symlinks can only redirect through an existing ancestor.
        let mut existing = resolved.clone();
        while !existing.exists() {
            if !existing.pop() {
                return Err(RuntimeError::PathEscape(rel_path.to_path_buf()));
            }
        }
        let canonical = existing.canonicalize()?;
        if !canonical.starts_with(&self.root) {
            return Err(RuntimeError::PathEscape(rel_path.to_path_buf()));
        }

        Ok(resolved)
    }

    pub fn exists(&self, rel: &str) -> Result<bool, RuntimeError> {
        Ok(self.resolve(rel)?.exists())
    }

    pub fn read(&self, rel: &str) -> Result<String, RuntimeError> {
        let path = self.resolve(rel)?;
        Ok(fs::read_to_string(path)?)
    }

    /// Atomic write: temp file in the target directory, then rename.
    pub fn write(&self, rel: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let path = self.resolve(rel)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)?;

        let tmp = parent.join(format!(
            ".{}.tmp-{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string()),
            uuid::Uuid::new_v4().simple()
        ));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Append via read-modify-write so the rename stays atomic.
    pub fn append(&self, rel: &str, contents: &str) -> Result<(), RuntimeError> {
        let existing = match self.read(rel) {
            Ok(text) => text,
            Err(RuntimeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        self.write(rel, format!("{existing}{contents}").as_bytes())
    }

    pub fn delete(&self, rel: &str) -> Result<(), RuntimeError> {
        let path = self.resolve(rel)?;
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// List files under a relative directory.
    pub fn list(&self, rel: &str, recursive: bool) -> Result<Vec<FileEntry>, RuntimeError> {
        let base = self.resolve(rel)?;
        if !base.exists() {
            return Err(RuntimeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("directory not found: {rel}"),
            )));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut entries = Vec::new();
        for entry in WalkDir::new(&base)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                let rel_path = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                entries.push(FileEntry {
                    path: rel_path,
                    size: entry.metadata().map(|m| m.len()).unwrap_or(0),
                });
            }
        }
        Ok(entries)
    }

    /// All files under the root with their contents, for backup archives.
    pub fn walk_files(&self) -> Result<Vec<(String, Vec<u8>)>, RuntimeError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                files.push((rel, fs::read(entry.path())?));
            }
        }
        Ok(files)
    }

    /// Remove everything under the root, keeping the root itself.
    pub fn clear(&self) -> Result<(), RuntimeError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (WorkspaceFS, TempDir) {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceFS::create(dir.path().join("ws")).unwrap();
        (ws, dir)
    }

    #[test]
    fn write_then_read_roundtrip() {
        let (ws, _dir) = workspace();
        ws.write("notes/plan.md", b"step one").unwrap();
        assert_eq!(ws.read("notes/plan.md").unwrap(), "step one");
        assert!(ws.exists("notes/plan.md").unwrap());
    }

    #[test]
    fn parent_traversal_rejected() {
        let (ws, _dir) = workspace();
        assert!(matches!(
            ws.read("../outside.txt"),
            Err(RuntimeError::PathEscape(_))
        ));
        assert!(matches!(
            ws.write("a/../../escape.txt", b"x"),
            Err(RuntimeError::PathEscape(_))
        ));
    }

    #[test]
    fn absolute_paths_rejected() {
        let (ws, _dir) = workspace();
        assert!(matches!(
            ws.write("/etc/passwd", b"x"),
            Err(RuntimeError::PathEscape(_))
        ));
    }

    #[test]
    fn internal_dotdot_stays_inside() {
        let (ws, _dir) = workspace();
        ws.write("a/b.txt", b"inner").unwrap();
        assert_eq!(ws.read("a/../a/b.txt").unwrap(), "inner");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_rejected() {
        let (ws, dir) = workspace();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).unwrap();

        assert!(matches!(
            ws.read("link/secret.txt"),
            Err(RuntimeError::PathEscape(_))
        ));
    }

    #[test]
    fn append_creates_and_extends() {
        let (ws, _dir) = workspace();
        ws.append("log.txt", "one\n").unwrap();
        ws.append("log.txt", "two\n").unwrap();
        assert_eq!(ws.read("log.txt").unwrap(), "one\ntwo\n");
    }

    #[test]
    fn list_recursive_and_flat() {
        let (ws, _dir) = workspace();
        ws.write("top.txt", b"1").unwrap();
        ws.write("sub/inner.txt", b"22").unwrap();

        let flat = ws.list(".", false).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].path, "top.txt");

        let all = ws.list(".", true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn delete_file_and_missing_read() {
        let (ws, _dir) = workspace();
        ws.write("gone.txt", b"bye").unwrap();
        ws.delete("gone.txt").unwrap();
        assert!(!ws.exists("gone.txt").unwrap());
        assert!(ws.read("gone.txt").is_err());
    }

    #[test]
    fn clear_empties_root() {
        let (ws, _dir) = workspace();
        ws.write("a.txt", b"1").unwrap();
        ws.write("d/b.txt", b"2").unwrap();
        ws.clear().unwrap();
        assert!(ws.list(".", true).unwrap().is_empty());
        assert!(ws.root().exists());
    }

    #[test]
    fn walk_files_returns_contents() {
        let (ws, _dir) = workspace();
        ws.write("a.txt", b"alpha").unwrap();
        ws.write("d/b.txt", b"beta").unwrap();
        let files = ws.walk_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|(p, c)| p == "a.txt" && c == b"alpha"));
    }
}
