//! Project workspace — path resolution scoped to one project directory.
//!
//! Every tool path is relative to the project root. Absolute paths and `..`
//! components are rejected outright; existing paths are additionally
//! canonicalized so a symlink cannot lead outside the root.

use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use appforge_core::error::ToolError;

/// Directories never listed or searched.
pub const SKIP_DIRS: &[&str] = &["node_modules", ".git", "dist"];

/// Error returned when a tool path is not acceptable.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path must not be empty")]
    Empty,

    #[error("path '{path}' must be relative to the project root")]
    Absolute { path: String },

    #[error("path traversal detected in '{path}'")]
    Traversal { path: String },

    #[error("path '{path}' resolves outside the project")]
    OutsideRoot { path: String },
}

impl PathError {
    /// Map into the tool error taxonomy.
    pub fn into_tool_error(self, tool_name: &str) -> ToolError {
        match self {
            PathError::Empty => ToolError::InvalidArguments(self.to_string()),
            other => ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: other.to_string(),
            },
        }
    }
}

/// The root directory of one project.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path. `"."` resolves to [`Self::root`].
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let mut resolved = self.root.clone();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(PathError::Traversal { path: path.into() });
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute { path: path.into() });
                }
            }
        }

        self.ensure_inside(&resolved, path)?;
        Ok(resolved)
    }

    /// Resolve a path that must name something below the root.
    pub fn resolve_entry(&self, path: &str) -> Result<PathBuf, PathError> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(PathError::OutsideRoot { path: path.into() });
        }
        Ok(resolved)
    }

    /// The nearest existing ancestor must canonicalize below the root.
    fn ensure_inside(&self, resolved: &Path, original: &str) -> Result<(), PathError> {
        let existing = resolved.ancestors().find(|p| p.exists());
        if let Some(existing) = existing {
            let canonical = existing
                .canonicalize()
                .map_err(|_| PathError::OutsideRoot { path: original.into() })?;
            if !canonical.starts_with(&self.root) {
                return Err(PathError::OutsideRoot { path: original.into() });
            }
        }
        Ok(())
    }

    /// Display form of an absolute path inside the workspace.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            ".".into()
        } else {
            parts.join("/")
        }
    }

    /// Files below `dir` (recursive) or entries directly in `dir`, as sorted
    /// project-relative paths. Directories in a flat listing end with `/`.
    pub fn list(&self, dir: &Path, recursive: bool) -> io::Result<Vec<String>> {
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", self.relative(dir)),
            ));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut entries = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| !is_skipped(e));

        for entry in walker.filter_map(Result::ok) {
            let is_dir = entry.file_type().is_dir();
            if recursive && is_dir {
                continue;
            }
            let mut rel = self.relative(entry.path());
            if is_dir {
                rel.push('/');
            }
            entries.push(rel);
        }

        entries.sort();
        Ok(entries)
    }
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}
