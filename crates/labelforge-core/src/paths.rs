//! Path resolution for paths that cross the process boundary.
//!
//! Every path a caller hands us (dataset config locations, export targets,
//! project ids) goes through [`PathResolver`] before it touches the
//! filesystem. Resolution is lexical: `.` and `..` are folded without
//! following symlinks, so a path that does not exist yet can still be checked
//! against its root.

use crate::error::ConfigIssue;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Extensions accepted for dataset manifests.
pub const DATASET_CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Resolves user-supplied paths against a root directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    allow_outside_root: bool,
    allowed_extensions: Vec<String>,
}

impl PathResolver {
    /// Create a resolver rooted at `root`. No extension filter, no escapes.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: absolutize(root.as_ref()),
            allow_outside_root: false,
            allowed_extensions: Vec::new(),
        }
    }

    /// Resolver for dataset manifest paths (`.yaml` / `.yml`).
    #[must_use]
    pub fn for_dataset_config(root: impl AsRef<Path>) -> Self {
        Self::new(root).with_extensions(DATASET_CONFIG_EXTENSIONS)
    }

    /// Permit resolved paths outside the root.
    #[must_use]
    pub fn allow_outside_root(mut self, allow: bool) -> Self {
        self.allow_outside_root = allow;
        self
    }

    /// Restrict accepted files to these extensions (case-insensitive).
    #[must_use]
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.allowed_extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `input` to an absolute, normalized path.
    ///
    /// Relative inputs are joined onto the root. Does not check existence.
    pub fn resolve(&self, input: &str) -> Result<PathBuf, ConfigIssue> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ConfigIssue::EmptyPath);
        }

        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let resolved = normalize_lexically(&joined);

        if !self.allow_outside_root && !resolved.starts_with(&self.root) {
            return Err(ConfigIssue::OutsideRoot { path: resolved, root: self.root.clone() });
        }

        if !self.allowed_extensions.is_empty() && !self.has_allowed_extension(&resolved) {
            return Err(ConfigIssue::DisallowedExtension {
                path: resolved,
                allowed: self.allowed_extensions.clone(),
            });
        }

        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve) but also requires the path to exist.
    pub fn resolve_existing(&self, input: &str) -> Result<PathBuf, ConfigIssue> {
        let resolved = self.resolve(input)?;
        if !resolved.exists() {
            return Err(ConfigIssue::NotFound(resolved));
        }
        Ok(resolved)
    }

    fn has_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .is_some_and(|ext| self.allowed_extensions.iter().any(|a| *a == ext))
    }
}

/// Validate a single path segment such as a project id.
///
/// Rejects empty names, `.`/`..`, and anything containing a separator, so the
/// segment can be joined onto a directory without escaping it.
pub fn validate_segment(name: &str, what: &str) -> Result<(), ConfigIssue> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(ConfigIssue::Schema(vec![crate::error::FieldError::new(
            what,
            format!("'{name}' is not a valid {what}"),
        )]));
    }
    Ok(())
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    _ => false,
                };
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a path with forward slashes, the form YOLO manifests expect.
#[must_use]
pub fn to_yolo_format(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn absolutize(path: &Path) -> PathBuf {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize_lexically(&abs)
}

/// Snapshot of what the filesystem says about a path.
#[derive(Debug, Clone, Serialize)]
pub struct PathInfo {
    pub original: PathBuf,
    pub absolute: PathBuf,
    pub exists: bool,
    pub is_file: bool,
    pub is_dir: bool,
    pub readable: bool,
    pub size: Option<u64>,
    pub error: Option<String>,
}

/// Describe a path for diagnostics output.
#[must_use]
pub fn describe(path: &Path) -> PathInfo {
    let absolute = absolutize(path);
    let mut info = PathInfo {
        original: path.to_path_buf(),
        absolute: absolute.clone(),
        exists: false,
        is_file: false,
        is_dir: false,
        readable: false,
        size: None,
        error: None,
    };

    match std::fs::metadata(&absolute) {
        Ok(md) => {
            info.exists = true;
            info.is_file = md.is_file();
            info.is_dir = md.is_dir();
            info.size = Some(md.len());
            info.readable = if md.is_dir() {
                std::fs::read_dir(&absolute).is_ok()
            } else {
                std::fs::File::open(&absolute).is_ok()
            };
        }
        Err(e) => info.error = Some(e.to_string()),
    }

    info
}
