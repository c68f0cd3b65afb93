//! Normalised vault-relative paths

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};

/// Relative path inside the vault, `/`-separated, never escaping the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VaultPath(String);

impl VaultPath {
    /// Strict parse used for archive entries: absolute paths, drive
    /// prefixes and `..` segments are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let reject = || ExportError::PathTraversalRejected(raw.to_string());

        if raw.is_empty() || raw.contains('\0') {
            return Err(reject());
        }
        let unified = raw.replace('\\', "/");
        if unified.starts_with('/') {
            return Err(reject());
        }

        let mut parts = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(reject()),
                s if s.contains(':') => return Err(reject()),
                s => parts.push(s),
            }
        }

        if parts.is_empty() {
            return Err(reject());
        }
        Ok(Self(parts.join("/")))
    }

    /// Builds a path from filesystem components relative to a vault root
    pub fn from_relative(relative: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| {
                        ExportError::PathTraversalRejected(relative.display().to_string())
                    })?;
                    parts.push(name.to_string());
                }
                std::path::Component::CurDir => continue,
                _ => {
                    return Err(ExportError::PathTraversalRejected(
                        relative.display().to_string(),
                    ))
                }
            }
        }
        Self::parse(&parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn file_name(&self) -> &str {
        self.components().last().unwrap_or(&self.0)
    }

    /// Joins onto `root` component by component
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in self.components() {
            path.push(component);
        }
        path
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
