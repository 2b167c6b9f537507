// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use anyhow::{Context, Result};
use lsp_types::Uri;
use std::path::{Path, PathBuf};

use super::ModuleLayout;
use crate::error::LspError;

/// The repository being queried.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    layout: ModuleLayout,
}

impl Workspace {
    /// Creates a workspace rooted at `root`.
    ///
    /// The root is canonicalized so it matches the paths the server reports.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist.
    pub fn new(root: &Path, layout: ModuleLayout) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Invalid workspace root: {}", root.display()))?;
        Ok(Self { root, layout })
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Module layout used for naming.
    #[must_use]
    pub const fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    /// Joins a repository-relative path onto the root.
    ///
    /// Absolute paths are returned unchanged.
    #[must_use]
    pub fn absolute(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    /// URI of a repository-relative (or absolute) path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no `file://` form.
    pub fn uri_for(&self, path: &Path) -> Result<Uri, LspError> {
        path_to_uri(&self.absolute(path))
    }

    /// Path of a file URI, relative to the root when it lies inside it.
    ///
    /// Files outside the root keep their absolute path.
    #[must_use]
    pub fn path_for(&self, uri: &Uri) -> Option<PathBuf> {
        let path = uri_to_path(uri)?;
        Some(
            path.strip_prefix(&self.root)
                .map_or_else(|_| path.clone(), Path::to_path_buf),
        )
    }
}

/// Converts an absolute path to a `file://` URI.
///
/// # Errors
///
/// Returns an error if the path is relative or the URI does not parse.
pub fn path_to_uri(path: &Path) -> Result<Uri, LspError> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| LspError::InvalidUri(path.display().to_string()))?;
    url.as_str()
        .parse()
        .map_err(|_| LspError::InvalidUri(url.to_string()))
}

/// Converts a `file://` URI back to a path. `None` for other schemes.
#[must_use]
pub fn uri_to_path(uri: &Uri) -> Option<PathBuf> {
    url::Url::parse(uri.as_str()).ok()?.to_file_path().ok()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_round_trip() {
        let path = Path::new("/repo/crates/hir def/src/lib.rs");
        let uri = path_to_uri(path).unwrap();
        assert!(uri.as_str().starts_with("file:///repo/crates/hir%20def/"));
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn test_relative_path_has_no_uri() {
        assert!(matches!(
            path_to_uri(Path::new("crates/hir/src/lib.rs")),
            Err(LspError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_non_file_uri_has_no_path() {
        let uri: Uri = "untitled:Untitled-1".parse().unwrap();
        assert!(uri_to_path(&uri).is_none());
    }

    #[test]
    fn test_path_for_strips_root() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path(), ModuleLayout::default()).unwrap();

        let inside = workspace
            .uri_for(Path::new("crates/core/src/cli.rs"))
            .unwrap();
        assert_eq!(
            workspace.path_for(&inside).unwrap(),
            PathBuf::from("crates/core/src/cli.rs")
        );

        let outside = path_to_uri(Path::new("/elsewhere/lib.rs")).unwrap();
        assert_eq!(
            workspace.path_for(&outside).unwrap(),
            PathBuf::from("/elsewhere/lib.rs")
        );
    }
}
