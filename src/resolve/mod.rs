// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Conversion between source locations and qualified names.
//!
//! A qualified name is `crate::module::symbol`, derived from the file path
//! (see [`ModuleLayout`]) and the identifier at the location. Misses are
//! `None`, never errors: one unresolvable location must not sink a query.

mod enclosing;
mod layout;
pub mod text;
mod workspace;

pub use enclosing::enclosing_function;
pub use layout::{ModuleLayout, ModulePath};
pub use workspace::{Workspace, path_to_uri, uri_to_path};

use lsp_types::{Location, Position, PositionEncodingKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::lsp::LspClient;
use crate::symbols::{SymbolCache, workspace_hits};

/// A `::`-separated symbol path such as `hir_def::resolver::resolve_path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualifiedName(String);

impl QualifiedName {
    /// Wraps a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments split on `::`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split("::")
    }

    /// Leading crate segment. `None` for single-segment names.
    #[must_use]
    pub fn crate_segment(&self) -> Option<&str> {
        self.0.split_once("::").map(|(krate, _)| krate)
    }

    /// Last segment without generic arguments or a parameter list.
    #[must_use]
    pub fn bare_symbol(&self) -> Option<&str> {
        let last = self.0.rsplit("::").next()?;
        let last = last.split('<').next().unwrap_or(last);
        let last = last.split('(').next().unwrap_or(last).trim();
        (!last.is_empty()).then_some(last)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for QualifiedName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for QualifiedName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Where a name was found by [`locate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    /// Repository-relative path, or absolute outside the workspace.
    pub path: PathBuf,
    /// Zero-indexed position of the symbol name.
    pub position: Position,
}

/// Names the symbol declared at `location`.
///
/// Reads the identifier from the file on disk and qualifies it by path.
pub async fn name_at(
    workspace: &Workspace,
    location: &Location,
    encoding: &PositionEncodingKind,
) -> Option<QualifiedName> {
    let rel_path = workspace.path_for(&location.uri)?;
    let source = match tokio::fs::read_to_string(workspace.absolute(&rel_path)).await {
        Ok(source) => source,
        Err(e) => {
            debug!("Cannot read {}: {}", rel_path.display(), e);
            return None;
        }
    };

    let symbol = text::identifier_at(&source, location.range, encoding)?;
    Some(workspace.layout().qualify(&rel_path, &symbol))
}

/// Names the innermost function containing `location`.
///
/// Used for reference results: a reference is a call site, and the caller
/// is the function around it.
pub async fn enclosing_name(
    client: &LspClient,
    workspace: &Workspace,
    cache: &mut SymbolCache,
    location: &Location,
) -> Option<QualifiedName> {
    let rel_path = workspace.path_for(&location.uri)?;
    let symbols = match cache.get(client, workspace, &rel_path).await {
        Ok(symbols) => symbols,
        Err(e) => {
            debug!("No symbols for {}: {}", rel_path.display(), e);
            return None;
        }
    };

    let name = enclosing_function(&symbols, location.range.start.line)?;
    Some(workspace.layout().qualify(&rel_path, &name))
}

/// Finds a declaration for `name` through `workspace/symbol`.
///
/// Candidates must match the bare symbol exactly and, for multi-segment
/// names, live in the crate named by the first segment. The first
/// surviving candidate wins.
pub async fn locate(
    client: &LspClient,
    workspace: &Workspace,
    name: &QualifiedName,
) -> Option<ResolvedLocation> {
    let symbol = name.bare_symbol()?;

    let response = match client.workspace_symbols(symbol).await {
        Ok(Some(response)) => response,
        Ok(None) => return None,
        Err(e) => {
            debug!("Symbol search for '{}' failed: {}", symbol, e);
            return None;
        }
    };

    let expected_crate = name.crate_segment();
    let hit = workspace_hits(response).into_iter().find_map(|hit| {
        if hit.name != symbol {
            return None;
        }
        let path = workspace.path_for(&hit.location.uri)?;
        if let Some(krate) = expected_crate {
            if workspace.layout().crate_of(&path).as_deref() != Some(krate) {
                return None;
            }
        }
        Some((path, hit.location.range))
    });

    let Some((path, range)) = hit else {
        debug!("No declaration found for {}", name);
        return None;
    };

    // Point at the name itself when the server reported the whole item.
    let position = match tokio::fs::read_to_string(workspace.absolute(&path)).await {
        Ok(source) => text::find_identifier(&source, range, symbol, &client.encoding())
            .unwrap_or(range.start),
        Err(_) => range.start,
    };

    Some(ResolvedLocation { path, position })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_symbol_strips_suffixes() {
        assert_eq!(
            QualifiedName::from("hir::Semantics<'db, DB>").bare_symbol(),
            Some("Semantics")
        );
        assert_eq!(
            QualifiedName::from("core::cli::parse_args(argv)").bare_symbol(),
            Some("parse_args")
        );
        assert_eq!(QualifiedName::from("main").bare_symbol(), Some("main"));
        assert_eq!(QualifiedName::from("core::").bare_symbol(), None);
    }

    #[test]
    fn test_crate_segment() {
        assert_eq!(
            QualifiedName::from("hir_def::resolver::resolve_path").crate_segment(),
            Some("hir_def")
        );
        assert_eq!(QualifiedName::from("resolve_path").crate_segment(), None);
    }

    #[test]
    fn test_serializes_as_plain_string() -> Result<(), serde_json::Error> {
        let name = QualifiedName::from("core::cli::parse_args");
        assert_eq!(serde_json::to_string(&name)?, r#""core::cli::parse_args""#);
        let back: QualifiedName = serde_json::from_str(r#""a::b""#)?;
        assert_eq!(back.segments().collect::<Vec<_>>(), vec!["a", "b"]);
        Ok(())
    }
}
