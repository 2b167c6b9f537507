// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-run document symbol cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

use super::{SymbolNode, normalize};
use crate::error::LspError;
use crate::lsp::LspClient;
use crate::resolve::Workspace;

/// Memoized symbol trees keyed by repository-relative path.
///
/// Entries are only ever added; [`SymbolCache::reset`] clears everything at
/// the start of a run. Failed lookups are not remembered.
#[derive(Debug, Default)]
pub struct SymbolCache {
    entries: HashMap<PathBuf, Arc<Vec<SymbolNode>>>,
    misses: usize,
}

impl SymbolCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the symbol tree for `rel_path`, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the document symbol request fails.
    pub async fn get(
        &mut self,
        client: &LspClient,
        workspace: &Workspace,
        rel_path: &Path,
    ) -> Result<Arc<Vec<SymbolNode>>, LspError> {
        if let Some(symbols) = self.entries.get(rel_path) {
            return Ok(symbols.clone());
        }

        let uri = workspace.uri_for(rel_path)?;
        let symbols = client
            .document_symbols(&uri)
            .await?
            .map(normalize)
            .unwrap_or_default();
        trace!(
            "Cached {} top-level symbols for {}",
            symbols.len(),
            rel_path.display()
        );

        self.misses += 1;
        let symbols = Arc::new(symbols);
        self.entries.insert(rel_path.to_path_buf(), symbols.clone());
        Ok(symbols)
    }

    /// Drops every entry.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.misses = 0;
    }

    /// Number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of document symbol requests issued since the last reset.
    #[must_use]
    pub const fn fetches(&self) -> usize {
        self.misses
    }
}
