// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use ignore::WalkBuilder;
use indexmap::IndexSet;
use lsp_types::Location;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{ChainStep, LspMethod, QueryDescriptor, ScanScope, Target};
use crate::config::QueryLimits;
use crate::error::LspError;
use crate::lsp::LspClient;
use crate::resolve::{self, QualifiedName, Workspace};
use crate::symbols::{SymbolCache, flatten, workspace_hits};

/// Runs query descriptors against one server session.
///
/// Names are collected in first-seen order without duplicates, so results
/// (and which names a fan-out cap keeps) are stable for a given server.
pub struct QueryExecutor<'a> {
    client: &'a LspClient,
    workspace: &'a Workspace,
    cache: &'a mut SymbolCache,
    limits: QueryLimits,
}

impl<'a> QueryExecutor<'a> {
    /// Creates an executor borrowing the run's session and cache.
    pub fn new(
        client: &'a LspClient,
        workspace: &'a Workspace,
        cache: &'a mut SymbolCache,
        limits: QueryLimits,
    ) -> Self {
        Self {
            client,
            workspace,
            cache,
            limits,
        }
    }

    /// Executes any descriptor.
    ///
    /// # Errors
    ///
    /// Returns the error of the query's top-level request. Failures further
    /// down (a chain hop, one file of a scan, one unresolvable location) are
    /// logged and contribute nothing.
    pub async fn execute(
        &mut self,
        query: &QueryDescriptor,
    ) -> Result<Vec<QualifiedName>, LspError> {
        match query {
            QueryDescriptor::SingleHop { method, target } => self.single_hop(*method, target).await,
            QueryDescriptor::Chain { steps } => self.chain(steps).await,
            QueryDescriptor::WorkspaceSymbol { scope } => self.workspace_symbol(scope).await,
        }
    }

    /// One protocol call at `target`, each result resolved to a name.
    ///
    /// References resolve to the function around the call site;
    /// implementations and definitions to the symbol at the location.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol call fails.
    pub async fn single_hop(
        &mut self,
        method: LspMethod,
        target: &Target,
    ) -> Result<Vec<QualifiedName>, LspError> {
        let uri = self.workspace.uri_for(&target.path)?;
        let position = target.position();

        let locations = match method {
            LspMethod::References => self.client.references(&uri, position).await?,
            LspMethod::Implementations => self.client.implementation(&uri, position).await?,
            LspMethod::Definition => self.client.definition(&uri, position).await?,
        };
        debug!(
            "{} at {} returned {} locations",
            method,
            target,
            locations.len()
        );

        let mut names = IndexSet::new();
        for location in &locations {
            match self.resolve_location(method, location).await {
                Some(name) => {
                    names.insert(name);
                }
                None => debug!(
                    "Unresolved location {}:{}",
                    location.uri.as_str(),
                    location.range.start.line + 1
                ),
            }
        }

        Ok(names.into_iter().collect())
    }

    async fn resolve_location(
        &mut self,
        method: LspMethod,
        location: &Location,
    ) -> Option<QualifiedName> {
        match method {
            LspMethod::References => {
                resolve::enclosing_name(self.client, self.workspace, self.cache, location).await
            }
            LspMethod::Implementations | LspMethod::Definition => {
                resolve::name_at(self.workspace, location, &self.client.encoding()).await
            }
        }
    }

    /// Runs hops in order, feeding each hop's names into the next.
    ///
    /// Only the first hop's target is used. Each later hop expands at most
    /// `fan_out_cap` names of the previous hop, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the first hop's protocol call fails.
    pub async fn chain(&mut self, steps: &[ChainStep]) -> Result<Vec<QualifiedName>, LspError> {
        let Some((first, rest)) = steps.split_first() else {
            warn!("Chain query has no steps");
            return Ok(Vec::new());
        };
        let Some(target) = &first.target else {
            warn!("Chain query has no starting target");
            return Ok(Vec::new());
        };

        let mut current = self.single_hop(first.method, target).await?;
        info!("Hop 1: {} results from {}", current.len(), first.method);

        for (index, step) in rest.iter().enumerate() {
            let hop = index + 2;
            if step.target.is_some() {
                debug!("Ignoring explicit target on hop {}", hop);
            }

            if current.len() > self.limits.fan_out_cap {
                debug!(
                    "Hop {}: expanding {} of {} names",
                    hop,
                    self.limits.fan_out_cap,
                    current.len()
                );
            }

            let mut next = IndexSet::new();
            for name in current.iter().take(self.limits.fan_out_cap) {
                let Some(resolved) = resolve::locate(self.client, self.workspace, name).await
                else {
                    continue;
                };
                let target = Target::from_position(resolved.path, resolved.position);
                match self.single_hop(step.method, &target).await {
                    Ok(names) => next.extend(names),
                    Err(e) => warn!("Hop {} from {} failed: {}", hop, name, e),
                }
            }

            current = next.into_iter().collect();
            info!("Hop {}: {} results from {}", hop, current.len(), step.method);
        }

        Ok(current)
    }

    /// Lists declarations in a directory or module.
    ///
    /// # Errors
    ///
    /// Returns an error if a module scan's symbol search fails. Directory
    /// scans skip failing files and never error.
    pub async fn workspace_symbol(
        &mut self,
        scope: &ScanScope,
    ) -> Result<Vec<QualifiedName>, LspError> {
        match scope {
            ScanScope::Directory(directory) => Ok(self.scan_directory(directory).await),
            ScanScope::Module(module) => self.scan_module(module).await,
        }
    }

    async fn scan_directory(&mut self, directory: &Path) -> Vec<QualifiedName> {
        let absolute = self.workspace.absolute(directory);
        let files = if absolute.is_file() {
            vec![directory.to_path_buf()]
        } else {
            self.source_files(&absolute)
        };

        let cap = self.limits.max_scan_files;
        if files.len() > cap {
            info!(
                "Scanning first {} of {} files under {}",
                cap,
                files.len(),
                directory.display()
            );
        }

        let mut names = IndexSet::new();
        for rel_path in files.iter().take(cap) {
            match self.cache.get(self.client, self.workspace, rel_path).await {
                Ok(symbols) => {
                    for node in flatten(&symbols) {
                        if node.is_declaration() && !node.name.is_empty() {
                            names.insert(self.workspace.layout().qualify(rel_path, &node.name));
                        }
                    }
                }
                Err(e) => warn!("Skipping {}: {}", rel_path.display(), e),
            }
        }

        names.into_iter().collect()
    }

    /// Source files under `dir`, relative to the root and sorted.
    fn source_files(&self, dir: &Path) -> Vec<PathBuf> {
        let layout = self.workspace.layout();
        let mut files: Vec<PathBuf> = WalkBuilder::new(dir)
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Walk error: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter(|entry| layout.is_source_file(entry.path()))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(self.workspace.root())
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();
        files.sort();
        files
    }

    async fn scan_module(&mut self, module: &str) -> Result<Vec<QualifiedName>, LspError> {
        let segments: Vec<&str> = module.split("::").filter(|s| !s.is_empty()).collect();
        let Some(search) = segments.last() else {
            return Ok(Vec::new());
        };

        let Some(response) = self.client.workspace_symbols(search).await? else {
            return Ok(Vec::new());
        };

        let layout = self.workspace.layout();
        let needle = module.to_lowercase();
        let mut names = IndexSet::new();

        for hit in workspace_hits(response) {
            let Some(path) = self.workspace.path_for(&hit.location.uri) else {
                continue;
            };
            let in_module = layout.module_path(&path).is_some_and(|m| {
                let found: Vec<&str> = m.segments().collect();
                found.starts_with(&segments)
            });
            let in_container = hit
                .container
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&needle));

            if in_module || in_container {
                names.insert(layout.qualify(&path, &hit.name));
            }
        }

        Ok(names.into_iter().collect())
    }
}
