// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Evaluation run orchestration.
//!
//! One run owns one server process and one symbol cache. Indexed state is
//! expensive to rebuild, so a run that loses its server stops instead of
//! respawning.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::{Config, QueryLimits, Timeouts};
use crate::error::LspError;
use crate::lsp::{LspClient, ServerState};
use crate::query::{QueryDescriptor, QueryExecutor};
use crate::resolve::{QualifiedName, Workspace};
use crate::symbols::SymbolCache;

/// One entry of an evaluation fixture.
///
/// Fields other than `id`, `lsp_query` and `expected` are carried through
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalQuery {
    /// Query identifier.
    pub id: String,

    /// Descriptor, kept raw so the fixture round-trips unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsp_query: Option<serde_json::Value>,

    /// Ground-truth names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<QualifiedName>>,

    /// Everything else in the entry.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// An evaluation fixture file: `{ "queries": [...], ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalFixture {
    /// Queries to label.
    #[serde(default)]
    pub queries: Vec<EvalQuery>,

    /// Top-level fields other than `queries`.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl EvalFixture {
    /// Reads a fixture from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))
    }

    /// Writes the fixture back, pretty-printed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write fixture: {}", path.display()))
    }
}

/// Outcome counts of [`GroundTruthRun::label`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Queries whose `expected` was replaced.
    pub labelled: usize,
    /// Queries that ran but found nothing. `expected` is left alone.
    pub empty: usize,
    /// Queries that failed or carried an invalid descriptor.
    pub failed: usize,
    /// Entries without an `lsp_query`.
    pub skipped: usize,
}

impl RunSummary {
    /// Queries that were attempted.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.labelled + self.empty + self.failed
    }
}

/// A ground-truth extraction session over one workspace.
pub struct GroundTruthRun {
    client: LspClient,
    workspace: Workspace,
    cache: SymbolCache,
    limits: QueryLimits,
    timeouts: Timeouts,
}

impl GroundTruthRun {
    /// Spawns and initializes the server, then waits for indexing.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be started, the handshake
    /// fails, or the server exits while indexing.
    pub async fn start(config: &Config, root: &Path) -> Result<Self> {
        let workspace = Workspace::new(root, config.layout.clone())?;
        info!(
            "Starting {} on {}",
            config.server.command,
            workspace.root().display()
        );

        let mut client = LspClient::spawn(&config.server, workspace.root(), config.timeouts)?;
        client
            .initialize(
                workspace.root(),
                config.server.initialization_options.clone(),
            )
            .await?;
        info!("LSP server started");

        info!(
            "Waiting for indexing (up to {:?})...",
            config.timeouts.index_wait()
        );
        match client.wait_until_ready(config.timeouts.index_wait()).await {
            ServerState::Dead => bail!("LSP server exited during indexing"),
            state => info!("LSP server {:?}", state),
        }

        let mut cache = SymbolCache::new();
        cache.reset();

        Ok(Self {
            client,
            workspace,
            cache,
            limits: config.limits,
            timeouts: config.timeouts,
        })
    }

    /// The session.
    #[must_use]
    pub const fn client(&self) -> &LspClient {
        &self.client
    }

    /// The workspace being queried.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The run's symbol cache.
    #[must_use]
    pub const fn cache(&self) -> &SymbolCache {
        &self.cache
    }

    /// An executor over this run's session and cache.
    pub fn executor(&mut self) -> QueryExecutor<'_> {
        QueryExecutor::new(&self.client, &self.workspace, &mut self.cache, self.limits)
    }

    /// Executes one descriptor.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::execute`].
    pub async fn execute(
        &mut self,
        query: &QueryDescriptor,
    ) -> Result<Vec<QualifiedName>, LspError> {
        self.executor().execute(query).await
    }

    /// Labels every fixture entry that carries an `lsp_query`.
    ///
    /// A failing query is logged and left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error when the server is gone (a query fails with a
    /// closed or broken connection) or has timed out
    /// `max_consecutive_timeouts` times in a row.
    pub async fn label(&mut self, queries: &mut [EvalQuery]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut consecutive_timeouts = 0;

        for query in queries.iter_mut() {
            let Some(raw) = &query.lsp_query else {
                summary.skipped += 1;
                continue;
            };

            if !self.client.is_alive() {
                bail!(
                    "LSP server is no longer running; stopped after {} queries",
                    summary.processed()
                );
            }

            let descriptor: QueryDescriptor = match serde_json::from_value(raw.clone()) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!("{}: invalid lsp_query: {}", query.id, e);
                    summary.failed += 1;
                    continue;
                }
            };

            info!("Processing {} ({})...", query.id, descriptor.kind());
            match self.execute(&descriptor).await {
                Ok(mut names) => {
                    consecutive_timeouts = 0;
                    if names.is_empty() {
                        info!("  No results found");
                        summary.empty += 1;
                    } else {
                        info!("  Found {} results", names.len());
                        names.truncate(self.limits.expected_cap);
                        query.expected = Some(names);
                        summary.labelled += 1;
                    }
                }
                Err(e) => {
                    warn!("{} failed: {}", query.id, e);
                    summary.failed += 1;
                    if e.is_disconnect() || !self.client.is_alive() {
                        bail!(
                            "LSP server is no longer running ({}); stopped after {} queries",
                            e,
                            summary.processed()
                        );
                    }
                    if e.is_timeout() {
                        consecutive_timeouts += 1;
                        if consecutive_timeouts >= self.limits.max_consecutive_timeouts {
                            bail!(
                                "{} consecutive timeouts; LSP server presumed dead",
                                consecutive_timeouts
                            );
                        }
                    } else {
                        consecutive_timeouts = 0;
                    }
                }
            }
        }

        info!(
            "Labelled {} queries ({} empty, {} failed, {} skipped)",
            summary.labelled, summary.empty, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// Stops the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed.
    pub async fn finish(self) -> Result<()> {
        info!("Stopping LSP server...");
        self.client
            .shutdown(self.timeouts.shutdown_grace())
            .await
            .context("Failed to stop LSP server")
    }
}
