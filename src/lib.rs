// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Ground truth extraction through the Language Server Protocol.
//!
//! Drives a language server (rust-analyzer by default) to answer structural
//! questions about a repository: who calls a function, who implements a
//! trait, where a symbol is defined. Answers are qualified names such as
//! `hir_def::resolver::resolve_path`, suitable as the expected results of
//! code search evaluation queries.
//!
//! The entry point is [`run::GroundTruthRun`].

/// Configuration handling for the server, timeouts and limits.
pub mod config;
/// Error types for the protocol client.
pub mod error;
/// Tracing subscriber setup.
pub mod logging;
/// LSP client implementation.
pub mod lsp;
/// Query descriptors and their executors.
pub mod query;
/// Location and qualified-name resolution.
pub mod resolve;
/// Evaluation run orchestration.
pub mod run;
/// Normalized document symbols and their cache.
pub mod symbols;

pub use error::LspError;
pub use query::{QueryDescriptor, QueryExecutor};
pub use resolve::QualifiedName;
pub use run::GroundTruthRun;
