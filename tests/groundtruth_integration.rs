// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end query tests against mockls.
//!
//! Each test writes a small cargo-style workspace to a temp directory,
//! starts a run with mockls as the server, and checks the names a query
//! produces.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use lsp_groundtruth::config::{Config, ServerConfig, Timeouts};
use lsp_groundtruth::resolve::{self, QualifiedName};
use lsp_groundtruth::{GroundTruthRun, QueryDescriptor};
use lsp_types::{Location, Range};
use serde_json::{Value, json};
use tempfile::TempDir;

const RESOLVER_RS: &str = "\
pub struct Resolver;

pub fn resolve_path(path: &str) -> Option<String> {
    Some(path.to_string())
}
";

const MAIN_RS: &str = "\
use crate::cli;

pub fn run() {
    cli::parse_args(&[]);
}

pub fn client_id() -> u32 {
    7
}
";

const GREET_RS: &str = "\
pub trait Greeter {
    fn greet(&self) -> String;
}

pub struct English;

impl Greeter for English {
    fn greet(&self) -> String {
        helper()
    }
}

fn helper() -> String {
    String::from(\"hello\")
}
";

/// `resolve_path` is called on line 42 (one-indexed).
fn hir_lib_rs() -> String {
    let mut text = "// filler\n".repeat(40);
    text.push_str("pub fn lower() {\n");
    text.push_str("    resolve_path(\"a::b\");\n");
    text.push_str("}\n");
    text
}

/// `parse_args` spans lines 100 to 140 and calls `tokenize` three times.
/// `tokenize` is declared on line 142.
fn cli_rs() -> String {
    let mut text = String::from("pub struct CliArgs {\n    pub verbose: bool,\n}\n");
    text.push_str(&"// filler\n".repeat(96));
    text.push_str("pub fn parse_args(argv: &[String]) {\n");
    for line in 101..=139 {
        match line {
            101 => text.push_str("    let _ = tokenize(\"first\");\n"),
            120 => text.push_str("    let _ = tokenize(\"middle\");\n"),
            139 => text.push_str("    let _ = tokenize(\"last\");\n"),
            _ => text.push_str("    // step\n"),
        }
    }
    text.push_str("}\n\n");
    text.push_str("pub fn tokenize(s: &str) -> Vec<String> {\n");
    text.push_str("    s.split(' ').map(String::from).collect()\n");
    text.push_str("}\n");
    text
}

/// 37 callers of `leaf`, each called by one `top_NN`.
fn fan_rs() -> Result<String> {
    let mut text = String::from("pub fn leaf() {}\n");
    for i in 0..37 {
        writeln!(text, "pub fn caller_{i:02}() {{ leaf(); }}")?;
    }
    for i in 0..37 {
        writeln!(text, "pub fn top_{i:02}() {{ caller_{i:02}(); }}")?;
    }
    Ok(text)
}

fn write_file(root: &Path, rel: &str, content: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content).with_context(|| format!("Failed to write {rel}"))
}

fn workspace() -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    write_file(root, "crates/hir-def/src/resolver.rs", RESOLVER_RS)?;
    write_file(root, "crates/hir/src/lib.rs", &hir_lib_rs())?;
    write_file(root, "crates/core/src/cli.rs", &cli_rs())?;
    write_file(root, "crates/core/src/main.rs", MAIN_RS)?;
    write_file(root, "crates/greet/src/lib.rs", GREET_RS)?;
    write_file(root, "crates/fan/src/lib.rs", &fan_rs()?)?;
    Ok(dir)
}

fn config(mockls_args: &[&str]) -> Config {
    Config {
        server: ServerConfig {
            command: env!("CARGO_BIN_EXE_mockls").to_string(),
            args: mockls_args.iter().map(ToString::to_string).collect(),
            initialization_options: None,
        },
        timeouts: Timeouts {
            request_ms: 5_000,
            initialize_ms: 5_000,
            workspace_symbol_ms: 5_000,
            index_wait_ms: 200,
            shutdown_grace_ms: 1_000,
        },
        ..Config::default()
    }
}

async fn start(dir: &TempDir, mockls_args: &[&str]) -> Result<GroundTruthRun> {
    GroundTruthRun::start(&config(mockls_args), dir.path()).await
}

fn descriptor(value: Value) -> Result<QueryDescriptor> {
    serde_json::from_value(value).context("Invalid descriptor")
}

fn as_strs(names: &[QualifiedName]) -> Vec<&str> {
    names.iter().map(QualifiedName::as_str).collect()
}

#[tokio::test]
async fn test_definition_across_crates() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    let query = descriptor(json!({
        "method": "definition",
        "target": "crates/hir/src/lib.rs:42:10"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(as_strs(&names), vec!["hir_def::resolver::resolve_path"]);

    run.finish().await
}

#[tokio::test]
async fn test_definition_links_are_normalized() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &["--definition-links"]).await?;

    let query = descriptor(json!({
        "method": "definition",
        "target": "crates/hir/src/lib.rs:42:10"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(as_strs(&names), vec!["hir_def::resolver::resolve_path"]);

    run.finish().await
}

#[tokio::test]
async fn test_references_resolve_to_enclosing_function() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    // Three call sites inside lines 100-140 collapse to one caller.
    let query = descriptor(json!({
        "method": "references",
        "target": "crates/core/src/cli.rs:142:12"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(as_strs(&names), vec!["core::cli::parse_args"]);

    let query = descriptor(json!({
        "method": "references",
        "target": "crates/hir-def/src/resolver.rs:3:8"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(as_strs(&names), vec!["hir::lower"]);

    run.finish().await
}

#[tokio::test]
async fn test_method_callers_carry_owner_type() -> Result<()> {
    for args in [&[][..], &["--flat-symbols"][..]] {
        let dir = workspace()?;
        let mut run = start(&dir, args).await?;

        let query = descriptor(json!({
            "method": "references",
            "target": "crates/greet/src/lib.rs:13:4"
        }))?;
        let names = run.execute(&query).await?;
        assert_eq!(
            as_strs(&names),
            vec!["greet::English::greet"],
            "mockls args: {args:?}"
        );

        run.finish().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_implementations_name_the_implementing_type() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    let query = descriptor(json!({
        "method": "implementations",
        "target": "crates/greet/src/lib.rs:1:11"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(as_strs(&names), vec!["greet::English"]);

    run.finish().await
}

#[tokio::test]
async fn test_chain_of_one_equals_single_hop() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    let single = descriptor(json!({
        "method": "references",
        "target": "crates/core/src/cli.rs:142:12"
    }))?;
    let chain = descriptor(json!({
        "type": "chain",
        "chain": [{ "method": "references", "target": "crates/core/src/cli.rs:142:12" }]
    }))?;

    let from_single = run.execute(&single).await?;
    let from_chain = run.execute(&chain).await?;
    assert_eq!(from_single, from_chain);

    run.finish().await
}

#[tokio::test]
async fn test_two_hop_callers() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    // tokenize <- parse_args <- run
    let chain = descriptor(json!({
        "type": "chain",
        "chain": [
            { "method": "references", "target": "crates/core/src/cli.rs:142:12" },
            { "method": "references" }
        ]
    }))?;
    let names = run.execute(&chain).await?;
    assert_eq!(as_strs(&names), vec!["core::main::run"]);

    run.finish().await
}

#[tokio::test]
async fn test_chain_fan_out_is_capped() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    let first_hop = descriptor(json!({
        "method": "references",
        "target": "crates/fan/src/lib.rs:1:8"
    }))?;
    let callers = run.execute(&first_hop).await?;
    assert_eq!(callers.len(), 37);
    assert_eq!(callers[0].as_str(), "fan::caller_00");

    let chain = descriptor(json!({
        "type": "chain",
        "chain": [
            { "method": "references", "target": "crates/fan/src/lib.rs:1:8" },
            { "method": "references" }
        ]
    }))?;
    let names = run.execute(&chain).await?;

    let expected: Vec<String> = (0..20).map(|i| format!("fan::top_{i:02}")).collect();
    assert_eq!(as_strs(&names), expected.iter().map(String::as_str).collect::<Vec<_>>());

    run.finish().await
}

#[tokio::test]
async fn test_chain_without_start_target_is_empty() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    let chain = descriptor(json!({
        "type": "chain",
        "chain": [{ "method": "references" }, { "method": "references" }]
    }))?;
    assert!(run.execute(&chain).await?.is_empty());

    run.finish().await
}

#[tokio::test]
async fn test_name_location_round_trip() -> Result<()> {
    let dir = workspace()?;
    let run = start(&dir, &[]).await?;

    for name in [
        "core::cli::tokenize",
        "hir_def::resolver::resolve_path",
        "fan::caller_17",
    ] {
        let name = QualifiedName::from(name);
        let found = resolve::locate(run.client(), run.workspace(), &name)
            .await
            .with_context(|| format!("{name} not located"))?;

        let location = Location {
            uri: run.workspace().uri_for(&found.path)?,
            range: Range::new(found.position, found.position),
        };
        let back = resolve::name_at(run.workspace(), &location, &run.client().encoding())
            .await
            .with_context(|| format!("{name} did not resolve back"))?;
        assert_eq!(back, name);
    }

    run.finish().await
}

#[tokio::test]
async fn test_reverse_resolution_misses() -> Result<()> {
    let dir = workspace()?;
    let run = start(&dir, &[]).await?;

    for name in [
        "core::cli::does_not_exist",
        // Declared in hir_def, not hir.
        "hir::resolve_path",
        // Substring of a real symbol is not a match.
        "core::cli::token",
    ] {
        let found =
            resolve::locate(run.client(), run.workspace(), &QualifiedName::from(name)).await;
        assert!(found.is_none(), "{name} resolved to {found:?}");
    }

    run.finish().await
}

#[tokio::test]
async fn test_directory_scan() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    let query = descriptor(json!({
        "type": "workspace_symbol",
        "directory": "crates/core/src"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(
        as_strs(&names),
        vec![
            "core::cli::CliArgs",
            "core::cli::parse_args",
            "core::cli::tokenize",
            "core::main::run",
            "core::main::client_id",
        ]
    );

    // A single file is accepted too.
    let query = descriptor(json!({
        "type": "workspace_symbol",
        "directory": "crates/hir-def/src/resolver.rs"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(
        as_strs(&names),
        vec!["hir_def::resolver::Resolver", "hir_def::resolver::resolve_path"]
    );

    run.finish().await
}

#[tokio::test]
async fn test_directory_scan_respects_file_cap() -> Result<()> {
    let dir = workspace()?;
    let mut cfg = config(&[]);
    cfg.limits.max_scan_files = 1;
    let mut run = GroundTruthRun::start(&cfg, dir.path()).await?;

    let query = descriptor(json!({
        "type": "workspace_symbol",
        "directory": "crates/core"
    }))?;
    let names = run.execute(&query).await?;
    assert!(names.iter().all(|n| n.as_str().starts_with("core::cli::")));
    assert_eq!(run.cache().len(), 1);

    run.finish().await
}

#[tokio::test]
async fn test_module_scan() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    // `client_id` matches the search text but lives in core::main.
    let query = descriptor(json!({
        "type": "workspace_symbol",
        "module": "core::cli"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(as_strs(&names), vec!["core::cli::CliArgs"]);

    run.finish().await
}

#[tokio::test]
async fn test_module_scan_matches_container_names() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    // File path says `cli`, no container.
    write_file(root, "crates/cli/src/lib.rs", "pub fn client_banner() {}\n")?;
    // File path says `shell`; the inline module is the container.
    write_file(
        root,
        "crates/shell/src/lib.rs",
        "pub mod cli {\n    pub fn cli_banner() {}\n}\n\npub fn cli_usage() {}\n",
    )?;
    // Neither matches: the module path starts with `core`.
    write_file(root, "crates/core/src/cli.rs", "pub struct CliArgs;\n")?;
    let mut run = start(&dir, &[]).await?;

    let query = descriptor(json!({
        "type": "workspace_symbol",
        "module": "cli"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(
        as_strs(&names),
        vec!["cli::client_banner", "shell::cli_banner"]
    );

    run.finish().await
}

#[tokio::test]
async fn test_warm_cache_gives_identical_results() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &[]).await?;

    let query = descriptor(json!({
        "type": "chain",
        "chain": [
            { "method": "references", "target": "crates/fan/src/lib.rs:1:8" },
            { "method": "references" }
        ]
    }))?;

    let cold = run.execute(&query).await?;
    let fetched = run.cache().fetches();
    assert!(fetched > 0);

    let warm = run.execute(&query).await?;
    assert_eq!(cold, warm);
    assert_eq!(run.cache().fetches(), fetched, "warm run refetched symbols");

    run.finish().await
}

#[tokio::test]
async fn test_server_error_surfaces_from_top_level_request() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &["--fail-on", "textDocument/references"]).await?;

    let query = descriptor(json!({
        "method": "references",
        "target": "crates/core/src/cli.rs:142:12"
    }))?;
    match run.execute(&query).await {
        Err(lsp_groundtruth::LspError::Protocol { code, .. }) => assert_eq!(code, -32603),
        other => anyhow::bail!("expected protocol error, got {other:?}"),
    }

    // Definitions still work on the same session.
    let query = descriptor(json!({
        "method": "definition",
        "target": "crates/hir/src/lib.rs:42:10"
    }))?;
    assert_eq!(run.execute(&query).await?.len(), 1);

    run.finish().await
}
