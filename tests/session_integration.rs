// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Session and run lifecycle tests against mockls.
//!
//! Exercises readiness detection, request correlation over a real pipe,
//! late replies, server failure and fixture labelling.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use lsp_groundtruth::LspError;
use lsp_groundtruth::config::{Config, ServerConfig, Timeouts};
use lsp_groundtruth::lsp::ServerState;
use lsp_groundtruth::run::{EvalFixture, GroundTruthRun};
use lsp_types::PositionEncodingKind;
use serde_json::{Value, json};
use tempfile::TempDir;

const CLI_RS: &str = "\
pub fn parse_args(argv: &[String]) -> Vec<String> {
    argv.iter().map(|a| tokenize(a)).collect()
}

pub fn tokenize(s: &str) -> String {
    s.trim().to_string()
}
";

const MAIN_RS: &str = "\
pub fn run() {
    crate::cli::parse_args(&[]);
}
";

fn workspace() -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    let src = dir.path().join("crates/core/src");
    std::fs::create_dir_all(&src)?;
    std::fs::write(src.join("cli.rs"), CLI_RS)?;
    std::fs::write(src.join("main.rs"), MAIN_RS)?;
    Ok(dir)
}

fn config(mockls_args: &[&str], timeouts: Timeouts) -> Config {
    Config {
        server: ServerConfig {
            command: env!("CARGO_BIN_EXE_mockls").to_string(),
            args: mockls_args.iter().map(ToString::to_string).collect(),
            initialization_options: None,
        },
        timeouts,
        ..Config::default()
    }
}

const fn fast_timeouts() -> Timeouts {
    Timeouts {
        request_ms: 5_000,
        initialize_ms: 5_000,
        workspace_symbol_ms: 5_000,
        index_wait_ms: 200,
        shutdown_grace_ms: 1_000,
    }
}

async fn start(dir: &TempDir, mockls_args: &[&str]) -> Result<GroundTruthRun> {
    GroundTruthRun::start(&config(mockls_args, fast_timeouts()), dir.path()).await
}

fn write_fixture(path: &Path, value: &Value) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?).context("Failed to write fixture")
}

#[tokio::test]
async fn test_negotiates_utf8_positions() -> Result<()> {
    let dir = workspace()?;
    let run = start(&dir, &[]).await?;

    assert_eq!(run.client().encoding(), PositionEncodingKind::UTF8);
    assert!(run.client().is_alive());

    run.finish().await
}

#[tokio::test]
async fn test_waits_for_indexing_progress() -> Result<()> {
    let dir = workspace()?;
    let timeouts = Timeouts {
        index_wait_ms: 10_000,
        ..fast_timeouts()
    };
    let run = GroundTruthRun::start(
        &config(&["--indexing-delay", "300"], timeouts),
        dir.path(),
    )
    .await?;

    assert_eq!(run.client().state(), ServerState::Ready);

    run.finish().await
}

#[tokio::test]
async fn test_quiescent_status_marks_ready() -> Result<()> {
    let dir = workspace()?;
    let timeouts = Timeouts {
        index_wait_ms: 10_000,
        ..fast_timeouts()
    };
    let run = GroundTruthRun::start(&config(&["--server-status"], timeouts), dir.path()).await?;

    assert_eq!(run.client().state(), ServerState::Ready);

    run.finish().await
}

#[tokio::test]
async fn test_server_configuration_request_does_not_block() -> Result<()> {
    let dir = workspace()?;
    let mut run = start(&dir, &["--send-configuration-request"]).await?;

    let query = serde_json::from_value(json!({
        "method": "references",
        "target": "crates/core/src/cli.rs:5:8"
    }))?;
    let names = run.execute(&query).await?;
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].as_str(), "core::cli::parse_args");

    run.finish().await
}

#[tokio::test]
async fn test_pipelined_requests_over_pipe() -> Result<()> {
    let dir = workspace()?;
    let run = start(&dir, &["--response-delay", "50"]).await?;
    let client = run.client();
    let timeout = Duration::from_secs(5);

    let (first, second) = tokio::join!(
        client.request::<_, Value>("workspace/symbol", json!({ "query": "parse_args" }), timeout),
        client.request::<_, Value>("workspace/symbol", json!({ "query": "tokenize" }), timeout),
    );
    assert_eq!(first?[0]["name"], "parse_args");
    assert_eq!(second?[0]["name"], "tokenize");

    run.finish().await
}

#[tokio::test]
async fn test_late_reply_does_not_leak_into_next_request() -> Result<()> {
    let dir = workspace()?;
    let run = start(&dir, &["--response-delay", "300"]).await?;
    let client = run.client();

    let slow = client
        .request::<_, Value>(
            "workspace/symbol",
            json!({ "query": "parse_args" }),
            Duration::from_millis(50),
        )
        .await;
    assert!(
        matches!(slow, Err(LspError::Timeout { .. })),
        "got {slow:?}"
    );

    // The stale parse_args reply arrives while this one is pending.
    let next: Value = client
        .request(
            "workspace/symbol",
            json!({ "query": "tokenize" }),
            Duration::from_secs(5),
        )
        .await?;
    assert_eq!(next[0]["name"], "tokenize");

    run.finish().await
}

#[tokio::test]
async fn test_label_fixture() -> Result<()> {
    let dir = workspace()?;
    let path = dir.path().join("queries.json");
    write_fixture(
        &path,
        &json!({
            "version": 1,
            "queries": [
                {
                    "id": "callers",
                    "query": "who calls tokenize",
                    "lsp_query": { "method": "references", "target": "crates/core/src/cli.rs:5:8" }
                },
                {
                    "id": "nobody",
                    "lsp_query": { "method": "references", "target": "crates/core/src/main.rs:1:8" },
                    "expected": ["kept::as::is"]
                },
                { "id": "bad", "lsp_query": { "type": "mystery" } },
                { "id": "plain" }
            ]
        }),
    )?;

    let mut fixture = EvalFixture::load(&path)?;
    let mut run = start(&dir, &[]).await?;
    let summary = run.label(&mut fixture.queries).await?;
    run.finish().await?;
    fixture.save(&path)?;

    assert_eq!(summary.labelled, 1);
    assert_eq!(summary.empty, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved["version"], 1);
    assert_eq!(saved["queries"][0]["query"], "who calls tokenize");
    assert_eq!(saved["queries"][0]["expected"], json!(["core::cli::parse_args"]));
    assert_eq!(saved["queries"][1]["expected"], json!(["kept::as::is"]));
    assert!(saved["queries"][3].get("expected").is_none());
    Ok(())
}

#[tokio::test]
async fn test_label_truncates_to_expected_cap() -> Result<()> {
    let dir = workspace()?;
    let mut cfg = config(&[], fast_timeouts());
    cfg.limits.expected_cap = 1;
    let mut run = GroundTruthRun::start(&cfg, dir.path()).await?;

    let mut fixture: EvalFixture = serde_json::from_value(json!({
        "queries": [{
            "id": "scan",
            "lsp_query": { "type": "workspace_symbol", "directory": "crates/core/src" }
        }]
    }))?;
    run.label(&mut fixture.queries).await?;

    let expected = fixture.queries[0]
        .expected
        .as_ref()
        .context("scan not labelled")?;
    assert_eq!(expected.len(), 1);

    run.finish().await
}

#[tokio::test]
async fn test_label_stops_when_server_dies() -> Result<()> {
    let dir = workspace()?;
    // initialize is the first response; the server exits after the second.
    let mut run = start(&dir, &["--drop-after", "2"]).await?;

    let entry = json!({
        "id": "q",
        "lsp_query": { "method": "definition", "target": "crates/core/src/cli.rs:2:26" }
    });
    let mut fixture: EvalFixture = serde_json::from_value(json!({
        "queries": std::iter::repeat_n(entry, 6).collect::<Vec<_>>()
    }))?;

    let err = match run.label(&mut fixture.queries).await {
        Ok(summary) => anyhow::bail!("label kept going on a dead server: {summary:?}"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("no longer running"), "{err}");
    // Only the first query got an answer.
    assert_eq!(fixture.queries[0].expected.as_ref().map(Vec::len), Some(1));
    assert!(fixture.queries[1..].iter().all(|q| q.expected.is_none()));
    assert!(!run.client().is_alive());
    assert_eq!(run.client().state(), ServerState::Dead);

    run.finish().await
}

#[tokio::test]
async fn test_label_stops_after_consecutive_timeouts() -> Result<()> {
    let dir = workspace()?;
    let timeouts = Timeouts {
        request_ms: 100,
        ..fast_timeouts()
    };
    let mut run = GroundTruthRun::start(
        &config(&["--hang-on", "textDocument/definition"], timeouts),
        dir.path(),
    )
    .await?;

    let entry = json!({
        "id": "q",
        "lsp_query": { "method": "definition", "target": "crates/core/src/cli.rs:2:26" }
    });
    let mut fixture: EvalFixture = serde_json::from_value(json!({
        "queries": std::iter::repeat_n(entry, 5).collect::<Vec<_>>()
    }))?;

    let err = match run.label(&mut fixture.queries).await {
        Ok(summary) => anyhow::bail!("expected failure, got {summary:?}"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("consecutive timeouts"), "{err}");
    // The server itself is still up.
    assert!(run.client().is_alive());

    run.finish().await
}

#[tokio::test]
async fn test_start_fails_for_missing_server() -> Result<()> {
    let dir = workspace()?;
    let mut cfg = config(&[], fast_timeouts());
    cfg.server.command = "definitely-not-a-language-server".to_string();

    assert!(GroundTruthRun::start(&cfg, dir.path()).await.is_err());
    Ok(())
}
