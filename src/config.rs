/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::resolve::ModuleLayout;

/// Run configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// The language server to drive.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-request and lifecycle timeouts.
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Fan-out and batch bounds.
    #[serde(default)]
    pub limits: QueryLimits,

    /// How repository paths map to module paths.
    #[serde(default)]
    pub layout: ModuleLayout,
}

/// How to launch the language server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "rust-analyzer")
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default = "default_initialization_options")]
    pub initialization_options: Option<serde_json::Value>,
}

/// Timeouts in milliseconds.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Default deadline for a request (default: 30s)
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,

    /// Deadline for the `initialize` handshake (default: 120s)
    #[serde(default = "default_initialize_ms")]
    pub initialize_ms: u64,

    /// Deadline for `workspace/symbol` searches (default: 60s)
    #[serde(default = "default_workspace_symbol_ms")]
    pub workspace_symbol_ms: u64,

    /// Upper bound on waiting for indexing before the first query (default: 30s)
    #[serde(default = "default_index_wait_ms")]
    pub index_wait_ms: u64,

    /// Grace period between terminate and kill on shutdown (default: 5s)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Bounds that keep a query run's latency in check.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Names carried from one chain hop into the next (default: 20)
    #[serde(default = "default_fan_out_cap")]
    pub fan_out_cap: usize,

    /// Files enumerated by a directory scan (default: 50)
    #[serde(default = "default_max_scan_files")]
    pub max_scan_files: usize,

    /// Names stored per labelled query (default: 1000)
    #[serde(default = "default_expected_cap")]
    pub expected_cap: usize,

    /// Back-to-back timeouts after which a run is abandoned (default: 3)
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: usize,
}

fn default_command() -> String {
    "rust-analyzer".to_string()
}

#[allow(
    clippy::unnecessary_wraps,
    reason = "serde default must match the Option field type"
)]
fn default_initialization_options() -> Option<serde_json::Value> {
    // Build scripts and proc macros slow indexing without changing the
    // symbol graph we read.
    Some(serde_json::json!({
        "cargo": { "buildScripts": { "enable": false } },
        "procMacro": { "enable": false },
    }))
}

const fn default_request_ms() -> u64 {
    30_000
}

const fn default_initialize_ms() -> u64 {
    120_000
}

const fn default_workspace_symbol_ms() -> u64 {
    60_000
}

const fn default_index_wait_ms() -> u64 {
    30_000
}

const fn default_shutdown_grace_ms() -> u64 {
    5_000
}

const fn default_fan_out_cap() -> usize {
    20
}

const fn default_max_scan_files() -> usize {
    50
}

const fn default_expected_cap() -> usize {
    1000
}

const fn default_max_consecutive_timeouts() -> usize {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            initialization_options: default_initialization_options(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            initialize_ms: default_initialize_ms(),
            workspace_symbol_ms: default_workspace_symbol_ms(),
            index_wait_ms: default_index_wait_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Timeouts {
    /// Default request deadline.
    #[must_use]
    pub const fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    /// Handshake deadline.
    #[must_use]
    pub const fn initialize(&self) -> Duration {
        Duration::from_millis(self.initialize_ms)
    }

    /// Workspace symbol deadline.
    #[must_use]
    pub const fn workspace_symbol(&self) -> Duration {
        Duration::from_millis(self.workspace_symbol_ms)
    }

    /// Indexing wait bound.
    #[must_use]
    pub const fn index_wait(&self) -> Duration {
        Duration::from_millis(self.index_wait_ms)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            fan_out_cap: default_fan_out_cap(),
            max_scan_files: default_max_scan_files(),
            expected_cap: default_expected_cap(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or does not match the
    /// expected shape.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Load from user config directory (~/.config/lsp-groundtruth/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("lsp-groundtruth").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 2. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Load from environment variables (LSP_GROUNDTRUTH_LIMITS__FAN_OUT_CAP, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("LSP_GROUNDTRUTH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.command, "rust-analyzer");
        assert_eq!(config.limits.fan_out_cap, 20);
        assert_eq!(config.limits.max_scan_files, 50);
        assert_eq!(config.timeouts.request(), Duration::from_secs(30));
        assert_eq!(config.timeouts.initialize(), Duration::from_secs(120));
        assert_eq!(config.layout.root_marker, "crates");
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[server]
command = "mockls"
args = ["--flat-symbols"]

[limits]
fan_out_cap = 5

[timeouts]
request_ms = 250

[layout]
root_marker = "packages"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.server.command, "mockls");
        assert_eq!(config.server.args, vec!["--flat-symbols".to_string()]);
        assert_eq!(config.limits.fan_out_cap, 5);
        assert_eq!(config.limits.max_scan_files, 50);
        assert_eq!(config.timeouts.request(), Duration::from_millis(250));
        assert_eq!(config.timeouts.initialize_ms, 120_000);
        assert_eq!(config.layout.root_marker, "packages");
        assert_eq!(config.layout.source_dir, "src");
    }
}
