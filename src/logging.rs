// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs a stderr subscriber filtered by `RUST_LOG`.
///
/// Defaults to `lsp_groundtruth=info`. Calling it twice is harmless: the
/// second call leaves the first subscriber in place.
///
/// # Errors
///
/// Returns an error if the default directive does not parse.
pub fn init() -> Result<()> {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lsp_groundtruth=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}
