// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Protocol session with one language server process.
pub mod client;
/// LSP message protocol definitions and framing.
pub mod protocol;
/// Server state and progress tracking.
pub mod state;

pub use client::{LspClient, locations_from_goto};
pub use state::{ProgressTracker, ServerState};
