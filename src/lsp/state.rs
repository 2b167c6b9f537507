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

//! Indexing progress tracking.
//!
//! Ground truth extracted from a half-indexed workspace is silently wrong,
//! so a run waits for the server to settle before the first query.

use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Token type for progress tracking (string or number).
pub type ProgressToken = NumberOrString;

/// Overall server readiness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Server spawned, no progress reported yet.
    Initializing,
    /// Server actively indexing.
    Indexing,
    /// Server reported quiescence or finished all progress.
    Ready,
    /// Server connection lost.
    Dead,
}

/// Payload of rust-analyzer's `experimental/serverStatus` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatusParams {
    /// `ok`, `warning` or `error`.
    pub health: String,
    /// True once the server has no pending background work.
    pub quiescent: bool,
    /// Optional status text.
    #[serde(default)]
    pub message: Option<String>,
}

/// Folds progress notifications into a [`ServerState`].
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active_progress: HashSet<ProgressToken>,
    seen_progress: bool,
    quiescent: Option<bool>,
}

impl ProgressTracker {
    /// Creates a new `ProgressTracker`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update state from a progress notification.
    pub fn update(&mut self, params: &ProgressParams) {
        match &params.value {
            ProgressParamsValue::WorkDone(progress) => match progress {
                WorkDoneProgress::Begin(_) => {
                    self.seen_progress = true;
                    self.active_progress.insert(params.token.clone());
                }
                WorkDoneProgress::Report(_) => {}
                WorkDoneProgress::End(_) => {
                    self.active_progress.remove(&params.token);
                }
            },
        }
    }

    /// Update state from an `experimental/serverStatus` notification.
    pub fn update_status(&mut self, status: &ServerStatusParams) {
        self.quiescent = Some(status.quiescent);
    }

    /// Returns true if server is busy with any progress operations.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.active_progress.is_empty()
    }

    /// Derives the readiness state.
    ///
    /// An explicit quiescence report wins over progress bookkeeping.
    #[must_use]
    pub fn state(&self) -> ServerState {
        match self.quiescent {
            Some(true) => ServerState::Ready,
            Some(false) => ServerState::Indexing,
            None if self.is_busy() => ServerState::Indexing,
            None if self.seen_progress => ServerState::Ready,
            None => ServerState::Initializing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn make_progress_params(token: &str, progress: WorkDoneProgress) -> ProgressParams {
        ProgressParams {
            token: NumberOrString::String(token.to_string()),
            value: ProgressParamsValue::WorkDone(progress),
        }
    }

    fn begin(title: &str, percentage: Option<u32>) -> WorkDoneProgress {
        WorkDoneProgress::Begin(lsp_types::WorkDoneProgressBegin {
            title: title.to_string(),
            cancellable: None,
            message: None,
            percentage,
        })
    }

    fn end() -> WorkDoneProgress {
        WorkDoneProgress::End(lsp_types::WorkDoneProgressEnd { message: None })
    }

    #[test]
    fn test_initializing_until_progress_seen() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.state(), ServerState::Initializing);
    }

    #[test]
    fn test_progress_begin_end() {
        let mut tracker = ProgressTracker::new();

        tracker.update(&make_progress_params(
            "rustAnalyzer/Indexing",
            begin("Indexing", Some(0)),
        ));
        assert!(tracker.is_busy());
        assert_eq!(tracker.state(), ServerState::Indexing);

        tracker.update(&make_progress_params("rustAnalyzer/Indexing", end()));
        assert!(!tracker.is_busy());
        assert_eq!(tracker.state(), ServerState::Ready);
    }

    #[test]
    fn test_report_keeps_token_busy() {
        let mut tracker = ProgressTracker::new();
        tracker.update(&make_progress_params("indexing", begin("Indexing", Some(0))));

        let report = make_progress_params(
            "indexing",
            WorkDoneProgress::Report(lsp_types::WorkDoneProgressReport {
                cancellable: None,
                message: Some("50% done".to_string()),
                percentage: Some(50),
            }),
        );
        tracker.update(&report);

        assert!(tracker.is_busy());
        assert_eq!(tracker.state(), ServerState::Indexing);
    }

    #[test]
    fn test_end_for_unknown_token_is_ignored() {
        let mut tracker = ProgressTracker::new();
        tracker.update(&make_progress_params("indexing", begin("Indexing", None)));
        tracker.update(&make_progress_params("other", end()));
        assert_eq!(tracker.state(), ServerState::Indexing);
    }

    #[test]
    fn test_multiple_tokens_stay_busy_until_all_end() {
        let mut tracker = ProgressTracker::new();
        tracker.update(&make_progress_params("indexing", begin("Indexing", Some(50))));
        tracker.update(&make_progress_params("priming", begin("Priming", Some(10))));

        tracker.update(&make_progress_params("indexing", end()));
        assert_eq!(tracker.state(), ServerState::Indexing);

        tracker.update(&make_progress_params("priming", end()));
        assert_eq!(tracker.state(), ServerState::Ready);
    }

    #[test]
    fn test_quiescence_overrides_progress() {
        let mut tracker = ProgressTracker::new();
        tracker.update(&make_progress_params("indexing", begin("Indexing", None)));

        tracker.update_status(&ServerStatusParams {
            health: "ok".to_string(),
            quiescent: true,
            message: None,
        });
        assert_eq!(tracker.state(), ServerState::Ready);

        tracker.update_status(&ServerStatusParams {
            health: "ok".to_string(),
            quiescent: false,
            message: None,
        });
        assert_eq!(tracker.state(), ServerState::Indexing);
    }

    #[test]
    fn test_server_status_deserializes() -> Result<()> {
        let status: ServerStatusParams =
            serde_json::from_str(r#"{"health":"warning","quiescent":true}"#)?;
        assert!(status.quiescent);
        assert_eq!(status.health, "warning");
        assert!(status.message.is_none());
        Ok(())
    }
}
