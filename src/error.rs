// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for the protocol client.
//!
//! A location that cannot be mapped to a name (or the reverse) is not an
//! error: resolvers return `None` for that.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the language server.
#[derive(Debug, Error)]
pub enum LspError {
    /// A truncated or malformed frame. Fatal to the reader loop.
    #[error("malformed LSP frame: {0}")]
    Framing(String),

    /// The server answered with a JSON-RPC error object.
    #[error("LSP error {code} for '{method}': {message}")]
    Protocol {
        /// Method of the failed request.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the server.
        message: String,
    },

    /// No response arrived before the deadline.
    #[error("LSP request '{method}' timed out after {after:?}")]
    Timeout {
        /// Method of the abandoned request.
        method: String,
        /// How long the caller waited.
        after: Duration,
    },

    /// The connection to the server is gone.
    #[error("LSP server connection closed")]
    Closed,

    /// A path that has no `file://` form, or a URI that is not a file.
    #[error("not a file location: {0}")]
    InvalidUri(String),

    /// I/O failure on the server's pipes.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A message could not be (de)serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LspError {
    /// Returns true for [`LspError::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true when the server connection itself failed.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_method() {
        let err = LspError::Timeout {
            method: "workspace/symbol".to_string(),
            after: Duration::from_millis(250),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "LSP request 'workspace/symbol' timed out after 250ms"
        );
    }

    #[test]
    fn test_disconnect_kinds() {
        assert!(LspError::Closed.is_disconnect());
        let broken = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(LspError::Io(broken).is_disconnect());
        assert!(!LspError::Framing("x".to_string()).is_disconnect());
        assert!(
            !LspError::Timeout {
                method: "m".to_string(),
                after: Duration::from_secs(1),
            }
            .is_disconnect()
        );
    }

    #[test]
    fn test_protocol_error_is_not_timeout() {
        let err = LspError::Protocol {
            method: "textDocument/references".to_string(),
            code: -32603,
            message: "internal".to_string(),
        };
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("-32603"));
    }
}
