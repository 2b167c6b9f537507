// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Query descriptors.
//!
//! Descriptors arrive as the `lsp_query` object of an evaluation fixture:
//!
//! ```json
//! { "type": "single_hop", "method": "textDocument/references", "target": "crates/core/src/cli.rs:12:8" }
//! { "type": "chain", "chain": [{ "method": "references", "target": "..." }, { "method": "references" }] }
//! { "type": "workspace_symbol", "directory": "crates/hir/src" }
//! ```
//!
//! Targets are one-indexed `path:line:col`.

pub mod executor;

pub use executor::QueryExecutor;

use lsp_types::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The method is not one of references, implementations, definition.
    #[error("unknown LSP method '{0}'")]
    UnknownMethod(String),

    /// The target is not `path:line:col` with positive numbers.
    #[error("invalid target '{0}': expected path:line:col (one-indexed)")]
    InvalidTarget(String),

    /// The `type` field names no known query kind.
    #[error("unknown query type '{0}'")]
    UnknownType(String),

    /// A field the query kind needs is absent.
    #[error("{kind} query is missing '{field}'")]
    MissingField {
        /// Query kind.
        kind: &'static str,
        /// Missing field.
        field: &'static str,
    },
}

/// The protocol call behind a single hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LspMethod {
    /// `textDocument/references`: answers are the callers.
    References,
    /// `textDocument/implementation`.
    Implementations,
    /// `textDocument/definition`.
    Definition,
}

impl LspMethod {
    /// JSON-RPC method name.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::References => "textDocument/references",
            Self::Implementations => "textDocument/implementation",
            Self::Definition => "textDocument/definition",
        }
    }
}

impl fmt::Display for LspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for LspMethod {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "textDocument/references" | "references" => Ok(Self::References),
            "textDocument/implementation" | "implementation" | "implementations" => {
                Ok(Self::Implementations)
            }
            "textDocument/definition" | "definition" => Ok(Self::Definition),
            other => Err(DescriptorError::UnknownMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for LspMethod {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LspMethod> for String {
    fn from(method: LspMethod) -> Self {
        method.wire_name().to_string()
    }
}

/// A one-indexed `path:line:col` position in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    /// Repository-relative file path.
    pub path: PathBuf,
    /// One-indexed line.
    pub line: u32,
    /// One-indexed column.
    pub column: u32,
}

impl Target {
    /// Builds a target from a zero-indexed protocol position.
    #[must_use]
    pub fn from_position(path: PathBuf, position: Position) -> Self {
        Self {
            path,
            line: position.line.saturating_add(1),
            column: position.character.saturating_add(1),
        }
    }

    /// The zero-indexed protocol position.
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.line.saturating_sub(1), self.column.saturating_sub(1))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

impl FromStr for Target {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DescriptorError::InvalidTarget(s.to_string());

        let mut parts = s.trim().rsplitn(3, ':');
        let column = parts.next().ok_or_else(invalid)?;
        let line = parts.next().ok_or_else(invalid)?;
        let path = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;

        let line: u32 = line.parse().map_err(|_| invalid())?;
        let column: u32 = column.parse().map_err(|_| invalid())?;
        if line == 0 || column == 0 {
            return Err(invalid());
        }

        Ok(Self {
            path: PathBuf::from(path),
            line,
            column,
        })
    }
}

impl TryFrom<String> for Target {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

/// One hop of a chain. Only the first hop's target is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    /// Protocol call for this hop.
    pub method: LspMethod,
    /// Explicit starting point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

/// What a workspace-symbol scan covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    /// A file, or every source file under a directory.
    Directory(PathBuf),
    /// A `::`-separated module path such as `syntax::ast`.
    Module(String),
}

/// A ground-truth query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawDescriptor")]
pub enum QueryDescriptor {
    /// One protocol call at an explicit target.
    SingleHop {
        /// Protocol call.
        method: LspMethod,
        /// Starting point.
        target: Target,
    },
    /// Hops where each feeds its names into the next.
    Chain {
        /// Ordered hops.
        steps: Vec<ChainStep>,
    },
    /// Declarations in a directory or module.
    WorkspaceSymbol {
        /// What to scan.
        scope: ScanScope,
    },
}

/// Wire shape of a descriptor before validation.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "type")]
    kind: Option<String>,
    method: Option<LspMethod>,
    target: Option<Target>,
    #[serde(default, alias = "steps")]
    chain: Vec<ChainStep>,
    #[serde(default)]
    directory: Option<String>,
    #[serde(default)]
    module: Option<String>,
}

impl TryFrom<RawDescriptor> for QueryDescriptor {
    type Error = DescriptorError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        // A method and target make a single hop whatever the type says.
        if let (Some(method), Some(target)) = (raw.method, raw.target.clone()) {
            return Ok(Self::SingleHop { method, target });
        }

        match raw.kind.as_deref().unwrap_or("single_hop") {
            "single_hop" => Err(DescriptorError::MissingField {
                kind: "single_hop",
                field: if raw.method.is_none() { "method" } else { "target" },
            }),
            "chain" => Ok(Self::Chain { steps: raw.chain }),
            "workspace_symbol" => {
                let directory = raw.directory.filter(|d| !d.trim().is_empty());
                let module = raw.module.filter(|m| !m.trim().is_empty());
                match (directory, module) {
                    (Some(directory), _) => Ok(Self::WorkspaceSymbol {
                        scope: ScanScope::Directory(PathBuf::from(directory)),
                    }),
                    (None, Some(module)) => Ok(Self::WorkspaceSymbol {
                        scope: ScanScope::Module(module),
                    }),
                    (None, None) => Err(DescriptorError::MissingField {
                        kind: "workspace_symbol",
                        field: "directory",
                    }),
                }
            }
            other => Err(DescriptorError::UnknownType(other.to_string())),
        }
    }
}

impl QueryDescriptor {
    /// Convenience constructor for a single hop.
    #[must_use]
    pub const fn single_hop(method: LspMethod, target: Target) -> Self {
        Self::SingleHop { method, target }
    }

    /// Short name of the query kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SingleHop { .. } => "single_hop",
            Self::Chain { .. } => "chain",
            Self::WorkspaceSymbol { .. } => "workspace_symbol",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn test_target_is_one_indexed() -> Result<()> {
        let target: Target = "crates/hir/src/lib.rs:42:10".parse()?;
        assert_eq!(target.path, PathBuf::from("crates/hir/src/lib.rs"));
        assert_eq!(target.position(), Position::new(41, 9));
        assert_eq!(target.to_string(), "crates/hir/src/lib.rs:42:10");
        Ok(())
    }

    #[test]
    fn test_target_path_may_contain_colons() -> Result<()> {
        let target: Target = "C:/repo/src/lib.rs:1:1".parse()?;
        assert_eq!(target.path, PathBuf::from("C:/repo/src/lib.rs"));
        Ok(())
    }

    #[test]
    fn test_invalid_targets() {
        for bad in ["lib.rs", "lib.rs:3", "lib.rs:0:1", "lib.rs:1:0", ":1:1", "lib.rs:x:1"] {
            assert!(
                matches!(bad.parse::<Target>(), Err(DescriptorError::InvalidTarget(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_target_from_position_round_trips() -> Result<()> {
        let target = Target::from_position(PathBuf::from("a.rs"), Position::new(0, 4));
        assert_eq!(target.to_string(), "a.rs:1:5");
        assert_eq!(target.to_string().parse::<Target>()?.position(), Position::new(0, 4));
        Ok(())
    }

    #[test]
    fn test_method_aliases() -> Result<()> {
        assert_eq!("references".parse::<LspMethod>()?, LspMethod::References);
        assert_eq!(
            "textDocument/implementation".parse::<LspMethod>()?,
            LspMethod::Implementations
        );
        assert_eq!("implementations".parse::<LspMethod>()?, LspMethod::Implementations);
        assert_eq!("textDocument/definition".parse::<LspMethod>()?, LspMethod::Definition);
        assert!("textDocument/hover".parse::<LspMethod>().is_err());
        Ok(())
    }

    #[test]
    fn test_untyped_descriptor_is_single_hop() -> Result<()> {
        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "method": "textDocument/references",
            "target": "crates/core/src/cli.rs:12:8"
        }))?;
        assert_eq!(
            descriptor,
            QueryDescriptor::single_hop(
                LspMethod::References,
                "crates/core/src/cli.rs:12:8".parse()?
            )
        );
        Ok(())
    }

    #[test]
    fn test_chain_descriptor() -> Result<()> {
        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "type": "chain",
            "chain": [
                { "method": "textDocument/references", "target": "crates/a/src/lib.rs:3:8" },
                { "method": "references" }
            ]
        }))?;
        let QueryDescriptor::Chain { steps } = descriptor else {
            anyhow::bail!("expected chain");
        };
        assert_eq!(steps.len(), 2);
        assert!(steps[0].target.is_some());
        assert!(steps[1].target.is_none());
        Ok(())
    }

    #[test]
    fn test_directory_wins_over_module() -> Result<()> {
        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "type": "workspace_symbol",
            "directory": "crates/hir/src",
            "module": "hir"
        }))?;
        assert_eq!(
            descriptor,
            QueryDescriptor::WorkspaceSymbol {
                scope: ScanScope::Directory(PathBuf::from("crates/hir/src"))
            }
        );

        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "type": "workspace_symbol",
            "directory": "",
            "module": "syntax::ast"
        }))?;
        assert_eq!(descriptor.kind(), "workspace_symbol");
        assert!(matches!(
            descriptor,
            QueryDescriptor::WorkspaceSymbol { scope: ScanScope::Module(ref m) } if m == "syntax::ast"
        ));
        Ok(())
    }

    #[test]
    fn test_rejected_descriptors() {
        let cases = [
            json!({ "type": "workspace_symbol" }),
            json!({ "type": "single_hop", "method": "references" }),
            json!({ "type": "graph" }),
            json!({ "method": "hover", "target": "a.rs:1:1" }),
        ];
        for case in cases {
            assert!(serde_json::from_value::<QueryDescriptor>(case.clone()).is_err(), "{case}");
        }
    }
}
