// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Normalized symbol trees.
//!
//! Servers answer `textDocument/documentSymbol` either with a nested
//! `DocumentSymbol` tree or a flat `SymbolInformation` list. Both are folded
//! into [`SymbolNode`] trees here so nothing downstream branches on shape.

pub mod cache;

pub use cache::SymbolCache;

use lsp_types::{
    DocumentSymbol, DocumentSymbolResponse, Location, OneOf, Range, SymbolInformation, SymbolKind,
    WorkspaceSymbolResponse,
};

/// Kinds kept by a directory scan.
pub const DECLARATION_KINDS: [SymbolKind; 6] = [
    SymbolKind::CLASS,
    SymbolKind::METHOD,
    SymbolKind::ENUM,
    SymbolKind::INTERFACE,
    SymbolKind::FUNCTION,
    SymbolKind::STRUCT,
];

/// One symbol record with its nested children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolNode {
    /// Symbol name as reported by the server.
    pub name: String,
    /// Symbol kind.
    pub kind: SymbolKind,
    /// Full extent of the declaration.
    pub range: Range,
    /// Extent of the name. Equal to `range` for flat responses.
    pub selection_range: Range,
    /// Container name, only present in flat responses.
    pub container: Option<String>,
    /// Nested symbols.
    pub children: Vec<SymbolNode>,
}

impl SymbolNode {
    /// Whether the declaration spans `line` (inclusive on both ends).
    #[must_use]
    pub const fn contains_line(&self, line: u32) -> bool {
        self.range.start.line <= line && line <= self.range.end.line
    }

    /// Function, method or constructor.
    #[must_use]
    pub fn is_function(&self) -> bool {
        matches!(
            self.kind,
            SymbolKind::FUNCTION | SymbolKind::METHOD | SymbolKind::CONSTRUCTOR
        )
    }

    /// Whether a directory scan reports this symbol.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        DECLARATION_KINDS.contains(&self.kind)
    }
}

/// A `workspace/symbol` match that carries a full location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolHit {
    /// Symbol name.
    pub name: String,
    /// Symbol kind.
    pub kind: SymbolKind,
    /// Container name, if the server reported one.
    pub container: Option<String>,
    /// Where the symbol is declared.
    pub location: Location,
}

/// Converts either document-symbol shape into a tree.
#[must_use]
pub fn normalize(response: DocumentSymbolResponse) -> Vec<SymbolNode> {
    match response {
        DocumentSymbolResponse::Nested(symbols) => {
            symbols.into_iter().map(from_document_symbol).collect()
        }
        DocumentSymbolResponse::Flat(symbols) => nest_flat(symbols),
    }
}

fn from_document_symbol(symbol: DocumentSymbol) -> SymbolNode {
    SymbolNode {
        name: symbol.name,
        kind: symbol.kind,
        range: symbol.range,
        selection_range: symbol.selection_range,
        container: None,
        children: symbol
            .children
            .unwrap_or_default()
            .into_iter()
            .map(from_document_symbol)
            .collect(),
    }
}

/// Nests a flat list by range containment.
fn nest_flat(symbols: Vec<SymbolInformation>) -> Vec<SymbolNode> {
    let mut nodes: Vec<SymbolNode> = symbols
        .into_iter()
        .map(|symbol| SymbolNode {
            name: symbol.name,
            kind: symbol.kind,
            range: symbol.location.range,
            selection_range: symbol.location.range,
            container: symbol.container_name.filter(|c| !c.is_empty()),
            children: Vec::new(),
        })
        .collect();

    // Outer ranges before the ranges they contain.
    nodes.sort_by(|a, b| {
        a.range
            .start
            .cmp(&b.range.start)
            .then_with(|| b.range.end.cmp(&a.range.end))
    });

    let mut roots = Vec::new();
    let mut stack: Vec<SymbolNode> = Vec::new();

    for node in nodes {
        while let Some(top) = stack.last() {
            if range_contains(&top.range, &node.range) {
                break;
            }
            if let Some(done) = stack.pop() {
                attach(done, &mut stack, &mut roots);
            }
        }
        stack.push(node);
    }
    while let Some(done) = stack.pop() {
        attach(done, &mut stack, &mut roots);
    }

    roots
}

fn attach(node: SymbolNode, stack: &mut [SymbolNode], roots: &mut Vec<SymbolNode>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

const fn range_contains(outer: &Range, inner: &Range) -> bool {
    let starts_before = outer.start.line < inner.start.line
        || (outer.start.line == inner.start.line && outer.start.character <= inner.start.character);
    let ends_after = outer.end.line > inner.end.line
        || (outer.end.line == inner.end.line && outer.end.character >= inner.end.character);
    starts_before && ends_after
}

/// Pre-order walk over every node of a forest.
#[must_use]
pub fn flatten(nodes: &[SymbolNode]) -> Vec<&SymbolNode> {
    let mut out = Vec::new();
    let mut stack: Vec<&SymbolNode> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children.iter().rev());
    }
    out
}

/// Keeps the matches of a workspace symbol search that carry a range.
///
/// `WorkspaceSymbol` entries with a bare URI (no range) are dropped.
#[must_use]
pub fn workspace_hits(response: WorkspaceSymbolResponse) -> Vec<SymbolHit> {
    match response {
        WorkspaceSymbolResponse::Flat(symbols) => symbols
            .into_iter()
            .map(|symbol| SymbolHit {
                name: symbol.name,
                kind: symbol.kind,
                container: symbol.container_name,
                location: symbol.location,
            })
            .collect(),
        WorkspaceSymbolResponse::Nested(symbols) => symbols
            .into_iter()
            .filter_map(|symbol| match symbol.location {
                OneOf::Left(location) => Some(SymbolHit {
                    name: symbol.name,
                    kind: symbol.kind,
                    container: symbol.container_name,
                    location,
                }),
                OneOf::Right(_) => None,
            })
            .collect(),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    deprecated,
    reason = "Tests build deprecated lsp-types fields and unwrap for clear failures"
)]
mod tests {
    use super::*;
    use lsp_types::{Position, Uri};

    fn range(start: (u32, u32), end: (u32, u32)) -> Range {
        Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1))
    }

    fn info(name: &str, kind: SymbolKind, r: Range, container: Option<&str>) -> SymbolInformation {
        let uri: Uri = "file:///repo/crates/core/src/cli.rs".parse().unwrap();
        SymbolInformation {
            name: name.to_string(),
            kind,
            tags: None,
            deprecated: None,
            location: Location { uri, range: r },
            container_name: container.map(str::to_string),
        }
    }

    fn doc(name: &str, kind: SymbolKind, r: Range, children: Vec<DocumentSymbol>) -> DocumentSymbol {
        DocumentSymbol {
            name: name.to_string(),
            detail: None,
            kind,
            tags: None,
            deprecated: None,
            range: r,
            selection_range: r,
            children: Some(children),
        }
    }

    #[test]
    fn test_nested_shape_keeps_hierarchy() {
        let response = DocumentSymbolResponse::Nested(vec![doc(
            "impl Parser",
            SymbolKind::OBJECT,
            range((0, 0), (20, 1)),
            vec![doc("parse", SymbolKind::METHOD, range((2, 4), (10, 5)), vec![])],
        )]);

        let nodes = normalize(response);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].children.len(), 1);
        assert_eq!(nodes[0].children[0].name, "parse");
        assert!(nodes[0].children[0].is_function());
    }

    #[test]
    fn test_flat_shape_nests_by_containment() {
        // Deliberately out of order.
        let response = DocumentSymbolResponse::Flat(vec![
            info("parse", SymbolKind::METHOD, range((2, 4), (10, 5)), Some("Parser")),
            info("helper", SymbolKind::FUNCTION, range((30, 0), (35, 1)), None),
            info("Parser", SymbolKind::STRUCT, range((0, 0), (20, 1)), None),
        ]);

        let nodes = normalize(response);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "Parser");
        assert_eq!(nodes[0].children[0].name, "parse");
        assert_eq!(nodes[0].children[0].container.as_deref(), Some("Parser"));
        assert_eq!(nodes[1].name, "helper");
    }

    #[test]
    fn test_flat_empty_container_is_none() {
        let response = DocumentSymbolResponse::Flat(vec![info(
            "main",
            SymbolKind::FUNCTION,
            range((0, 0), (3, 1)),
            Some(""),
        )]);
        let nodes = normalize(response);
        assert!(nodes[0].container.is_none());
    }

    #[test]
    fn test_flatten_is_preorder() {
        let nodes = normalize(DocumentSymbolResponse::Nested(vec![
            doc(
                "a",
                SymbolKind::MODULE,
                range((0, 0), (10, 0)),
                vec![
                    doc("b", SymbolKind::FUNCTION, range((1, 0), (2, 0)), vec![]),
                    doc("c", SymbolKind::STRUCT, range((3, 0), (4, 0)), vec![]),
                ],
            ),
            doc("d", SymbolKind::FUNCTION, range((11, 0), (12, 0)), vec![]),
        ]));

        let names: Vec<&str> = flatten(&nodes).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_declaration_kinds() {
        let node = |kind| SymbolNode {
            name: "x".to_string(),
            kind,
            range: Range::default(),
            selection_range: Range::default(),
            container: None,
            children: Vec::new(),
        };
        assert!(node(SymbolKind::STRUCT).is_declaration());
        assert!(node(SymbolKind::INTERFACE).is_declaration());
        assert!(!node(SymbolKind::CONSTANT).is_declaration());
        assert!(!node(SymbolKind::MODULE).is_declaration());
        assert!(node(SymbolKind::CONSTRUCTOR).is_function());
        assert!(!node(SymbolKind::STRUCT).is_function());
    }

    #[test]
    fn test_workspace_hits_drop_uri_only_entries() {
        let uri: Uri = "file:///repo/crates/hir/src/lib.rs".parse().unwrap();
        let response = WorkspaceSymbolResponse::Nested(vec![
            lsp_types::WorkspaceSymbol {
                name: "resolve_path".to_string(),
                kind: SymbolKind::FUNCTION,
                tags: None,
                container_name: None,
                location: OneOf::Left(Location {
                    uri: uri.clone(),
                    range: range((4, 7), (4, 19)),
                }),
                data: None,
            },
            lsp_types::WorkspaceSymbol {
                name: "resolve_path".to_string(),
                kind: SymbolKind::FUNCTION,
                tags: None,
                container_name: None,
                location: OneOf::Right(lsp_types::WorkspaceLocation { uri }),
                data: None,
            },
        ]);

        let hits = workspace_hits(response);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].location.range.start, Position::new(4, 7));
    }
}
