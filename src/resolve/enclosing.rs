// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Innermost enclosing function lookup over a symbol tree.

use lsp_types::{Range, SymbolKind};

use crate::symbols::SymbolNode;

/// Size of a range, for picking the smallest of overlapping siblings.
const fn span(range: &Range) -> (u32, u32) {
    let lines = range.end.line.saturating_sub(range.start.line);
    let chars = if lines == 0 {
        range.end.character.saturating_sub(range.start.character)
    } else {
        0
    };
    (lines, chars)
}

/// Returns the chain of nodes from a root down to the innermost
/// function-kind node containing `line`.
fn innermost<'a>(nodes: &'a [SymbolNode], line: u32) -> Option<Vec<&'a SymbolNode>> {
    let mut candidates: Vec<&SymbolNode> = nodes.iter().filter(|n| n.contains_line(line)).collect();
    candidates.sort_by_key(|n| span(&n.range));

    for node in candidates {
        if let Some(mut path) = innermost(&node.children, line) {
            path.insert(0, node);
            return Some(path);
        }
        if node.is_function() {
            return Some(vec![node]);
        }
    }
    None
}

/// Type name from an owner record: `impl<T> Display for Foo<T>` gives `Foo`.
pub(crate) fn owner_name(raw: &str) -> Option<String> {
    let mut text = raw.trim();

    if let Some(rest) = text
        .strip_prefix("impl")
        .filter(|r| r.starts_with(char::is_whitespace) || r.starts_with('<'))
    {
        text = rest.trim_start();
        if text.starts_with('<') {
            let mut depth = 0usize;
            let mut cut = text.len();
            for (i, c) in text.char_indices() {
                match c {
                    '<' => depth += 1,
                    '>' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            cut = i + 1;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            text = text[cut..].trim_start();
        }
        if let Some((_, target)) = text.rsplit_once(" for ") {
            text = target.trim();
        }
    }

    let text = text.split('<').next().unwrap_or(text);
    let text = text.rsplit("::").next().unwrap_or(text).trim();
    let text = text.trim_start_matches('&').trim_start_matches("mut ").trim();

    (!text.is_empty()).then(|| text.to_string())
}

fn is_owner_kind(kind: SymbolKind) -> bool {
    matches!(
        kind,
        SymbolKind::STRUCT
            | SymbolKind::ENUM
            | SymbolKind::INTERFACE
            | SymbolKind::CLASS
            | SymbolKind::OBJECT
    )
}

/// Name of the innermost function containing `line`, prefixed by its
/// inline modules and owning type (`Foo::bar`).
///
/// Returns `None` when no function-kind record contains the line.
#[must_use]
pub fn enclosing_function(nodes: &[SymbolNode], line: u32) -> Option<String> {
    let path = innermost(nodes, line)?;
    let (function, ancestors) = path.split_last()?;

    let mut segments: Vec<String> = Vec::new();
    let mut has_owner = false;
    for ancestor in ancestors {
        if ancestor.kind == SymbolKind::MODULE || ancestor.kind == SymbolKind::NAMESPACE {
            segments.push(ancestor.name.clone());
        } else if is_owner_kind(ancestor.kind) {
            if let Some(owner) = owner_name(&ancestor.name) {
                segments.push(owner);
                has_owner = true;
            }
        }
    }

    if !has_owner {
        if let Some(owner) = function.container.as_deref().and_then(owner_name) {
            segments.push(owner);
        }
    }

    segments.push(function.name.clone());
    Some(segments.join("::"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;

    fn node(name: &str, kind: SymbolKind, lines: (u32, u32), children: Vec<SymbolNode>) -> SymbolNode {
        let range = Range::new(Position::new(lines.0, 0), Position::new(lines.1, 1));
        SymbolNode {
            name: name.to_string(),
            kind,
            range,
            selection_range: range,
            container: None,
            children,
        }
    }

    #[test]
    fn test_whole_function_body_resolves_to_function() {
        let tree = vec![
            node("Cli", SymbolKind::STRUCT, (10, 20), vec![]),
            node("parse_args", SymbolKind::FUNCTION, (99, 139), vec![]),
        ];
        for line in [99, 100, 120, 139] {
            assert_eq!(
                enclosing_function(&tree, line).as_deref(),
                Some("parse_args"),
                "line {line}"
            );
        }
    }

    #[test]
    fn test_module_level_line_is_none() {
        let tree = vec![
            node("CONST", SymbolKind::CONSTANT, (0, 0), vec![]),
            node("Cli", SymbolKind::STRUCT, (2, 8), vec![]),
            node("run", SymbolKind::FUNCTION, (10, 20), vec![]),
        ];
        assert_eq!(enclosing_function(&tree, 0), None);
        assert_eq!(enclosing_function(&tree, 5), None);
        assert_eq!(enclosing_function(&tree, 25), None);
    }

    #[test]
    fn test_child_beats_parent() {
        let tree = vec![node(
            "outer",
            SymbolKind::FUNCTION,
            (0, 50),
            vec![node("inner", SymbolKind::FUNCTION, (10, 20), vec![])],
        )];
        assert_eq!(enclosing_function(&tree, 15).as_deref(), Some("inner"));
        assert_eq!(enclosing_function(&tree, 30).as_deref(), Some("outer"));
    }

    #[test]
    fn test_impl_method_gets_type_prefix() {
        let tree = vec![
            node(
                "impl<T> fmt::Display for Wrapper<T>",
                SymbolKind::OBJECT,
                (0, 30),
                vec![node("fmt", SymbolKind::METHOD, (1, 10), vec![])],
            ),
            node(
                "Parser",
                SymbolKind::STRUCT,
                (40, 60),
                vec![node("new", SymbolKind::FUNCTION, (42, 45), vec![])],
            ),
        ];
        assert_eq!(enclosing_function(&tree, 5).as_deref(), Some("Wrapper::fmt"));
        assert_eq!(enclosing_function(&tree, 43).as_deref(), Some("Parser::new"));
    }

    #[test]
    fn test_inline_module_is_a_segment() {
        let tree = vec![node(
            "tests",
            SymbolKind::MODULE,
            (0, 40),
            vec![node("test_parse", SymbolKind::FUNCTION, (3, 9), vec![])],
        )];
        assert_eq!(enclosing_function(&tree, 4).as_deref(), Some("tests::test_parse"));
    }

    #[test]
    fn test_flat_container_used_as_owner() {
        let mut method = node("connect", SymbolKind::METHOD, (5, 9), vec![]);
        method.container = Some("impl Client".to_string());
        assert_eq!(
            enclosing_function(&[method], 6).as_deref(),
            Some("Client::connect")
        );
    }

    #[test]
    fn test_smallest_sibling_wins() {
        // Overlapping siblings, as produced by macro expansions.
        let tree = vec![
            node("wide", SymbolKind::FUNCTION, (0, 100), vec![]),
            node("narrow", SymbolKind::FUNCTION, (40, 60), vec![]),
        ];
        assert_eq!(enclosing_function(&tree, 50).as_deref(), Some("narrow"));
    }

    #[test]
    fn test_owner_name_forms() {
        assert_eq!(owner_name("impl Foo").as_deref(), Some("Foo"));
        assert_eq!(owner_name("impl<T: Clone> Foo<T>").as_deref(), Some("Foo"));
        assert_eq!(owner_name("impl Trait for Foo").as_deref(), Some("Foo"));
        assert_eq!(owner_name("impl From<u8> for crate::Bar").as_deref(), Some("Bar"));
        assert_eq!(owner_name("Baz").as_deref(), Some("Baz"));
        assert_eq!(owner_name("  "), None);
    }
}
