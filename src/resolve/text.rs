// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Identifier extraction from source lines.

use lsp_types::{Position, PositionEncodingKind, Range};

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Converts a position character offset into a byte offset within `line`.
///
/// Offsets past the end of the line clamp to its length.
#[must_use]
pub fn byte_offset(line: &str, character: u32, encoding: &PositionEncodingKind) -> usize {
    let target = character as usize;

    if *encoding == PositionEncodingKind::UTF8 {
        let mut offset = target.min(line.len());
        while !line.is_char_boundary(offset) {
            offset -= 1;
        }
        return offset;
    }

    let utf16 = *encoding == PositionEncodingKind::UTF16;
    let mut units = 0;
    for (byte, c) in line.char_indices() {
        if units >= target {
            return byte;
        }
        units += if utf16 { c.len_utf16() } else { 1 };
    }
    line.len()
}

/// Converts a byte offset within `line` back into a position character offset.
#[must_use]
pub fn character_offset(line: &str, byte: usize, encoding: &PositionEncodingKind) -> u32 {
    let prefix = line.get(..byte).unwrap_or(line);
    let units = if *encoding == PositionEncodingKind::UTF8 {
        prefix.len()
    } else if *encoding == PositionEncodingKind::UTF16 {
        prefix.encode_utf16().count()
    } else {
        prefix.chars().count()
    };
    u32::try_from(units).unwrap_or(u32::MAX)
}

/// Finds the first whole-word occurrence of `name` within `range`.
///
/// Servers differ on whether a symbol's location covers the name or the
/// whole declaration; this pins it to the name.
#[must_use]
pub fn find_identifier(
    text: &str,
    range: Range,
    name: &str,
    encoding: &PositionEncodingKind,
) -> Option<Position> {
    if name.is_empty() {
        return None;
    }
    let last = range.end.line.max(range.start.line);
    for (index, line) in text
        .lines()
        .enumerate()
        .skip(range.start.line as usize)
        .take((last - range.start.line) as usize + 1)
    {
        let from = if index == range.start.line as usize {
            byte_offset(line, range.start.character, encoding)
        } else {
            0
        };
        let mut search = from;
        while let Some(found) = line[search..].find(name) {
            let at = search + found;
            let end = at + name.len();
            let before = line[..at].chars().next_back().is_some_and(is_ident_char);
            let after = line[end..].chars().next().is_some_and(is_ident_char);
            if !before && !after {
                let line_number = u32::try_from(index).ok()?;
                return Some(Position::new(line_number, character_offset(line, at, encoding)));
            }
            search = end;
        }
    }
    None
}

/// Extracts the identifier covered by `range` on its start line.
///
/// The range is widened over identifier characters on both sides, so a
/// zero-width range inside a word yields the whole word. A range spanning
/// several lines is treated as starting and ending at its start.
#[must_use]
pub fn identifier_at(text: &str, range: Range, encoding: &PositionEncodingKind) -> Option<String> {
    let line = text.lines().nth(range.start.line as usize)?;

    let mut start = byte_offset(line, range.start.character, encoding);
    let mut end = if range.end.line == range.start.line {
        byte_offset(line, range.end.character, encoding).max(start)
    } else {
        start
    };

    while let Some(c) = line[..start].chars().next_back().filter(|c| is_ident_char(*c)) {
        start -= c.len_utf8();
    }
    while let Some(c) = line[end..].chars().next().filter(|c| is_ident_char(*c)) {
        end += c.len_utf8();
    }

    let word = line[start..end].trim();
    (!word.is_empty()).then(|| word.to_string())
}
