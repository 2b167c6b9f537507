// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock LSP server for testing.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. On `initialize` it indexes every `.rs` file under the workspace
//! root with a small line scanner, then answers definition, references,
//! implementation, document symbol and workspace symbol requests from that
//! index. CLI flags control response shapes, timing, and failure modes.
//! No tokio: deferred notifications use `std::thread`.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
#[allow(
    clippy::struct_excessive_bools,
    reason = "CLI flags are inherently boolean"
)]
struct Args {
    /// Emit progress begin/end after initialized (milliseconds).
    #[arg(long, default_value_t = 0)]
    indexing_delay: u64,

    /// Send `experimental/serverStatus` with `quiescent: true` after initialized.
    #[arg(long)]
    server_status: bool,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Answer documentSymbol with flat `SymbolInformation` lists.
    #[arg(long)]
    flat_symbols: bool,

    /// Answer definition with `LocationLink` arrays.
    #[arg(long)]
    definition_links: bool,

    /// Close stdout after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Send workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,
}

/// A JSON-RPC request.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create a writer that forwards to stdout.
fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// LSP `SymbolKind` values used by the scanner.
const KIND_MODULE: u32 = 2;
const KIND_METHOD: u32 = 6;
const KIND_ENUM: u32 = 10;
const KIND_INTERFACE: u32 = 11;
const KIND_FUNCTION: u32 = 12;
const KIND_CONSTANT: u32 = 14;
const KIND_OBJECT: u32 = 19;
const KIND_STRUCT: u32 = 23;

/// A single-line span: `(line, start, end)` in bytes.
type Span = (usize, usize, usize);

/// A declaration found by the scanner.
#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    kind: u32,
    /// First and last line of the declaration.
    lines: (usize, usize),
    /// Length of the last line, used as the end character.
    end_character: usize,
    /// Indentation of the first line.
    start_character: usize,
    /// The name (for impls: the self type).
    selection: Span,
    /// Trait name for `impl Trait for Type`.
    impl_trait: Option<String>,
    children: Vec<Symbol>,
}

/// One indexed source file.
#[derive(Debug)]
struct SourceFile {
    uri: String,
    content: String,
    symbols: Vec<Symbol>,
}

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    files: BTreeMap<PathBuf, SourceFile>,
    response_count: u64,
    writer: Writer,
    next_request_id: Arc<AtomicU64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            files: BTreeMap::new(),
            response_count: 0,
            writer,
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run the server, reading from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };

                self.handle_message(request);
            }
        }
    }

    fn handle_message(&mut self, request: Request) {
        // Responses to our own requests carry no method.
        let Some(method) = request.method.clone() else {
            return;
        };

        if request.id.is_some() {
            self.handle_request(&method, request);
        } else {
            self.handle_notification(&method);
        }
    }

    fn handle_request(&mut self, method: &str, request: Request) {
        let Some(id) = request.id else { return };

        // hang_on: never respond
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        // Response delay
        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        // fail_on: answer with `InternalError`
        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(RpcError {
                    code: -32603,
                    message: format!("mockls: configured to fail on {method}"),
                }),
            });
            return;
        }

        let result = match method {
            "initialize" => Some(self.handle_initialize(&request.params)),
            "shutdown" => Some(Value::Null),
            "textDocument/definition" => self.handle_definition(&request.params),
            "textDocument/references" => self.handle_references(&request.params),
            "textDocument/implementation" => self.handle_implementation(&request.params),
            "textDocument/documentSymbol" => self.handle_document_symbols(&request.params),
            "workspace/symbol" => Some(self.handle_workspace_symbols(&request.params)),
            _ => {
                self.send_response(&Response {
                    jsonrpc: "2.0".to_string(),
                    id,
                    result: None,
                    error: Some(RpcError {
                        code: -32601,
                        message: format!("mockls: method not found: {method}"),
                    }),
                });
                return;
            }
        };

        self.send_response(&Response {
            jsonrpc: "2.0".to_string(),
            id,
            // Missing entries answer `null`, as real servers do.
            result: Some(result.unwrap_or(Value::Null)),
            error: None,
        });

        if method == "initialize" && self.args.send_configuration_request {
            self.send_configuration_request();
        }
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "initialized" => {
                if self.args.indexing_delay > 0 {
                    self.start_indexing_simulation();
                }
                if self.args.server_status {
                    send_message(
                        &self.writer,
                        &serde_json::json!({
                            "jsonrpc": "2.0",
                            "method": "experimental/serverStatus",
                            "params": { "health": "ok", "quiescent": true }
                        }),
                    );
                }
            }
            "exit" => std::process::exit(0),
            _ => {}
        }
    }

    fn handle_initialize(&mut self, params: &Value) -> Value {
        let root = params
            .get("rootUri")
            .and_then(Value::as_str)
            .or_else(|| {
                params
                    .get("workspaceFolders")
                    .and_then(Value::as_array)
                    .and_then(|folders| folders.first())
                    .and_then(|f| f.get("uri"))
                    .and_then(Value::as_str)
            })
            .and_then(uri_to_path);

        if let Some(root) = root {
            self.index_workspace(&root);
        }

        let offers_utf8 = params
            .pointer("/capabilities/general/positionEncodings")
            .and_then(Value::as_array)
            .is_some_and(|encodings| encodings.iter().any(|e| e == "utf-8"));

        serde_json::json!({
            "capabilities": {
                "positionEncoding": if offers_utf8 { "utf-8" } else { "utf-16" },
                "definitionProvider": true,
                "referencesProvider": true,
                "implementationProvider": true,
                "documentSymbolProvider": true,
                "workspaceSymbolProvider": true
            },
            "serverInfo": { "name": "mockls" }
        })
    }

    fn index_workspace(&mut self, root: &Path) {
        let mut paths = Vec::new();
        collect_rust_files(root, &mut paths);
        paths.sort();

        for path in paths {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Some(uri) = path_to_uri(&path) else {
                continue;
            };
            let symbols = extract_symbols(&content);
            self.files.insert(
                path,
                SourceFile {
                    uri,
                    content,
                    symbols,
                },
            );
        }
    }

    fn file_for(&self, uri: &str) -> Option<&SourceFile> {
        self.files.get(&uri_to_path(uri)?)
    }

    /// Every declaration in the workspace, files in path order.
    fn all_symbols(&self) -> Vec<(&SourceFile, &Symbol, Option<&str>)> {
        let mut out = Vec::new();
        for file in self.files.values() {
            walk_symbols(&file.symbols, None, &mut |symbol, parent| {
                out.push((file, symbol, parent));
            });
        }
        out
    }

    fn handle_definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let file = self.file_for(uri)?;
        let word = extract_word(&file.content, line, col)?;

        // Prefer a declaration in the same file.
        let mut matches: Vec<(&SourceFile, &Symbol)> = self
            .all_symbols()
            .into_iter()
            .filter(|(_, s, _)| s.name == word && s.kind != KIND_OBJECT)
            .map(|(f, s, _)| (f, s))
            .collect();
        matches.sort_by_key(|(f, _)| f.uri != file.uri);
        let (target_file, symbol) = matches.first()?;

        if self.args.definition_links {
            let (l, s, e) = symbol.selection;
            return Some(serde_json::json!([{
                "originSelectionRange": range_json(line, col, line, col),
                "targetUri": target_file.uri,
                "targetRange": symbol_range_json(symbol),
                "targetSelectionRange": range_json(l, s, l, e),
            }]));
        }

        Some(span_location(&target_file.uri, symbol.selection))
    }

    fn handle_references(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let file = self.file_for(uri)?;
        let word = extract_word(&file.content, line, col)?;

        let include_declaration = params
            .pointer("/context/includeDeclaration")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let declarations: Vec<(&str, Span)> = self
            .all_symbols()
            .into_iter()
            .filter(|(_, s, _)| s.name == word)
            .map(|(f, s, _)| (f.uri.as_str(), s.selection))
            .collect();

        let mut locations = Vec::new();
        for source in self.files.values() {
            for (line_idx, line_text) in source.content.lines().enumerate() {
                if line_text.trim_start().starts_with("//") {
                    continue;
                }
                for start in word_occurrences(line_text, &word) {
                    let span = (line_idx, start, start + word.len());
                    let is_declaration = declarations
                        .iter()
                        .any(|(u, s)| *u == source.uri && *s == span);
                    if is_declaration && !include_declaration {
                        continue;
                    }
                    locations.push(span_location(&source.uri, span));
                }
            }
        }

        Some(Value::Array(locations))
    }

    fn handle_implementation(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let file = self.file_for(uri)?;
        let word = extract_word(&file.content, line, col)?;

        let locations: Vec<Value> = self
            .all_symbols()
            .into_iter()
            .filter(|(_, s, _)| s.impl_trait.as_deref() == Some(word.as_str()))
            .map(|(f, s, _)| span_location(&f.uri, s.selection))
            .collect();

        Some(Value::Array(locations))
    }

    fn handle_document_symbols(&self, params: &Value) -> Option<Value> {
        let uri = params
            .get("textDocument")
            .and_then(|td| td.get("uri"))
            .and_then(Value::as_str)?;
        let file = self.file_for(uri)?;

        if self.args.flat_symbols {
            let mut flat = Vec::new();
            walk_symbols(&file.symbols, None, &mut |symbol, parent| {
                flat.push(symbol_information_json(&file.uri, symbol, parent, false));
            });
            return Some(Value::Array(flat));
        }

        Some(Value::Array(
            file.symbols.iter().map(document_symbol_json).collect(),
        ))
    }

    fn handle_workspace_symbols(&self, params: &Value) -> Value {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();

        let symbols = self
            .all_symbols()
            .into_iter()
            .filter(|(_, s, _)| s.kind != KIND_OBJECT)
            .filter(|(_, s, _)| s.name.to_lowercase().contains(&query))
            .map(|(f, s, parent)| symbol_information_json(&f.uri, s, parent, true))
            .collect();

        Value::Array(symbols)
    }

    fn start_indexing_simulation(&self) {
        let delay = self.args.indexing_delay;
        let writer = self.writer.clone();
        let next_id = self.next_request_id.clone();

        std::thread::spawn(move || {
            let token = "mockls-indexing";

            let req_id = next_id.fetch_add(1, Ordering::SeqCst);
            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": req_id,
                    "method": "window/workDoneProgress/create",
                    "params": { "token": token }
                }),
            );

            std::thread::sleep(Duration::from_millis(50));

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "begin", "title": "Indexing", "percentage": 0 }
                    }
                }),
            );

            std::thread::sleep(Duration::from_millis(delay));

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "end", "message": "Indexing complete" }
                    }
                }),
            );
        });
    }

    fn send_configuration_request(&self) {
        let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        send_message(
            &self.writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "mockls" }] }
            }),
        );
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };

        write_framed(&self.writer, &json);

        self.response_count += 1;

        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

/// Recursively collects `.rs` files, skipping hidden directories and `target`.
fn collect_rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if !name.starts_with('.') && name != "target" {
                collect_rust_files(&path, out);
            }
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

fn path_to_uri(path: &Path) -> Option<String> {
    url::Url::from_file_path(path).ok().map(String::from)
}

fn uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri).ok()?.to_file_path().ok()
}

/// Visits symbols depth-first, passing each symbol's parent name.
fn walk_symbols<'a>(
    symbols: &'a [Symbol],
    parent: Option<&'a str>,
    visit: &mut dyn FnMut(&'a Symbol, Option<&'a str>),
) {
    for symbol in symbols {
        visit(symbol, parent);
        walk_symbols(&symbol.children, Some(&symbol.name), visit);
    }
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

fn range_json(start_line: usize, start: usize, end_line: usize, end: usize) -> Value {
    serde_json::json!({
        "start": { "line": start_line, "character": start },
        "end": { "line": end_line, "character": end }
    })
}

fn symbol_range_json(symbol: &Symbol) -> Value {
    range_json(
        symbol.lines.0,
        symbol.start_character,
        symbol.lines.1,
        symbol.end_character,
    )
}

/// Build a JSON `Location` object for a single-line span.
fn span_location(uri: &str, (line, start, end): Span) -> Value {
    serde_json::json!({
        "uri": uri,
        "range": range_json(line, start, line, end)
    })
}

fn document_symbol_json(symbol: &Symbol) -> Value {
    let (l, s, e) = symbol.selection;
    serde_json::json!({
        "name": symbol.name,
        "kind": symbol.kind,
        "range": symbol_range_json(symbol),
        "selectionRange": range_json(l, s, l, e),
        "children": symbol.children.iter().map(document_symbol_json).collect::<Vec<_>>(),
    })
}

/// `SymbolInformation`. Workspace results point at the name, document
/// results cover the whole declaration.
fn symbol_information_json(
    uri: &str,
    symbol: &Symbol,
    parent: Option<&str>,
    name_only: bool,
) -> Value {
    let location = if name_only {
        span_location(uri, symbol.selection)
    } else {
        serde_json::json!({ "uri": uri, "range": symbol_range_json(symbol) })
    };
    let mut info = serde_json::json!({
        "name": symbol.name,
        "kind": symbol.kind,
        "location": location,
    });
    if let (Some(parent), Some(obj)) = (parent, info.as_object_mut()) {
        obj.insert("containerName".to_string(), Value::String(parent.to_string()));
    }
    info
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offsets of whole-word occurrences of `word` in `line`.
fn word_occurrences(line: &str, word: &str) -> Vec<usize> {
    let bytes = line.as_bytes();
    let mut found = Vec::new();
    let mut start = 0;
    while let Some(pos) = line[start..].find(word) {
        let at = start + pos;
        let end = at + word.len();
        let before = at > 0 && is_word_char(bytes[at - 1]);
        let after = end < bytes.len() && is_word_char(bytes[end]);
        if !before && !after {
            found.push(at);
        }
        start = end;
    }
    found
}

/// Strips visibility and qualifiers in front of a declaration keyword.
fn strip_modifiers(mut rest: &str) -> &str {
    if let Some(after) = rest.strip_prefix("pub(") {
        rest = after.split_once(')').map_or(after, |(_, tail)| tail).trim_start();
    } else if let Some(after) = rest.strip_prefix("pub ") {
        rest = after.trim_start();
    }
    loop {
        let before = rest;
        for qualifier in ["async ", "unsafe ", "extern \"C\" ", "default "] {
            if let Some(after) = rest.strip_prefix(qualifier) {
                rest = after.trim_start();
            }
        }
        if let Some(after) = rest.strip_prefix("const fn ") {
            rest = &rest[rest.len() - after.len() - "fn ".len()..];
        }
        if before.len() == rest.len() {
            return rest;
        }
    }
}

/// Recognizes a declaration on one line.
///
/// Returns the symbol with a one-line range; [`extract_symbols`] widens it to
/// the end of the item's block.
fn parse_declaration(line_idx: usize, line_text: &str) -> Option<Symbol> {
    let trimmed = line_text.trim_start();
    if trimmed.starts_with("//") {
        return None;
    }
    let indent = line_text.len() - trimmed.len();
    let rest = strip_modifiers(trimmed);

    if let Some(after) = rest
        .strip_prefix("impl")
        .filter(|r| r.starts_with(' ') || r.starts_with('<'))
    {
        return parse_impl(line_idx, line_text, indent, after);
    }

    let (kind, after) = [
        ("fn ", KIND_FUNCTION),
        ("struct ", KIND_STRUCT),
        ("enum ", KIND_ENUM),
        ("trait ", KIND_INTERFACE),
        ("mod ", KIND_MODULE),
        ("const ", KIND_CONSTANT),
    ]
    .into_iter()
    .find_map(|(keyword, kind)| rest.strip_prefix(keyword).map(|after| (kind, after)))?;

    // `mod foo;` declares a file module, not an inline one.
    if kind == KIND_MODULE && !after.contains('{') {
        return None;
    }

    let name: String = after
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    let name_col = line_text.len() - after.len();

    Some(Symbol {
        selection: (line_idx, name_col, name_col + name.len()),
        name,
        kind,
        lines: (line_idx, line_idx),
        end_character: line_text.len(),
        start_character: indent,
        impl_trait: None,
        children: Vec::new(),
    })
}

fn parse_impl(line_idx: usize, line_text: &str, indent: usize, after: &str) -> Option<Symbol> {
    let header_text = after.split('{').next().unwrap_or(after);

    // Skip `<...>` generics directly after `impl`.
    let mut tail = header_text.trim_start();
    if tail.starts_with('<') {
        let mut depth = 0usize;
        let mut cut = tail.len();
        for (i, c) in tail.char_indices() {
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
        tail = tail[cut..].trim_start();
    }

    let (impl_trait, self_ty) = match tail.rsplit_once(" for ") {
        Some((trait_part, self_part)) => {
            let trait_name = last_path_ident(trait_part);
            (trait_name, self_part.trim_start())
        }
        None => (None, tail),
    };

    let self_name = last_path_ident(self_ty)?;
    let offset_in_tail = self_ty.find(&self_name)?;
    let self_col = line_text.len() - after.len()
        + (header_text.len() - header_text.trim_start().len())
        + (header_text.trim_start().len() - tail.len())
        + (tail.len() - self_ty.len())
        + offset_in_tail;

    let header = format!("impl{}", header_text.trim_end());

    Some(Symbol {
        name: header.trim().to_string(),
        kind: KIND_OBJECT,
        lines: (line_idx, line_idx),
        end_character: line_text.len(),
        start_character: indent,
        selection: (line_idx, self_col, self_col + self_name.len()),
        impl_trait,
        children: Vec::new(),
    })
}

/// `crate::fmt::Display<T>` gives `Display`.
fn last_path_ident(text: &str) -> Option<String> {
    let path = text.trim().split('<').next().unwrap_or("");
    let last = path.rsplit("::").next().unwrap_or(path).trim();
    let ident: String = last
        .trim_start_matches('&')
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!ident.is_empty()).then_some(ident)
}

/// Last line of the item starting on `start`: the line closing its block,
/// or the line of a terminating `;` when the item has no block.
fn item_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i64;
    let mut nesting = 0i64;
    let mut opened = false;

    for (idx, line) in lines.iter().enumerate().skip(start) {
        for c in line.chars() {
            match c {
                '(' | '[' => nesting += 1,
                ')' | ']' => nesting -= 1,
                ';' if !opened && nesting == 0 => return idx,
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => {
                    depth -= 1;
                    if opened && depth == 0 {
                        return idx;
                    }
                }
                _ => {}
            }
        }
    }
    lines.len().saturating_sub(1)
}

/// Extract declarations from content as a nested tree.
fn extract_symbols(content: &str) -> Vec<Symbol> {
    let lines: Vec<&str> = content.lines().collect();

    let mut flat = Vec::new();
    for (line_idx, line_text) in lines.iter().enumerate() {
        if let Some(mut symbol) = parse_declaration(line_idx, line_text) {
            let end = item_end(&lines, line_idx);
            symbol.lines.1 = end;
            symbol.end_character = lines.get(end).map_or(0, |l| l.len());
            flat.push(symbol);
        }
    }

    let mut roots = Vec::new();
    let mut stack: Vec<Symbol> = Vec::new();
    for symbol in flat {
        while stack
            .last()
            .is_some_and(|top| top.lines.1 < symbol.lines.0)
        {
            if let Some(done) = stack.pop() {
                attach(done, &mut stack, &mut roots);
            }
        }
        stack.push(symbol);
    }
    while let Some(done) = stack.pop() {
        attach(done, &mut stack, &mut roots);
    }
    roots
}

fn attach(mut symbol: Symbol, stack: &mut [Symbol], roots: &mut Vec<Symbol>) {
    match stack.last_mut() {
        Some(parent) => {
            if symbol.kind == KIND_FUNCTION
                && (parent.kind == KIND_OBJECT || parent.kind == KIND_INTERFACE)
            {
                symbol.kind = KIND_METHOD;
            }
            parent.children.push(symbol);
        }
        None => roots.push(symbol),
    }
}

fn main() {
    let args = Args::parse();
    let writer = stdout_writer();
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LIB_RS: &str = "\
pub trait Greeter {
    fn greet(&self) -> String;
}

pub struct English;

impl Greeter for English {
    fn greet(&self) -> String {
        helper()
    }
}

fn helper() -> String {
    String::from(\"hi\")
}

mod inner {
    pub fn nested() {}
}
";

    fn default_args() -> Args {
        Args {
            indexing_delay: 0,
            server_status: false,
            response_delay: 0,
            flat_symbols: false,
            definition_links: false,
            drop_after: None,
            hang_on: vec![],
            fail_on: vec![],
            send_configuration_request: false,
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn run_server_wait(args: Args, input: &[u8], wait_ms: u64) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        std::thread::sleep(Duration::from_millis(wait_ms));
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    /// A temp workspace with `crates/demo/src/lib.rs`.
    fn fixture() -> (tempfile::TempDir, String, String) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let src = root.join("crates/demo/src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("lib.rs"), LIB_RS).unwrap();
        let root_uri = path_to_uri(&root).unwrap();
        let file_uri = path_to_uri(&src.join("lib.rs")).unwrap();
        (dir, root_uri, file_uri)
    }

    fn initialize_request(id: u64, root_uri: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "processId": null,
                "capabilities": { "general": { "positionEncodings": ["utf-8", "utf-16"] } },
                "rootUri": root_uri
            }
        })
        .to_string()
    }

    fn position_request(id: u64, method: &str, uri: &str, line: u64, character: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": {
                "textDocument": { "uri": uri },
                "position": { "line": line, "character": character },
                "context": { "includeDeclaration": false }
            }
        })
        .to_string()
    }

    fn request(id: u64, method: &str, params: &Value) -> String {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
            .to_string()
    }

    fn response_for(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m["id"] == id && m.get("method").is_none())
            .expect("response present")
    }

    #[test]
    fn test_initialize_negotiates_utf8() {
        let (_dir, root, _) = fixture();
        let messages = run_server_with(default_args(), &frame(&initialize_request(1, &root)));
        let caps = &messages[0]["result"]["capabilities"];
        assert_eq!(caps["positionEncoding"], "utf-8");
        assert_eq!(caps["implementationProvider"], true);
    }

    #[test]
    fn test_symbol_tree_shape() {
        let symbols = extract_symbols(LIB_RS);
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Greeter", "English", "impl Greeter for English", "helper", "inner"]
        );

        let greeter = &symbols[0];
        assert_eq!(greeter.lines, (0, 2));
        assert_eq!(greeter.children[0].kind, KIND_METHOD);

        let english = &symbols[1];
        assert_eq!(english.lines, (4, 4));

        let imp = &symbols[2];
        assert_eq!(imp.lines, (6, 10));
        assert_eq!(imp.impl_trait.as_deref(), Some("Greeter"));
        assert_eq!(imp.selection, (6, 17, 24));
        assert_eq!(imp.children[0].name, "greet");
        assert_eq!(imp.children[0].lines, (7, 9));

        assert_eq!(symbols[3].kind, KIND_FUNCTION);
        assert_eq!(symbols[3].lines, (12, 14));
        assert_eq!(symbols[4].children[0].name, "nested");
    }

    #[test]
    fn test_definition_is_scalar_location() {
        let (_dir, root, file) = fixture();
        let mut input = frame(&initialize_request(1, &root));
        // `helper()` call inside greet.
        input.extend(frame(&position_request(2, "textDocument/definition", &file, 8, 9)));

        let messages = run_server_with(default_args(), &input);
        let result = &response_for(&messages, 2)["result"];
        assert_eq!(result["uri"], file.as_str());
        assert_eq!(result["range"]["start"]["line"], 12);
        assert_eq!(result["range"]["start"]["character"], 3);
    }

    #[test]
    fn test_definition_links() {
        let (_dir, root, file) = fixture();
        let mut args = default_args();
        args.definition_links = true;
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&position_request(2, "textDocument/definition", &file, 8, 9)));

        let messages = run_server_with(args, &input);
        let result = &response_for(&messages, 2)["result"];
        assert_eq!(result[0]["targetSelectionRange"]["start"]["line"], 12);
        assert_eq!(result[0]["targetRange"]["end"]["line"], 14);
    }

    #[test]
    fn test_references_exclude_declaration() {
        let (_dir, root, file) = fixture();
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&position_request(2, "textDocument/references", &file, 12, 4)));

        let messages = run_server_with(default_args(), &input);
        let result = response_for(&messages, 2)["result"].as_array().unwrap().clone();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["range"]["start"]["line"], 8);
    }

    #[test]
    fn test_implementation_points_at_self_type() {
        let (_dir, root, file) = fixture();
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&position_request(
            2,
            "textDocument/implementation",
            &file,
            0,
            11,
        )));

        let messages = run_server_with(default_args(), &input);
        let result = &response_for(&messages, 2)["result"];
        assert_eq!(result[0]["range"]["start"]["line"], 6);
        assert_eq!(result[0]["range"]["start"]["character"], 17);
    }

    #[test]
    fn test_flat_document_symbols_carry_container() {
        let (_dir, root, file) = fixture();
        let mut args = default_args();
        args.flat_symbols = true;
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&request(
            2,
            "textDocument/documentSymbol",
            &serde_json::json!({ "textDocument": { "uri": file } }),
        )));

        let messages = run_server_with(args, &input);
        let result = response_for(&messages, 2)["result"].as_array().unwrap().clone();
        let greet = result
            .iter()
            .find(|s| s["name"] == "greet" && s["location"]["range"]["start"]["line"] == 7)
            .expect("greet method");
        assert_eq!(greet["containerName"], "impl Greeter for English");
        assert_eq!(greet["location"]["range"]["end"]["line"], 9);
    }

    #[test]
    fn test_workspace_symbol_substring_match() {
        let (_dir, root, _) = fixture();
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&request(
            2,
            "workspace/symbol",
            &serde_json::json!({ "query": "help" }),
        )));

        let messages = run_server_with(default_args(), &input);
        let result = response_for(&messages, 2)["result"].as_array().unwrap().clone();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["name"], "helper");
        assert_eq!(result[0]["location"]["range"]["start"]["character"], 3);
    }

    #[test]
    fn test_unknown_document_is_null() {
        let (_dir, root, _) = fixture();
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&request(
            2,
            "textDocument/documentSymbol",
            &serde_json::json!({ "textDocument": { "uri": "file:///nowhere.rs" } }),
        )));

        let messages = run_server_with(default_args(), &input);
        assert_eq!(response_for(&messages, 2)["result"], Value::Null);
    }

    #[test]
    fn test_fail_on_returns_internal_error() {
        let (_dir, root, _) = fixture();
        let mut args = default_args();
        args.fail_on = vec!["workspace/symbol".to_string()];
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&request(
            2,
            "workspace/symbol",
            &serde_json::json!({ "query": "x" }),
        )));

        let messages = run_server_with(args, &input);
        assert_eq!(response_for(&messages, 2)["error"]["code"], -32603);
    }

    #[test]
    fn test_progress_sequence() {
        let mut args = default_args();
        args.indexing_delay = 100;

        let initialized = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialized",
            "params": {}
        })
        .to_string();

        let (_dir, root, _) = fixture();
        let mut input = frame(&initialize_request(1, &root));
        input.extend(frame(&initialized));

        let messages = run_server_wait(args, &input, 250);

        let has_create = messages.iter().any(|m| {
            m.get("method").and_then(Value::as_str) == Some("window/workDoneProgress/create")
        });
        assert!(
            has_create,
            "Expected workDoneProgress/create. Got: {messages:?}"
        );

        let has_end = messages.iter().any(|m| {
            m.get("method").and_then(Value::as_str) == Some("$/progress")
                && m["params"]["value"]["kind"] == "end"
        });
        assert!(has_end, "Expected $/progress end. Got: {messages:?}");
    }

    #[test]
    fn test_request_id_echo() {
        let (_dir, root, _) = fixture();
        let init = initialize_request(42, &root);
        let symbols = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "string-id",
            "method": "workspace/symbol",
            "params": { "query": "" }
        })
        .to_string();

        let mut input = frame(&init);
        input.extend(frame(&symbols));

        let messages = run_server_with(default_args(), &input);

        assert_eq!(messages[0]["id"], 42, "Init should echo numeric id");
        assert!(
            messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_str) == Some("string-id")),
            "Should echo string id"
        );
    }

    #[test]
    fn test_strip_modifiers() {
        assert_eq!(strip_modifiers("pub(crate) async fn x()"), "fn x()");
        assert_eq!(strip_modifiers("pub const fn y()"), "fn y()");
        assert_eq!(strip_modifiers("pub const MAX: u32 = 1;"), "const MAX: u32 = 1;");
        assert_eq!(strip_modifiers("unsafe impl Send for T {}"), "impl Send for T {}");
    }

    #[test]
    fn test_word_occurrences_are_whole_words() {
        assert_eq!(word_occurrences("helper(); helpers; my_helper", "helper"), vec![0]);
    }
}
