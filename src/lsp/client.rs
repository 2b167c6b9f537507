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
use lsp_types::{
    ClientCapabilities, DocumentSymbolClientCapabilities, DocumentSymbolParams,
    DocumentSymbolResponse, DynamicRegistrationClientCapabilities, GotoCapability,
    GotoDefinitionParams, GotoDefinitionResponse, InitializeParams, InitializeResult,
    InitializedParams, Location, Position, PositionEncodingKind, ProgressParams,
    ReferenceContext, ReferenceParams, TextDocumentClientCapabilities, TextDocumentIdentifier,
    TextDocumentPositionParams, Uri, WindowClientCapabilities, WorkspaceClientCapabilities,
    WorkspaceFolder, WorkspaceSymbolClientCapabilities, WorkspaceSymbolParams,
    WorkspaceSymbolResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use super::protocol::{
    self, FrameReader, NotificationMessage, RequestId, RequestMessage, ResponseError,
    ResponseMessage,
};
use super::state::{ProgressTracker, ServerState, ServerStatusParams};
use crate::config::{ServerConfig, Timeouts};
use crate::error::LspError;
use crate::resolve::path_to_uri;

/// Write half of the server connection. Frames are written whole under the lock.
type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Events consumed by the dispatcher task.
enum DispatchEvent {
    /// A request was sent; its response goes to `reply`.
    Register {
        id: RequestId,
        reply: oneshot::Sender<ResponseMessage>,
    },
    /// The caller stopped waiting; a later reply for `id` is dropped.
    Abandon(RequestId),
    /// A decoded inbound message.
    Inbound(serde_json::Value),
    /// The stream is unusable: end of stream, a bad frame, or a failed write.
    StreamClosed,
}

/// Abandons a registered request unless its response was taken.
///
/// Covers timeouts and callers that drop the request future early.
struct PendingGuard<'a> {
    events: &'a mpsc::UnboundedSender<DispatchEvent>,
    id: Option<RequestId>,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.events.send(DispatchEvent::Abandon(id));
        }
    }
}

/// A session with one language server process.
pub struct LspClient {
    next_id: AtomicI64,
    writer: Writer,
    events: mpsc::UnboundedSender<DispatchEvent>,
    state: watch::Receiver<ServerState>,
    alive: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    encoding: PositionEncodingKind,
    timeouts: Timeouts,
    child: Option<Child>,
    _reader_handle: tokio::task::JoinHandle<()>,
    _dispatch_handle: tokio::task::JoinHandle<()>,
}

impl LspClient {
    /// Spawns the configured server process and connects to its stdio.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub fn spawn(server: &ServerConfig, cwd: &Path, timeouts: Timeouts) -> Result<Self> {
        debug!(
            "Spawning LSP server: {} {}",
            server.command,
            server.args.join(" ")
        );

        let mut child = Command::new(&server.command)
            .args(&server.args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn LSP server: {}", server.command))?;

        let stdin = child.stdin.take().context("stdin not captured")?;
        let stdout = child.stdout.take().context("stdout not captured")?;

        Ok(Self::connect(stdout, stdin, Some(child), timeouts))
    }

    /// Starts the reader and dispatcher tasks over an existing transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<R, W>(reader: R, writer: W, child: Option<Child>, timeouts: Timeouts) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer: Writer = Arc::new(Mutex::new(Box::new(writer)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ServerState::Initializing);
        let alive = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let reader_handle = tokio::spawn(Self::reader_task(
            FrameReader::new(reader),
            events_tx.clone(),
            alive.clone(),
        ));
        let dispatch_handle = tokio::spawn(Self::dispatch_task(
            events_rx,
            writer.clone(),
            state_tx,
            in_flight.clone(),
        ));

        Self {
            next_id: AtomicI64::new(1),
            writer,
            events: events_tx,
            state: state_rx,
            alive,
            in_flight,
            encoding: PositionEncodingKind::UTF16,
            timeouts,
            child,
            _reader_handle: reader_handle,
            _dispatch_handle: dispatch_handle,
        }
    }

    /// Decodes frames and forwards them to the dispatcher.
    ///
    /// Exits on end of stream, a framing error or a body that is not JSON,
    /// after which pending requests fail with [`LspError::Closed`].
    async fn reader_task<R: AsyncRead + Unpin>(
        mut frames: FrameReader<R>,
        events: mpsc::UnboundedSender<DispatchEvent>,
        alive: Arc<AtomicBool>,
    ) {
        loop {
            match frames.next_frame().await {
                Ok(Some(message_str)) => {
                    trace!("Received LSP message: {}", message_str);
                    match serde_json::from_str::<serde_json::Value>(&message_str) {
                        Ok(value) => {
                            if events.send(DispatchEvent::Inbound(value)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("LSP frame is not JSON, stopping reader: {}", e);
                            break;
                        }
                    }
                }
                Ok(None) => {
                    debug!("LSP stdout closed");
                    break;
                }
                Err(e) => {
                    debug!("LSP reader stopped: {}", e);
                    break;
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        let _ = events.send(DispatchEvent::StreamClosed);
    }

    /// Owns the pending-request map and routes every inbound message.
    async fn dispatch_task(
        mut events: mpsc::UnboundedReceiver<DispatchEvent>,
        writer: Writer,
        state: watch::Sender<ServerState>,
        in_flight: Arc<AtomicUsize>,
    ) {
        let mut pending: HashMap<RequestId, oneshot::Sender<ResponseMessage>> = HashMap::new();
        let mut progress = ProgressTracker::new();
        let mut closed = false;

        while let Some(event) = events.recv().await {
            match event {
                // Dropping the reply sender fails the caller with `Closed`.
                DispatchEvent::Register { id, reply } => {
                    if !closed {
                        pending.insert(id, reply);
                    }
                }
                DispatchEvent::Abandon(id) => {
                    if pending.remove(&id).is_some() {
                        trace!("Abandoned LSP request {}", id);
                    }
                }
                DispatchEvent::StreamClosed => {
                    closed = true;
                    if !pending.is_empty() {
                        debug!("Failing {} pending requests", pending.len());
                    }
                    pending.clear();
                    state.send_replace(ServerState::Dead);
                }
                DispatchEvent::Inbound(value) => {
                    if value.get("method").is_some() {
                        if value.get("id").is_some() {
                            Self::answer_server_request(&writer, value).await;
                        } else if let Ok(notification) =
                            serde_json::from_value::<NotificationMessage>(value)
                        {
                            Self::handle_notification(&notification, &mut progress);
                            state.send_if_modified(|current| {
                                let next = progress.state();
                                let changed = *current != next && *current != ServerState::Dead;
                                if changed {
                                    *current = next;
                                }
                                changed
                            });
                        }
                    } else if value.get("id").is_some() {
                        match serde_json::from_value::<ResponseMessage>(value) {
                            Ok(response) => {
                                let sender = response.id.as_ref().and_then(|id| pending.remove(id));
                                if let Some(sender) = sender {
                                    let _ = sender.send(response);
                                } else {
                                    trace!(
                                        "Dropping response for unknown or abandoned request {:?}",
                                        response.id
                                    );
                                }
                            }
                            Err(e) => warn!("Malformed LSP response: {}", e),
                        }
                    } else {
                        warn!("Unknown message format: {}", value);
                    }
                }
            }
            in_flight.store(pending.len(), Ordering::SeqCst);
        }
    }

    /// Answers a server-initiated request so the server never blocks on us.
    async fn answer_server_request(writer: &Writer, value: serde_json::Value) {
        let Ok(request) = serde_json::from_value::<RequestMessage>(value) else {
            warn!("Malformed server request");
            return;
        };
        debug!(
            "Received server request: {} (id: {})",
            request.method, request.id
        );

        let (result, error) = match request.method.as_str() {
            "window/workDoneProgress/create" | "client/registerCapability" => {
                (Some(serde_json::Value::Null), None)
            }
            "workspace/configuration" => {
                let items = request
                    .params
                    .get("items")
                    .and_then(serde_json::Value::as_array)
                    .map_or(0, Vec::len);
                (Some(serde_json::Value::Array(vec![serde_json::Value::Null; items])), None)
            }
            method => (
                None,
                Some(ResponseError {
                    code: -32601, // MethodNotFound
                    message: format!("Method '{method}' not supported by client"),
                    data: None,
                }),
            ),
        };

        let response = ResponseMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(request.id),
            result,
            error,
        };

        match protocol::encode_frame(&response) {
            Ok(frame) => {
                if let Err(e) = write_frame(writer, &frame).await {
                    warn!("Failed to answer server request: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode server response: {}", e),
        }
    }

    /// Handles incoming LSP notifications. Anything not listed is discarded.
    fn handle_notification(notification: &NotificationMessage, progress: &mut ProgressTracker) {
        match notification.method.as_str() {
            "$/progress" => {
                if let Ok(params) =
                    serde_json::from_value::<ProgressParams>(notification.params.clone())
                {
                    progress.update(&params);
                }
            }
            "experimental/serverStatus" => {
                if let Ok(status) =
                    serde_json::from_value::<ServerStatusParams>(notification.params.clone())
                {
                    debug!(
                        "Server status: health={} quiescent={}",
                        status.health, status.quiescent
                    );
                    progress.update_status(&status);
                }
            }
            "window/logMessage" | "window/showMessage" => {
                if let Some(message) = notification.params.get("message").and_then(|m| m.as_str()) {
                    debug!("LSP server message: {}", message);
                }
            }
            _ => {
                trace!("Ignoring notification: {}", notification.method);
            }
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// Requests may be pipelined: correlation is by id only.
    ///
    /// # Errors
    ///
    /// - [`LspError::Timeout`] if no response arrives within `timeout`.
    /// - [`LspError::Protocol`] if the server returns an error object.
    /// - [`LspError::Closed`] or [`LspError::Io`] if the connection is gone;
    ///   the session is then marked dead.
    /// - [`LspError::Json`] if the result does not match `R`.
    pub async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R, LspError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));

        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        let frame = protocol::encode_frame(&request)?;

        let (tx, rx) = oneshot::channel();
        self.events
            .send(DispatchEvent::Register {
                id: id.clone(),
                reply: tx,
            })
            .map_err(|_| LspError::Closed)?;
        let mut guard = PendingGuard {
            events: &self.events,
            id: Some(id.clone()),
        };

        trace!("Sending LSP request {} ({})", id, method);
        self.send_frame(&frame).await?;

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(LspError::Closed),
            Err(_) => {
                return Err(LspError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                });
            }
        };
        guard.disarm();

        if let Some(error) = response.error {
            return Err(LspError::Protocol {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        // Handle null/missing result - use JSON null as default
        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), LspError> {
        let notification = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        let frame = protocol::encode_frame(&notification)?;
        self.send_frame(&frame).await
    }

    /// Writes one frame. A failed write means the server's stdin is gone,
    /// so the session is marked dead without waiting for the reader.
    async fn send_frame(&self, frame: &[u8]) -> Result<(), LspError> {
        let result = write_frame(&self.writer, frame).await;
        if let Err(e) = &result {
            debug!("LSP write failed: {}", e);
            self.alive.store(false, Ordering::SeqCst);
            let _ = self.events.send(DispatchEvent::StreamClosed);
        }
        result
    }

    /// Performs the LSP initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be expressed as a URI or the
    /// handshake request fails.
    pub async fn initialize(
        &mut self,
        root: &Path,
        initialization_options: Option<serde_json::Value>,
    ) -> Result<InitializeResult> {
        let root_uri = path_to_uri(root)?;

        #[allow(deprecated, reason = "some servers still only read rootUri")]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            initialization_options,
            capabilities: client_capabilities(),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "workspace".to_string()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self
            .request("initialize", params, self.timeouts.initialize())
            .await
            .context("LSP initialize failed")?;

        // Extract negotiated encoding
        if let Some(encoding) = &result.capabilities.position_encoding {
            self.encoding = encoding.clone();
            debug!("Negotiated position encoding: {:?}", self.encoding);
        } else {
            debug!("Server did not specify position encoding, defaulting to UTF-16");
            self.encoding = PositionEncodingKind::UTF16;
        }

        self.notify("initialized", InitializedParams {}).await?;

        Ok(result)
    }

    /// Waits until the server reports it has finished indexing.
    ///
    /// Returns the state reached. Hitting `limit` is not an error: servers
    /// that never report progress are treated as ready afterwards.
    pub async fn wait_until_ready(&self, limit: Duration) -> ServerState {
        let mut state = self.state.clone();
        let settled = tokio::time::timeout(
            limit,
            state.wait_for(|s| matches!(s, ServerState::Ready | ServerState::Dead)),
        )
        .await;

        match settled {
            Ok(Ok(reached)) => *reached,
            Ok(Err(_)) => ServerState::Dead,
            Err(_) => {
                let current = *self.state.borrow();
                debug!(
                    "Server still {:?} after {:?}, proceeding",
                    current, limit
                );
                current
            }
        }
    }

    /// Returns the negotiated position encoding.
    #[must_use]
    pub fn encoding(&self) -> PositionEncodingKind {
        self.encoding.clone()
    }

    /// Returns the configured timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Returns the last known readiness state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        if self.is_alive() {
            *self.state.borrow()
        } else {
            ServerState::Dead
        }
    }

    /// Returns true if the LSP server connection is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Number of requests still registered with the dispatcher.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Terminates the server process: SIGTERM, then kill after `grace`.
    ///
    /// There is no protocol-level shutdown handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), LspError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        terminate(&child).await;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("LSP server exited: {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(LspError::Io(e)),
            Err(_) => {
                warn!("LSP server ignored terminate for {:?}, killing", grace);
                child.kill().await?;
                Ok(())
            }
        }
    }

    /// Gets the definition location for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn definition(&self, uri: &Uri, position: Position) -> Result<Vec<Location>, LspError> {
        let params = GotoDefinitionParams {
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        let response: Option<GotoDefinitionResponse> = self
            .request("textDocument/definition", params, self.timeouts.request())
            .await?;
        Ok(response.map(locations_from_goto).unwrap_or_default())
    }

    /// Gets implementation locations for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn implementation(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Vec<Location>, LspError> {
        let params = GotoDefinitionParams {
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        let response: Option<GotoDefinitionResponse> = self
            .request("textDocument/implementation", params, self.timeouts.request())
            .await?;
        Ok(response.map(locations_from_goto).unwrap_or_default())
    }

    /// Gets all references to a symbol, excluding its declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn references(&self, uri: &Uri, position: Position) -> Result<Vec<Location>, LspError> {
        let params = ReferenceParams {
            text_document_position: position_params(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: ReferenceContext {
                include_declaration: false,
            },
        };
        let response: Option<Vec<Location>> = self
            .request("textDocument/references", params, self.timeouts.request())
            .await?;
        Ok(response.unwrap_or_default())
    }

    /// Gets document symbols (outline) for a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn document_symbols(
        &self,
        uri: &Uri,
    ) -> Result<Option<DocumentSymbolResponse>, LspError> {
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("textDocument/documentSymbol", params, self.timeouts.request())
            .await
    }

    /// Searches for symbols across the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn workspace_symbols(
        &self,
        query: &str,
    ) -> Result<Option<WorkspaceSymbolResponse>, LspError> {
        let params = WorkspaceSymbolParams {
            query: query.to_string(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.request("workspace/symbol", params, self.timeouts.workspace_symbol())
            .await
    }
}

/// Writes one complete frame while holding the writer lock.
async fn write_frame(writer: &Writer, frame: &[u8]) -> Result<(), LspError> {
    let mut writer = writer.lock().await;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(unix)]
async fn terminate(child: &Child) {
    // `unsafe_code` is forbidden, which rules out `libc::kill`.
    if let Some(pid) = child.id() {
        let status = Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            debug!("Failed to send SIGTERM to {}: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
async fn terminate(_child: &Child) {}

fn position_params(uri: &Uri, position: Position) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position,
    }
}

/// Normalizes the three goto response shapes into a location list.
///
/// Links resolve to their target selection range, which covers the name.
#[must_use]
pub fn locations_from_goto(response: GotoDefinitionResponse) -> Vec<Location> {
    match response {
        GotoDefinitionResponse::Scalar(location) => vec![location],
        GotoDefinitionResponse::Array(locations) => locations,
        GotoDefinitionResponse::Link(links) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    }
}

/// Capabilities for the five methods ground-truth extraction uses.
fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        general: Some(lsp_types::GeneralClientCapabilities {
            position_encodings: Some(vec![
                PositionEncodingKind::UTF8,
                PositionEncodingKind::UTF16,
            ]),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            references: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            implementation: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(true),
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(true),
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                dynamic_registration: Some(false),
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            symbol: Some(WorkspaceSymbolClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        experimental: Some(serde_json::json!({ "serverStatusNotification": true })),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// The far end of an in-memory connection, driven by each test.
    struct FakeServer {
        frames: FrameReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            let frame = self.frames.next_frame().await.unwrap().unwrap();
            serde_json::from_str(&frame).unwrap()
        }

        async fn send(&mut self, value: Value) {
            let frame = protocol::encode_frame(&value).unwrap();
            self.writer.write_all(&frame).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn reply(&mut self, id: &Value, result: Value) {
            self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
                .await;
        }
    }

    fn test_timeouts() -> Timeouts {
        Timeouts {
            request_ms: 2_000,
            initialize_ms: 2_000,
            workspace_symbol_ms: 2_000,
            index_wait_ms: 200,
            shutdown_grace_ms: 200,
        }
    }

    fn pair() -> (LspClient, FakeServer) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_end);
        let (server_read, server_write) = tokio::io::split(server_end);

        let client = LspClient::connect(client_read, client_write, None, test_timeouts());
        let server = FakeServer {
            frames: FrameReader::new(server_read),
            writer: server_write,
        };
        (client, server)
    }

    #[tokio::test]
    async fn test_pipelined_requests_correlate_by_id() {
        let (client, mut server) = pair();
        let timeout = Duration::from_secs(2);

        let first = client.request::<_, Value>("test/first", json!({}), timeout);
        let second = client.request::<_, Value>("test/second", json!({}), timeout);

        let script = async {
            let a = server.recv().await;
            let b = server.recv().await;
            // Answer in reverse order, echoing each method.
            server.reply(&b["id"], b["method"].clone()).await;
            server.reply(&a["id"], a["method"].clone()).await;
            (a["id"].as_i64().unwrap(), b["id"].as_i64().unwrap())
        };

        let (r1, r2, (id_a, id_b)) = tokio::join!(first, second, script);
        assert_eq!(r1.unwrap(), json!("test/first"));
        assert_eq!(r2.unwrap(), json!("test/second"));
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let (client, mut server) = pair();
        let mut seen = Vec::new();

        for _ in 0..3 {
            let request = client.request::<_, Value>("test/echo", json!({}), Duration::from_secs(2));
            let script = async {
                let msg = server.recv().await;
                server.reply(&msg["id"], Value::Null).await;
                msg["id"].as_i64().unwrap()
            };
            let (result, id) = tokio::join!(request, script);
            result.unwrap();
            seen.push(id);
        }

        assert!(seen.windows(2).all(|w| w[0] < w[1]), "ids: {seen:?}");
    }

    #[tokio::test]
    async fn test_late_reply_is_never_surfaced() {
        let (client, mut server) = pair();

        let slow = client
            .request::<_, Value>("test/slow", json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(slow, Err(LspError::Timeout { .. })));
        let slow_msg = server.recv().await;

        // The abandoned reply arrives first, then the answer to the next request.
        let next = client.request::<_, Value>("test/next", json!({}), Duration::from_secs(2));
        let script = async {
            let next_msg = server.recv().await;
            server.reply(&slow_msg["id"], json!("stale")).await;
            server.reply(&next_msg["id"], json!("fresh")).await;
        };
        let (result, ()) = tokio::join!(next, script);
        assert_eq!(result.unwrap(), json!("fresh"));
    }

    #[tokio::test]
    async fn test_error_object_is_protocol_error() {
        let (client, mut server) = pair();

        let request = client.request::<_, Value>("test/fail", json!({}), Duration::from_secs(2));
        let script = async {
            let msg = server.recv().await;
            server
                .send(json!({
                    "jsonrpc": "2.0",
                    "id": msg["id"],
                    "error": { "code": -32603, "message": "boom" }
                }))
                .await;
        };
        let (result, ()) = tokio::join!(request, script);

        match result {
            Err(LspError::Protocol { method, code, .. }) => {
                assert_eq!(method, "test/fail");
                assert_eq!(code, -32603);
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notification_has_no_id() {
        let (client, mut server) = pair();
        client.notify("initialized", json!({})).await.unwrap();

        let msg = server.recv().await;
        assert_eq!(msg["method"], "initialized");
        assert!(msg.get("id").is_none());
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() {
        let (_client, mut server) = pair();

        server
            .send(json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "a" }, { "section": "b" }] }
            }))
            .await;
        let reply = server.recv().await;
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"], json!([null, null]));

        server
            .send(json!({
                "jsonrpc": "2.0",
                "id": "create-1",
                "method": "window/workDoneProgress/create",
                "params": { "token": "t" }
            }))
            .await;
        let reply = server.recv().await;
        assert_eq!(reply["id"], "create-1");
        assert!(reply.get("result").is_some());
        assert!(reply.get("error").is_none());

        server
            .send(json!({ "jsonrpc": "2.0", "id": 8, "method": "custom/thing", "params": {} }))
            .await;
        let reply = server.recv().await;
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_progress_end_marks_ready() {
        let (client, mut server) = pair();

        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "$/progress",
                "params": { "token": "rustAnalyzer/Indexing", "value": { "kind": "begin", "title": "Indexing" } }
            }))
            .await;
        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "$/progress",
                "params": { "token": "rustAnalyzer/Indexing", "value": { "kind": "end" } }
            }))
            .await;

        let state = client.wait_until_ready(Duration::from_secs(2)).await;
        assert_eq!(state, ServerState::Ready);
    }

    #[tokio::test]
    async fn test_closed_stream_marks_dead() {
        let (client, server) = pair();
        drop(server);

        let state = client.wait_until_ready(Duration::from_secs(2)).await;
        assert_eq!(state, ServerState::Dead);
        assert!(!client.is_alive());

        let result = client
            .request::<_, Value>("test/after", json!({}), Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(LspError::Closed | LspError::Io(_))));
    }

    #[tokio::test]
    async fn test_pending_request_fails_when_server_goes_away() {
        let (client, mut server) = pair();

        let request = client.request::<_, Value>("test/orphan", json!({}), Duration::from_secs(5));
        let script = async move {
            let _ = server.recv().await;
            drop(server);
        };
        let (result, ()) = tokio::join!(request, script);
        assert!(matches!(result, Err(LspError::Closed)), "got {result:?}");
    }

    #[tokio::test]
    async fn test_non_json_frame_stops_reader() {
        let (client, mut server) = pair();

        let request = client.request::<_, Value>("test/garbled", json!({}), Duration::from_secs(5));
        let script = async {
            let _ = server.recv().await;
            server
                .writer
                .write_all(b"Content-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
            server.writer.flush().await.unwrap();
        };
        let (result, ()) = tokio::join!(request, script);

        assert!(matches!(result, Err(LspError::Closed)), "got {result:?}");
        assert!(!client.is_alive());
        assert_eq!(client.state(), ServerState::Dead);
    }

    #[tokio::test]
    async fn test_failed_write_marks_dead() {
        // The read side stays open, so only the write can notice.
        let (client_read, _server_write) = tokio::io::duplex(1024);
        let (client_write, server_read) = tokio::io::duplex(1024);
        drop(server_read);
        let client = LspClient::connect(client_read, client_write, None, test_timeouts());

        let result = client
            .request::<_, Value>("test/unwritable", json!({}), Duration::from_secs(2))
            .await;

        assert!(matches!(result, Err(LspError::Io(_))), "got {result:?}");
        assert!(!client.is_alive());
        assert_eq!(client.state(), ServerState::Dead);
    }

    #[tokio::test]
    async fn test_dropped_request_is_abandoned() {
        let (client, mut server) = pair();

        let request = client.request::<_, Value>("test/dropped", json!({}), Duration::from_secs(5));
        let outer = tokio::time::timeout(Duration::from_millis(100), request);
        let (outcome, msg) = tokio::join!(outer, server.recv());
        assert!(outcome.is_err(), "outer deadline should cut the request short");

        for _ in 0..100 {
            if client.pending_requests() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.pending_requests(), 0);

        // A reply for the dropped id goes nowhere.
        server.reply(&msg["id"], json!("late")).await;
        let next = client.request::<_, Value>("test/next", json!({}), Duration::from_secs(2));
        let script = async {
            let next_msg = server.recv().await;
            server.reply(&next_msg["id"], json!("fresh")).await;
        };
        let (result, ()) = tokio::join!(next, script);
        assert_eq!(result.unwrap(), json!("fresh"));
    }

    #[test]
    fn test_locations_from_scalar_goto() {
        let uri: Uri = "file:///repo/crates/a/src/lib.rs".parse().unwrap();
        let location = Location {
            uri,
            range: lsp_types::Range::default(),
        };
        let locations = locations_from_goto(GotoDefinitionResponse::Scalar(location.clone()));
        assert_eq!(locations, vec![location]);
    }

    #[test]
    fn test_locations_from_link_use_selection_range() {
        let uri: Uri = "file:///repo/crates/a/src/lib.rs".parse().unwrap();
        let selection = lsp_types::Range::new(Position::new(3, 7), Position::new(3, 12));
        let link = lsp_types::LocationLink {
            origin_selection_range: None,
            target_uri: uri,
            target_range: lsp_types::Range::new(Position::new(3, 0), Position::new(9, 1)),
            target_selection_range: selection,
        };
        let locations = locations_from_goto(GotoDefinitionResponse::Link(vec![link]));
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range, selection);
    }
}
