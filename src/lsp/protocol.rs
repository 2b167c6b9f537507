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

//! JSON-RPC envelopes and `Content-Length` framing.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::LspError;

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// An outgoing request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A response, either ours to a server request or the server's to ours.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: Option<RequestId>,
    /// Result payload. `null` deserializes to `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object, if the request failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A message without an id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// JSON-RPC ids may be numbers or strings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id. The client only allocates these.
    Number(i64),
    /// String id, used by some servers for their own requests.
    String(String),
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Serializes a message into a single framed buffer.
///
/// The header declares the UTF-8 byte length of the payload, so the whole
/// frame can go out in one `write_all`.
///
/// # Errors
///
/// Returns [`LspError::Json`] if the message cannot be serialized.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, LspError> {
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parses one framed message from the front of `buffer`, if complete.
///
/// Returns `Ok(None)` while more bytes are needed.
///
/// # Errors
///
/// Returns [`LspError::Framing`] if the header block is not UTF-8, has no
/// `Content-Length`, or the body is not UTF-8.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>, LspError> {
    let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };

    let headers = std::str::from_utf8(&buffer[..header_end])
        .map_err(|e| LspError::Framing(format!("header is not UTF-8: {e}")))?;

    let mut content_length = None;
    for line in headers.lines() {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            let len = value
                .trim()
                .parse::<usize>()
                .map_err(|e| LspError::Framing(format!("bad Content-Length {value:?}: {e}")))?;
            content_length = Some(len);
        }
    }

    let content_length = content_length
        .ok_or_else(|| LspError::Framing(format!("missing Content-Length in {headers:?}")))?;

    let total = header_end + 4 + content_length;
    if buffer.len() < total {
        return Ok(None);
    }

    buffer.advance(header_end + 4);
    let body = buffer.split_to(content_length);
    String::from_utf8(body.to_vec())
        .map(Some)
        .map_err(|e| LspError::Framing(format!("body is not UTF-8: {e}")))
}

/// Reads framed messages from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Returns the next payload, or `None` when the stream ends cleanly
    /// between frames.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::Framing`] if the stream ends inside a frame or a
    /// header is malformed, and [`LspError::Io`] on read failure.
    pub async fn next_frame(&mut self) -> Result<Option<String>, LspError> {
        loop {
            if let Some(message) = try_parse_message(&mut self.buffer)? {
                return Ok(Some(message));
            }

            let mut temp = [0u8; 4096];
            let n = self.reader.read(&mut temp).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(LspError::Framing(format!(
                    "stream ended with {} bytes of an incomplete frame",
                    self.buffer.len()
                )));
            }
            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_message() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let raw = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        let mut buffer = BytesMut::from(raw.as_str());

        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, Some(body.to_string()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_incomplete_header() {
        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_parse_incomplete_body() {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_parse_multiple_messages() {
        let body1 = r#"{"jsonrpc":"2.0","id":1}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2}"#;
        let raw = format!(
            "Content-Length: {}\r\n\r\n{}Content-Length: {}\r\n\r\n{}",
            body1.len(),
            body1,
            body2.len(),
            body2
        );
        let mut buffer = BytesMut::from(raw.as_str());

        let result1 = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result1, Some(body1.to_string()));

        let result2 = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result2, Some(body2.to_string()));

        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_case_insensitive_header() {
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\r\n\r\n{}", body.len(), body);
        let mut buffer = BytesMut::from(raw.as_str());

        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, Some(body.to_string()));
    }

    #[test]
    fn test_parse_extra_headers() {
        let body = r#"{"x":1}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut buffer = BytesMut::from(raw.as_str());

        let result = try_parse_message(&mut buffer).unwrap();
        assert_eq!(result, Some(body.to_string()));
    }

    #[test]
    fn test_missing_content_length_is_framing_error() {
        let mut buffer = BytesMut::from("Content-Type: text/plain\r\n\r\n{}");
        let err = try_parse_message(&mut buffer).unwrap_err();
        assert!(matches!(err, LspError::Framing(_)));
    }

    #[test]
    fn test_encode_counts_utf8_bytes() {
        let message = serde_json::json!({ "name": "größe→λ" });
        let frame = encode_frame(&message).unwrap();
        let text = String::from_utf8(frame.clone()).unwrap();

        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
        assert!(body.len() > body.chars().count());

        let mut buffer = BytesMut::from(frame.as_slice());
        let parsed = try_parse_message(&mut buffer).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&parsed).unwrap();
        assert_eq!(value, message);
    }

    #[tokio::test]
    async fn test_frame_reader_reads_across_chunks() {
        let body1 = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let body2 = r#"{"jsonrpc":"2.0","method":"$/progress","params":{}}"#;
        let raw = format!(
            "Content-Length: {}\r\n\r\n{}Content-Length: {}\r\n\r\n{}",
            body1.len(),
            body1,
            body2.len(),
            body2
        );

        let mut reader = FrameReader::new(raw.as_bytes());
        assert_eq!(reader.next_frame().await.unwrap(), Some(body1.to_string()));
        assert_eq!(reader.next_frame().await.unwrap(), Some(body2.to_string()));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frame_reader_truncated_stream() {
        let raw = "Content-Length: 50\r\n\r\n{\"jsonrpc\":";
        let mut reader = FrameReader::new(raw.as_bytes());
        let err = reader.next_frame().await.unwrap_err();
        assert!(matches!(err, LspError::Framing(_)));
    }

    #[test]
    fn test_request_id_number() {
        let json = r#"{"jsonrpc":"2.0","id":42,"method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, RequestId::Number(42));
    }

    #[test]
    fn test_request_id_string() {
        let json = r#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn test_response_with_error() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        let msg: ResponseMessage = serde_json::from_str(json).unwrap();
        assert!(msg.result.is_none());
        assert_eq!(msg.error.unwrap().code, -32600);
    }

    #[test]
    fn test_response_null_result() {
        let json = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let msg: ResponseMessage = serde_json::from_str(json).unwrap();
        // null deserializes to None for Option<Value>
        assert!(msg.result.is_none());
    }
}
