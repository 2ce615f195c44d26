//! Header-framed protocol messages.
//!
//! Every message in the system, on TCP streams and UDP datagrams alike, is a
//! text header block followed by an opaque body:
//!
//! ```text
//! {TYPE} {VERSION}\r\n
//! Content-Length: {n}\r\n
//! {Key}: {Value}\r\n
//! \r\n
//! {body bytes}
//! ```
//!
//! TCP carries no message boundaries, so the stream decoder consumes bytes
//! one at a time until the blank-line sentinel, then reads exactly
//! `Content-Length` body bytes. Datagram decoding splits the received buffer
//! once on the first CRLFCRLF; the body is taken as-is and its length is not
//! checked against `Content-Length`.

use std::str;

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{MessageType, header};
use crate::{MAX_BODY_SIZE, MAX_HEADER_BLOCK, PROTOCOL_VERSION};

/// One self-delimited protocol message: type, version, headers, body.
///
/// Header order is preserved as transmitted. Duplicate keys are not rejected;
/// [`Frame::header`] resolves them with last-occurrence-wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    message_type: String,
    protocol_version: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Frame {
    /// Creates an empty frame of the given type with the current protocol
    /// version.
    pub fn new(message_type: MessageType) -> Self {
        Self::from_token(message_type.as_str())
    }

    /// Creates an empty frame from a raw type token. Useful for
    /// forward-compatibility tests; well-known types should go through
    /// [`Frame::new`].
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            message_type: token.into(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Creates a frame carrying the given payload serialized as JSON.
    pub fn with_json<T: Serialize>(message_type: MessageType, payload: &T) -> ProtocolResult<Self> {
        let mut frame = Self::new(message_type);
        frame.body = serde_json::to_vec(payload)?;
        Ok(frame)
    }

    /// Builder: appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the parsed message type, or `None` for unknown tokens.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.message_type)
    }

    /// Returns the raw type token as transmitted.
    pub fn type_token(&self) -> &str {
        &self.message_type
    }

    /// Returns the protocol version carried in the start line.
    pub fn version(&self) -> &str {
        &self.protocol_version
    }

    /// Looks up a header value by exact (case-sensitive) name.
    /// The last occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Deserializes the body as JSON, treating an empty body as the type's
    /// default (frames without a body are legal for several message types).
    pub fn json_or_default<T: DeserializeOwned + Default>(&self) -> ProtocolResult<T> {
        if self.body.is_empty() {
            return Ok(T::default());
        }
        self.json()
    }

    /// Encodes the frame to wire bytes.
    ///
    /// `Content-Length` is synthesized from the body length and emitted
    /// exactly once; a caller-supplied `Content-Length` header is dropped.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(
            format!("{} {}\r\n", self.message_type, self.protocol_version).as_bytes(),
        );
        out.extend_from_slice(
            format!("{}: {}\r\n", header::CONTENT_LENGTH, self.body.len()).as_bytes(),
        );
        for (key, value) in &self.headers {
            if key == header::CONTENT_LENGTH {
                continue;
            }
            out.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Decodes a frame from one already-received datagram buffer.
    pub fn parse_datagram(data: &[u8]) -> ProtocolResult<Frame> {
        let separator = data
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .ok_or(ProtocolError::MissingSeparator)?;

        let head = str::from_utf8(&data[..separator]).map_err(|_| ProtocolError::InvalidUtf8)?;
        let body = data[separator + 4..].to_vec();

        let mut lines = head.split("\r\n");
        let start_line = match lines.next() {
            Some(line) if !line.is_empty() => line,
            _ => return Err(ProtocolError::EmptyFrame),
        };

        let (message_type, protocol_version) = parse_start_line(start_line)?;
        let headers = parse_header_lines(lines);

        Ok(Frame {
            message_type,
            protocol_version,
            headers,
            body,
        })
    }
}

/// Splits the start line into exactly two whitespace-separated tokens.
fn parse_start_line(line: &str) -> ProtocolResult<(String, String)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 2 {
        return Err(ProtocolError::MalformedStartLine {
            line: line.to_string(),
        });
    }
    Ok((tokens[0].to_string(), tokens[1].to_string()))
}

/// Parses header lines into key/value pairs. Each line splits on the first
/// `:` with both sides trimmed; lines without a `:` are ignored.
fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Reads one frame from a byte stream.
///
/// Returns `Ok(None)` if the stream closes cleanly before the first byte of a
/// frame (the connection-closed signal). A stream that closes mid-frame, a
/// malformed start line, or a header block that never terminates within
/// [`MAX_HEADER_BLOCK`] bytes all yield an error; callers treat any error on
/// this path as the connection being over.
///
/// Wrap the reader in a `BufReader`: decoding consumes the stream one byte
/// at a time because the blank-line sentinel is the only framing signal.
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_lines: Vec<String> = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut consumed = 0usize;

    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            if header_lines.is_empty() && current.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::UnexpectedEof {
                context: "header block",
            });
        }

        consumed += 1;
        if consumed > MAX_HEADER_BLOCK {
            return Err(ProtocolError::HeaderBlockTooLarge {
                max: MAX_HEADER_BLOCK,
            });
        }

        if byte[0] != b'\n' {
            current.push(byte[0]);
            continue;
        }

        if current.last() == Some(&b'\r') {
            current.pop();
        }
        if current.is_empty() {
            break;
        }
        let line = String::from_utf8(std::mem::take(&mut current))
            .map_err(|_| ProtocolError::InvalidUtf8)?;
        header_lines.push(line);
    }

    if header_lines.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }

    let (message_type, protocol_version) = parse_start_line(&header_lines[0])?;
    let headers = parse_header_lines(header_lines[1..].iter().map(String::as_str));

    let mut frame = Frame {
        message_type,
        protocol_version,
        headers,
        body: Vec::new(),
    };

    if let Some(value) = frame.header(header::CONTENT_LENGTH) {
        let length: usize =
            value
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength {
                    value: value.to_string(),
                })?;
        if length > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge {
                size: length,
                max: MAX_BODY_SIZE,
            });
        }
        if length > 0 {
            let mut body = vec![0u8; length];
            match reader.read_exact(&mut body).await {
                Ok(_) => frame.body = body,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(ProtocolError::UnexpectedEof { context: "body" });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(Some(frame))
}
