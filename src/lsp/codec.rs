//! Content-Length message framing
//!
//! Every message on the wire is an ASCII header block followed by a JSON body:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <length bytes of UTF-8 JSON>
//! ```
//!
//! Headers other than `Content-Length` (e.g. `Content-Type`) are accepted and
//! ignored. Header names are matched case-insensitively.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::trace;

use crate::lsp::protocol::{Message, MessageShapeError};

/// Maximum message size to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Maximum size of one header block, terminating blank line included
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

const CONTENT_LENGTH: &str = "content-length";

/// Error types for message framing
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header line: {0:?}")]
    InvalidHeader(String),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Header block exceeds {max} bytes")]
    HeaderTooLarge { max: usize },

    #[error("Stream ended in the middle of a message")]
    UnexpectedEof,

    #[error("Message body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Unrecognized message: {0}")]
    UnrecognizedShape(#[from] MessageShapeError),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[source] serde_json::Error),
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize a message and prepend its Content-Length header
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(message).map_err(CodecError::Serialization)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);

    trace!("Encoded frame ({} bytes content)", body.len());
    Ok(frame)
}

/// Decode a complete body into a classified message
pub fn decode_body(body: Vec<u8>) -> Result<Message, CodecError> {
    let text = String::from_utf8(body)?;
    let value: Value = serde_json::from_str(&text).map_err(CodecError::InvalidJson)?;
    Ok(Message::from_value(value)?)
}

// ============================================================================
// Decoding
// ============================================================================

/// Reads framed messages from a byte stream
pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read the next message
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between messages. A
    /// stream that ends inside a header block or body is an error.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        let content_length = match self.read_headers().await? {
            Some(length) => length,
            None => return Ok(None),
        };

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => CodecError::UnexpectedEof,
                _ => CodecError::Io(e),
            })?;

        trace!("Decoded frame ({} bytes content)", content_length);
        decode_body(body).map(Some)
    }

    /// Read one header block, returning its Content-Length
    ///
    /// At most `MAX_HEADER_SIZE` bytes are buffered per block.
    async fn read_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length = None;
        let mut seen_any = false;
        let mut remaining = MAX_HEADER_SIZE as u64;
        let mut line = String::new();

        loop {
            if remaining == 0 {
                return Err(CodecError::HeaderTooLarge {
                    max: MAX_HEADER_SIZE,
                });
            }

            line.clear();
            let read = (&mut self.reader)
                .take(remaining)
                .read_line(&mut line)
                .await?;
            if read == 0 {
                return if seen_any {
                    Err(CodecError::UnexpectedEof)
                } else {
                    Ok(None)
                };
            }
            seen_any = true;
            remaining -= read as u64;

            if !line.ends_with('\n') {
                return Err(if remaining == 0 {
                    CodecError::HeaderTooLarge {
                        max: MAX_HEADER_SIZE,
                    }
                } else {
                    CodecError::UnexpectedEof
                });
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }

            let (name, value) = trimmed
                .split_once(':')
                .ok_or_else(|| CodecError::InvalidHeader(trimmed.to_string()))?;

            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                content_length = Some(parse_content_length(value.trim())?);
            }
        }

        content_length.map(Some).ok_or(CodecError::MissingContentLength)
    }
}

fn parse_content_length(value: &str) -> Result<usize, CodecError> {
    let length = value
        .parse::<usize>()
        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?;

    if length > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(length)
}
