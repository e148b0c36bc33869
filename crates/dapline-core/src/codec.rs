//! CRLF-delimited JSON framing
//!
//! Each DAP message travels as one UTF-8 JSON object terminated by `\r\n`.
//! The decoder is stateful: bytes may arrive at arbitrary chunk boundaries
//! and the unconsumed remainder is retained between feeds.
//!
//! Known limitation, kept on purpose: the delimiter search assumes field
//! values never contain a raw, unescaped CR LF pair. `encode` always
//! produces escaped JSON, so this holds for anything we frame ourselves;
//! correctness for inbound data depends on the peer's encoder doing the
//! same.

use crate::error::{RelayError, RelayResult};
use crate::protocol::DapMessage;

/// Frame delimiter
const DELIMITER: &[u8] = b"\r\n";

/// Encode a message as one CRLF-terminated JSON frame.
pub fn encode(message: &DapMessage) -> RelayResult<String> {
    let mut text = serde_json::to_string(message)?;
    text.push_str("\r\n");
    Ok(text)
}

/// Incremental frame decoder for one connection's byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain every complete frame.
    ///
    /// Returns one entry per complete frame in arrival order. A frame that
    /// fails to parse yields `Err(Protocol)` for that frame only; decoding
    /// continues with the next frame, so a single bad message never poisons
    /// the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<RelayResult<DapMessage>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..pos + DELIMITER.len()).collect();
            let payload = &frame[..pos];
            if payload.is_empty() {
                continue;
            }
            frames.push(parse_frame(payload));
        }
        frames
    }

    /// Number of buffered bytes not yet forming a complete frame
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

fn parse_frame(payload: &[u8]) -> RelayResult<DapMessage> {
    serde_json::from_slice(payload).map_err(|e| {
        let excerpt: String = String::from_utf8_lossy(payload).chars().take(120).collect();
        RelayError::protocol(format!("failed to parse frame: {} (frame: {})", e, excerpt))
    })
}
