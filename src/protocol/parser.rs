//! Length-Prefixed Frame Codec
//!
//! The default wire format understood by [`FrameProcessor`]:
//!
//! ```text
//! ┌────────┬──────────────────────┬───────────────────────┐
//! │ opcode │ length (u32, BE)     │ payload (length bytes)│
//! │ 1 byte │ 4 bytes              │                       │
//! └────────┴──────────────────────┴───────────────────────┘
//! ```
//!
//! ## How the Parser Works
//!
//! Like any stream parser, it reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - a complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, wait for more data
//! - `Err(ParseError)` - invalid data, the connection should be closed
//!
//! The length is checked as soon as the header is complete, so an oversized
//! frame is rejected before its payload is buffered.
//!
//! [`FrameProcessor`]: crate::protocol::FrameProcessor

use crate::protocol::types::{DecodedMessage, OpCode};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the opcode + length header.
pub const HEADER_LEN: usize = 5;

/// Default upper bound for a single frame's payload (16 MB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Errors that can occur while decoding received bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The opcode byte is not a known opcode
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpCode(u8),

    /// The frame exceeds the maximum allowed payload
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The peer did not open with the expected handshake preamble
    #[error("handshake mismatch")]
    BadHandshake,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Parses a frame header.
///
/// Returns the opcode and payload length once all [`HEADER_LEN`] bytes are
/// present.
pub fn parse_header(buf: &[u8], max_payload: usize) -> ParseResult<Option<(OpCode, usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let opcode = OpCode::from_u8(buf[0]).ok_or(ParseError::UnknownOpCode(buf[0]))?;
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > max_payload {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: max_payload,
        });
    }

    Ok(Some((opcode, len)))
}

/// Parses one complete frame from the start of `buf`.
pub fn parse_frame(buf: &[u8], max_payload: usize) -> ParseResult<Option<(DecodedMessage, usize)>> {
    let Some((opcode, len)) = parse_header(buf, max_payload)? else {
        return Ok(None);
    };

    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
    Ok(Some((DecodedMessage::new(opcode, payload), total)))
}

/// Appends one frame to `buf`.
///
/// # Panics
///
/// Panics if the payload is longer than `u32::MAX` bytes.
pub fn encode_frame_into(opcode: OpCode, payload: &[u8], buf: &mut BytesMut) {
    let len = u32::try_from(payload.len()).expect("frame payload exceeds u32::MAX bytes");
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_u8(opcode.as_u8());
    buf.put_u32(len);
    buf.put_slice(payload);
}

/// Encodes one frame.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_frame_into(opcode, payload, &mut buf);
    buf.freeze()
}
