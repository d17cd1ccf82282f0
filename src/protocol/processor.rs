//! Message Processor Contract
//!
//! The listener core never looks inside the bytes it moves. Turning received
//! bytes into [`DecodedMessage`]s and outbound payloads into wire frames is
//! delegated to a [`MessageProcessor`].
//!
//! Reassembly state for partial frames lives on the [`Connection`]
//! (`Connection::receive_buffer`), so one processor instance can serve every
//! connection.
//!
//! [`FrameProcessor`] is the default implementation, speaking the
//! length-prefixed format of [`crate::protocol::parser`] with an optional
//! handshake preamble.

use crate::connection::Connection;
use crate::protocol::parser::{
    encode_frame, parse_header, ParseError, ParseResult, DEFAULT_MAX_PAYLOAD, HEADER_LEN,
};
use crate::protocol::types::{DecodedMessage, OpCode, ReceiveOutcome};
use bytes::{Buf, Bytes};
use tracing::trace;

/// Frames and deframes messages for the listener.
pub trait MessageProcessor: Send + Sync + 'static {
    /// Consumes freshly received bytes for a connection.
    ///
    /// A frame may span several calls; incomplete data is buffered by the
    /// processor and yields no messages yet. An error is a protocol violation
    /// and closes the connection.
    fn try_receive_message(
        &self,
        connection: &Connection,
        data: &[u8],
    ) -> ParseResult<ReceiveOutcome>;

    /// Frames an outbound payload.
    fn build_message_pack(
        &self,
        connection: &Connection,
        opcode: OpCode,
        payload: &[u8],
    ) -> Bytes;

    /// Decides how to answer a received close message.
    ///
    /// [`OpCode::Empty`] means no close handshake is sent back.
    fn get_close_status(&self, payload: &[u8]) -> OpCode;

    /// Builds the close-handshake frame carrying `reason`.
    fn close_handshake_frame(
        &self,
        connection: &Connection,
        opcode: OpCode,
        reason: &str,
    ) -> Bytes {
        self.build_message_pack(connection, opcode, reason.as_bytes())
    }
}

/// Default length-prefixed processor.
///
/// # Example
///
/// ```
/// use flashsock::connection::Connection;
/// use flashsock::protocol::{FrameProcessor, MessageProcessor, OpCode};
///
/// let processor = FrameProcessor::new();
/// let conn = Connection::detached(1, "127.0.0.1:9000".parse().unwrap());
///
/// let frame = processor.build_message_pack(&conn, OpCode::Text, b"hi");
/// let outcome = processor.try_receive_message(&conn, &frame).unwrap();
/// assert_eq!(outcome.messages[0].payload, "hi");
/// ```
#[derive(Debug, Clone)]
pub struct FrameProcessor {
    /// Bytes the peer must send before its first frame
    handshake: Option<Bytes>,

    /// Largest accepted payload
    max_payload: usize,
}

impl FrameProcessor {
    /// A processor without handshake.
    pub fn new() -> Self {
        Self {
            handshake: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Requires every peer to open with `preamble`.
    pub fn with_handshake(mut self, preamble: impl Into<Bytes>) -> Self {
        self.handshake = Some(preamble.into()).filter(|p: &Bytes| !p.is_empty());
        self
    }

    /// Caps the payload size of a single frame.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageProcessor for FrameProcessor {
    fn try_receive_message(
        &self,
        connection: &Connection,
        data: &[u8],
    ) -> ParseResult<ReceiveOutcome> {
        let mut outcome = ReceiveOutcome::new();
        let mut buffer = connection.receive_buffer();
        buffer.extend_from_slice(data);

        if let Some(preamble) = &self.handshake {
            if !connection.is_handshaked() {
                let seen = preamble.len().min(buffer.len());
                if buffer[..seen] != preamble[..seen] {
                    buffer.clear();
                    return Err(ParseError::BadHandshake);
                }
                if seen < preamble.len() {
                    return Ok(outcome);
                }

                buffer.advance(preamble.len());
                connection.set_handshaked();
                outcome.handshake_completed = true;
            }
        }

        while let Some((opcode, len)) = parse_header(&buffer, self.max_payload)? {
            if buffer.len() < HEADER_LEN + len {
                break;
            }

            buffer.advance(HEADER_LEN);
            let payload = buffer.split_to(len).freeze();
            outcome.messages.push(DecodedMessage::new(opcode, payload));
        }

        trace!(
            conn = connection.id(),
            messages = outcome.messages.len(),
            buffered = buffer.len(),
            "Processed received bytes"
        );
        Ok(outcome)
    }

    fn build_message_pack(
        &self,
        _connection: &Connection,
        opcode: OpCode,
        payload: &[u8],
    ) -> Bytes {
        encode_frame(opcode, payload)
    }

    /// A close frame with a payload asks for a close frame back; an empty one
    /// acknowledges ours.
    fn get_close_status(&self, payload: &[u8]) -> OpCode {
        if payload.is_empty() {
            OpCode::Empty
        } else {
            OpCode::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::detached(1, "127.0.0.1:6000".parse().unwrap())
    }

    #[test]
    fn test_single_frame() {
        let processor = FrameProcessor::new();
        let conn = conn();

        let outcome = processor
            .try_receive_message(&conn, &encode_frame(OpCode::Binary, b"hello"))
            .unwrap();
        assert_eq!(outcome.messages, vec![DecodedMessage::binary("hello")]);
        assert!(!outcome.handshake_completed);
        assert!(outcome.continue_receiving);
        assert!(conn.receive_buffer().is_empty());
    }

    #[test]
    fn test_frame_split_across_reads() {
        let processor = FrameProcessor::new();
        let conn = conn();
        let frame = encode_frame(OpCode::Text, b"split payload");

        let first = processor.try_receive_message(&conn, &frame[..3]).unwrap();
        assert!(first.messages.is_empty());

        let second = processor.try_receive_message(&conn, &frame[3..9]).unwrap();
        assert!(second.messages.is_empty());

        let third = processor.try_receive_message(&conn, &frame[9..]).unwrap();
        assert_eq!(third.messages, vec![DecodedMessage::text("split payload")]);
    }

    #[test]
    fn test_several_frames_in_one_read_keep_order() {
        let processor = FrameProcessor::new();
        let conn = conn();

        let mut data = Vec::new();
        data.extend_from_slice(&encode_frame(OpCode::Text, b"A"));
        data.extend_from_slice(&encode_frame(OpCode::Ping, b""));
        data.extend_from_slice(&encode_frame(OpCode::Text, b"B"));
        data.extend_from_slice(&encode_frame(OpCode::Text, b"partial")[..4]);

        let outcome = processor.try_receive_message(&conn, &data).unwrap();
        let opcodes: Vec<_> = outcome.messages.iter().map(|m| m.opcode).collect();
        assert_eq!(opcodes, vec![OpCode::Text, OpCode::Ping, OpCode::Text]);
        assert_eq!(outcome.messages[2].payload, "B");
        assert_eq!(conn.receive_buffer().len(), 4);
    }

    #[test]
    fn test_handshake_then_frame() {
        let processor = FrameProcessor::new().with_handshake("FSOCK/1\n");
        let conn = conn();

        let outcome = processor.try_receive_message(&conn, b"FSOCK").unwrap();
        assert!(!outcome.handshake_completed);
        assert!(!conn.is_handshaked());

        let mut rest = b"/1\n".to_vec();
        rest.extend_from_slice(&encode_frame(OpCode::Binary, b"x"));
        let outcome = processor.try_receive_message(&conn, &rest).unwrap();
        assert!(outcome.handshake_completed);
        assert!(conn.is_handshaked());
        assert_eq!(outcome.messages, vec![DecodedMessage::binary("x")]);

        // Reported once only
        let outcome = processor
            .try_receive_message(&conn, &encode_frame(OpCode::Binary, b"y"))
            .unwrap();
        assert!(!outcome.handshake_completed);
    }

    #[test]
    fn test_bad_handshake() {
        let processor = FrameProcessor::new().with_handshake("FSOCK/1\n");
        let conn = conn();
        assert_eq!(
            processor.try_receive_message(&conn, b"GET / HTTP/1.1\r\n"),
            Err(ParseError::BadHandshake)
        );
    }

    #[test]
    fn test_oversized_frame() {
        let processor = FrameProcessor::new().with_max_payload(4);
        let conn = conn();
        let result = processor.try_receive_message(&conn, &encode_frame(OpCode::Binary, b"12345"));
        assert_eq!(result, Err(ParseError::MessageTooLarge { size: 5, max: 4 }));
    }

    #[test]
    fn test_close_status() {
        let processor = FrameProcessor::new();
        assert_eq!(processor.get_close_status(b""), OpCode::Empty);
        assert_eq!(processor.get_close_status(b"bye"), OpCode::Close);
    }

    #[test]
    fn test_close_handshake_frame_carries_reason() {
        let processor = FrameProcessor::new();
        let conn = conn();
        let frame = processor.close_handshake_frame(&conn, OpCode::Close, "idle timeout");
        assert_eq!(frame, encode_frame(OpCode::Close, b"idle timeout"));
    }
}
