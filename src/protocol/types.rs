//! Message Types
//!
//! Values exchanged between the listener core and the message processor.
//!
//! ## Opcodes
//!
//! | Opcode       | Byte   | Delivered as           |
//! |--------------|--------|------------------------|
//! | Continuation | `0x0`  | `DataReceived`         |
//! | Text         | `0x1`  | `DataReceived`         |
//! | Binary       | `0x2`  | `DataReceived`         |
//! | Close        | `0x8`  | close path             |
//! | Ping         | `0x9`  | `Ping`                 |
//! | Pong         | `0xA`  | `Pong`                 |
//! | Empty        | `0xFF` | never on the wire      |

use bytes::Bytes;
use std::fmt;

/// Message opcode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
    /// No opcode. Used as a close status meaning "no close handshake".
    Empty = 0xFF,
}

impl OpCode {
    /// Decodes a wire byte. `Empty` is internal and never decodes.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for opcodes that carry application data.
    pub fn is_data(self) -> bool {
        matches!(self, OpCode::Continuation | OpCode::Text | OpCode::Binary)
    }

    /// Returns true for close, ping and pong.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Continuation => "continuation",
            OpCode::Text => "text",
            OpCode::Binary => "binary",
            OpCode::Close => "close",
            OpCode::Ping => "ping",
            OpCode::Pong => "pong",
            OpCode::Empty => "empty",
        };
        f.write_str(name)
    }
}

/// One application message produced by the message processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl DecodedMessage {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// A binary data message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, payload)
    }

    /// A text data message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Text, payload)
    }
}

/// What the message processor made of one batch of received bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Complete messages, in wire order
    pub messages: Vec<DecodedMessage>,

    /// The handshake completed while processing this batch
    pub handshake_completed: bool,

    /// Whether the receive pipeline should post another read
    pub continue_receiving: bool,
}

impl ReceiveOutcome {
    /// An empty outcome that keeps receiving.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            handshake_completed: false,
            continue_receiving: true,
        }
    }
}

impl Default for ReceiveOutcome {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_wire_values() {
        for opcode in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::from_u8(opcode.as_u8()), Some(opcode));
        }
    }

    #[test]
    fn test_empty_never_decodes() {
        assert_eq!(OpCode::Empty.as_u8(), 0xFF);
        assert_eq!(OpCode::from_u8(0xFF), None);
        assert_eq!(OpCode::from_u8(0x3), None);
    }

    #[test]
    fn test_opcode_classes() {
        assert!(OpCode::Binary.is_data());
        assert!(OpCode::Continuation.is_data());
        assert!(!OpCode::Ping.is_data());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Empty.is_control());
    }

    #[test]
    fn test_default_outcome_keeps_receiving() {
        let outcome = ReceiveOutcome::default();
        assert!(outcome.messages.is_empty());
        assert!(!outcome.handshake_completed);
        assert!(outcome.continue_receiving);
    }

    #[test]
    fn test_display() {
        assert_eq!(OpCode::Pong.to_string(), "pong");
        assert_eq!(DecodedMessage::text("hi").opcode, OpCode::Text);
    }
}
