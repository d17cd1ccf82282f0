//! Message Protocol
//!
//! The boundary between the listener core and wire framing.
//!
//! ## Modules
//!
//! - `types`: opcodes, decoded messages and receive outcomes
//! - `processor`: the [`MessageProcessor`] contract and the default
//!   [`FrameProcessor`]
//! - `parser`: the length-prefixed frame codec used by `FrameProcessor`
//!
//! ## Example
//!
//! ```ignore
//! use flashsock::protocol::{encode_frame, parse_frame, OpCode, DEFAULT_MAX_PAYLOAD};
//!
//! let frame = encode_frame(OpCode::Text, b"hello");
//! let (message, consumed) = parse_frame(&frame, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
//! assert_eq!(consumed, frame.len());
//! ```

pub mod parser;
pub mod processor;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    encode_frame, encode_frame_into, parse_frame, parse_header, ParseError, ParseResult,
    DEFAULT_MAX_PAYLOAD, HEADER_LEN,
};
pub use processor::{FrameProcessor, MessageProcessor};
pub use types::{DecodedMessage, OpCode, ReceiveOutcome};
