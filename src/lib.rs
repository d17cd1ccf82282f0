//! # FlashSock - A Pooled TCP Connection Core
//!
//! FlashSock is the connection-handling core of a socket server, written in
//! Rust on Tokio. It accepts clients under a bounded-concurrency policy,
//! moves bytes through pre-allocated buffers and leaves message framing to a
//! pluggable processor.
//!
//! ## Features
//!
//! - **Bounded admission**: a counting permit caps concurrently active
//!   connections; excess clients wait in the listen backlog
//! - **Pooled buffers**: one contiguous region split into fixed segments,
//!   each owned by a reusable I/O slot
//! - **Ordered, single-flight sends**: one drain per connection writes
//!   queued frames in submission order, chunked through its segment
//! - **Exactly-once teardown**: whatever ends a connection, its permit is
//!   returned and `Disconnected` is emitted once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashSock                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Accept    │───>│  Receive    │───>│  Message    │                  │
//! │  │   Workers   │    │  Pipeline   │    │  Processor  │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │ messages                │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Admission  │    │   I/O Slot  │    │  Observer   │──> application   │
//! │  │    Gate     │    │    Pool     │    │  (events)   │                  │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘                  │
//! │                            │                  ▲                         │
//! │                            ▼                  │ post_send               │
//! │                     ┌─────────────┐    ┌──────┴──────┐                  │
//! │                     │ BufferPool  │    │    Send     │                  │
//! │                     │ [s0][s1]... │    │   Drains    │                  │
//! │                     └─────────────┘    └─────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use flashsock::config::Settings;
//! use flashsock::listener::{ConnectionEvent, EventSender, SocketListener};
//! use flashsock::protocol::FrameProcessor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::builder()
//!         .local_addr("127.0.0.1:7070".parse()?)
//!         .max_connections(256)
//!         .build()?;
//!
//!     let (events, mut rx) = EventSender::channel();
//!     let listener = SocketListener::new(settings, FrameProcessor::new(), events);
//!     listener.start_listen()?;
//!
//!     // Echo every message back
//!     while let Some(event) = rx.recv().await {
//!         if let ConnectionEvent::DataReceived(conn, message) = event {
//!             listener.post_send_with(&conn, message.opcode, &message.payload);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: listener settings and their validation
//! - [`pool`]: the buffer region, I/O slots and accept slots
//! - [`connection`]: per-client state and statistics
//! - [`protocol`]: the message processor contract and default framing
//! - [`listener`]: admission, the accept/receive/send pipelines and close
//!
//! ## Design Highlights
//!
//! ### No Per-Connection Allocation On The Hot Path
//!
//! Reads land directly in the connection's pooled segment, and sends are
//! copied through a pooled segment in chunks. The region is allocated once
//! when the listener is built.
//!
//! ### Pool Sizing
//!
//! Every admitted connection may hold one slot for receiving and one for
//! sending, so settings validation requires at least twice as many I/O slots
//! as connections. A pipeline that finds the pool empty waits for a slot.

pub mod config;
pub mod connection;
pub mod listener;
pub mod pool;
pub mod protocol;

// Re-export commonly used types for convenience
pub use config::{ConfigError, Settings, SettingsBuilder};
pub use connection::{Connection, ConnectionStats};
pub use listener::{
    ConnectionEvent, ConnectionEvents, EventSender, ListenerError, NoopEvents, SocketListener,
};
pub use protocol::{DecodedMessage, FrameProcessor, MessageProcessor, OpCode, ParseError};

/// The default port FlashSock listens on
pub const DEFAULT_PORT: u16 = config::DEFAULT_PORT;

/// The default host FlashSock binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of FlashSock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
