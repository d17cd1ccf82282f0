//! Pool Module
//!
//! Pre-allocated resources shared by every connection.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        BufferPool                            │
//! │   one region: [seg 0][seg 1][seg 2] ... [seg N]              │
//! └──────┬────────┬────────┬──────────────────┬──────────────────┘
//!        │        │        │                  │   bound for life
//!        ▼        ▼        ▼                  ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       IoSlotPool                             │
//! │  slot 0   slot 1   slot 2      ...      slot N               │
//! │  (segment + token: connection, frame, write cursor)          │
//! └──────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      AcceptSlotPool                          │
//! │  transient holders for accepted sockets                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod slot;

pub use buffer::{BufferPool, BufferSegment};
pub use slot::{AcceptSlot, AcceptSlotPool, IoSlot, IoSlotPool};
