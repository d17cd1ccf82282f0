//! Connection Module
//!
//! Per-client state shared by the listener's pipelines.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Accept Loop                             │
//! │                  (listener::accept)                         │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ Arc<Connection>
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐     │
//! │  │ write half   │   │ outbound     │   │ flags:       │     │
//! │  │ (tokio Mutex)│   │ FIFO         │   │ sending,     │     │
//! │  └──────────────┘   └──────────────┘   │ closing, ... │     │
//! │                                        └──────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲                  ▲                     ▲
//!        │                  │                     │
//!   receive pipeline    send drain            close path
//! ```
//!
//! ## Features
//!
//! - **Single-flight sends**: a compare-and-set flag elects one drain
//! - **Liveness**: last-activity timestamp for idle detection
//! - **Statistics**: shared counters for connections, messages and bytes

pub mod socket;
pub mod stats;

// Re-export commonly used types
pub use socket::Connection;
pub use stats::ConnectionStats;
