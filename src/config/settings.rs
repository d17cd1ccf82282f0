//! Listener Settings
//!
//! Immutable configuration consumed by the socket listener. Settings are
//! assembled with [`SettingsBuilder`] and validated once in
//! [`SettingsBuilder::build`]; after that nothing can change them.
//!
//! ## Sizing
//!
//! ```text
//!   buffer region = buffer_size * io_slots
//!
//!   ┌──────────┬──────────┬──────────┬─────┬──────────┐
//!   │ segment 0│ segment 1│ segment 2│ ... │ segment N│   one allocation
//!   └──────────┴──────────┴──────────┴─────┴──────────┘
//!        │          │          │                │
//!     slot 0     slot 1     slot 2   ...     slot N      bound for life
//! ```
//!
//! Every admitted connection can hold one slot for its receive pipeline and
//! one for an in-flight send chain, so `io_slots` must be at least twice
//! `max_connections`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 7070;

/// Default size of one buffer segment (8 KB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Default number of concurrently admitted connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default number of concurrently posted accepts.
pub const DEFAULT_MAX_ACCEPT_OPS: usize = 4;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Errors produced while validating settings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A size or count that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Not enough I/O slots to serve every admitted connection
    #[error("io_slots ({io_slots}) must be at least twice max_connections ({max_connections})")]
    NotEnoughSlots {
        io_slots: usize,
        max_connections: usize,
    },

    /// The buffer region would not fit in memory
    #[error("buffer region of {buffer_size} x {io_slots} bytes overflows usize")]
    RegionTooLarge { buffer_size: usize, io_slots: usize },

    /// The idle timeout was zero
    #[error("idle timeout must be non-zero")]
    ZeroIdleTimeout,
}

/// Immutable listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    local_addr: SocketAddr,
    backlog: u32,
    buffer_size: usize,
    max_connections: usize,
    max_accept_ops: usize,
    io_slots: usize,
    idle_timeout: Option<Duration>,
}

impl Settings {
    /// Starts a builder pre-filled with the defaults.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Address the listening socket binds to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Depth of the kernel accept queue.
    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    /// Size in bytes of one buffer segment.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Maximum number of admitted, not yet closed connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of accepts that may be posted at the same time.
    pub fn max_accept_ops(&self) -> usize {
        self.max_accept_ops
    }

    /// Number of I/O slots (and buffer segments).
    pub fn io_slots(&self) -> usize {
        self.io_slots
    }

    /// Silence after which a connection is closed, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Total size of the contiguous buffer region.
    pub fn region_size(&self) -> usize {
        self.buffer_size * self.io_slots
    }
}

impl Default for Settings {
    fn default() -> Self {
        let max_connections = DEFAULT_MAX_CONNECTIONS;
        Self {
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            backlog: DEFAULT_BACKLOG,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_connections,
            max_accept_ops: DEFAULT_MAX_ACCEPT_OPS,
            io_slots: max_connections * 2,
            idle_timeout: None,
        }
    }
}

/// Builder for [`Settings`].
///
/// When `io_slots` is never set explicitly it follows `max_connections`
/// (twice as many).
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    inner: Settings,
    io_slots_set: bool,
}

impl SettingsBuilder {
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.inner.local_addr = addr;
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.inner.backlog = backlog;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.inner.buffer_size = size;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.inner.max_connections = max;
        self
    }

    pub fn max_accept_ops(mut self, ops: usize) -> Self {
        self.inner.max_accept_ops = ops;
        self
    }

    pub fn io_slots(mut self, slots: usize) -> Self {
        self.inner.io_slots = slots;
        self.io_slots_set = true;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inner.idle_timeout = timeout;
        self
    }

    /// Validates and freezes the settings.
    pub fn build(self) -> Result<Settings, ConfigError> {
        let mut settings = self.inner;
        if !self.io_slots_set {
            settings.io_slots = settings.max_connections.saturating_mul(2);
        }

        if settings.backlog == 0 {
            return Err(ConfigError::Zero("backlog"));
        }
        if settings.buffer_size == 0 {
            return Err(ConfigError::Zero("buffer_size"));
        }
        if settings.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if settings.max_accept_ops == 0 {
            return Err(ConfigError::Zero("max_accept_ops"));
        }
        if settings.io_slots / 2 < settings.max_connections {
            return Err(ConfigError::NotEnoughSlots {
                io_slots: settings.io_slots,
                max_connections: settings.max_connections,
            });
        }
        if settings.buffer_size.checked_mul(settings.io_slots).is_none() {
            return Err(ConfigError::RegionTooLarge {
                buffer_size: settings.buffer_size,
                io_slots: settings.io_slots,
            });
        }
        if settings.idle_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroIdleTimeout);
        }

        Ok(settings)
    }
}
