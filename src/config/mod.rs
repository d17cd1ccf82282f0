//! Configuration Module
//!
//! Holds the immutable [`Settings`] the listener is built from. Loading the
//! values (flags, files, environment) is the embedding application's job;
//! the `flashsock` binary parses a handful of command-line flags.

pub mod settings;

pub use settings::{
    ConfigError, Settings, SettingsBuilder, DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_ACCEPT_OPS, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT,
};
