//! Connection Notifications
//!
//! The listener reports lifecycle and message events to the owning
//! application through a [`ConnectionEvents`] observer. Observers run inline
//! on the pipeline that produced the event, so a connection's events arrive
//! in order; they should hand heavy work off rather than block.
//!
//! An observer that returns an error or panics is logged and otherwise
//! ignored: the pipeline carries on and the connection stays open.
//!
//! [`EventSender`] adapts the observer to a channel of [`ConnectionEvent`]
//! values for applications that prefer to consume events in their own task.

use crate::connection::Connection;
use crate::protocol::DecodedMessage;
use anyhow::anyhow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

/// Observer for listener notifications. Every method defaults to a no-op.
pub trait ConnectionEvents: Send + Sync + 'static {
    /// A connection was admitted and bound to an I/O slot.
    fn on_connected(&self, _connection: &Arc<Connection>) -> anyhow::Result<()> {
        Ok(())
    }

    /// The message processor completed the connection's handshake.
    fn on_handshaked(&self, _connection: &Arc<Connection>) -> anyhow::Result<()> {
        Ok(())
    }

    /// The connection was closed and its permit returned.
    fn on_disconnected(&self, _connection: &Arc<Connection>) -> anyhow::Result<()> {
        Ok(())
    }

    /// A data message arrived.
    fn on_data_received(
        &self,
        _connection: &Arc<Connection>,
        _message: &DecodedMessage,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A ping arrived.
    fn on_ping(
        &self,
        _connection: &Arc<Connection>,
        _message: &DecodedMessage,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A pong arrived.
    fn on_pong(
        &self,
        _connection: &Arc<Connection>,
        _message: &DecodedMessage,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl ConnectionEvents for NoopEvents {}

/// A notification as a value.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected(Arc<Connection>),
    Handshaked(Arc<Connection>),
    Disconnected(Arc<Connection>),
    DataReceived(Arc<Connection>, DecodedMessage),
    Ping(Arc<Connection>, DecodedMessage),
    Pong(Arc<Connection>, DecodedMessage),
}

impl ConnectionEvent {
    /// The connection the event is about.
    pub fn connection(&self) -> &Arc<Connection> {
        match self {
            ConnectionEvent::Connected(c)
            | ConnectionEvent::Handshaked(c)
            | ConnectionEvent::Disconnected(c)
            | ConnectionEvent::DataReceived(c, _)
            | ConnectionEvent::Ping(c, _)
            | ConnectionEvent::Pong(c, _) => c,
        }
    }

    /// Short name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionEvent::Connected(_) => "connected",
            ConnectionEvent::Handshaked(_) => "handshaked",
            ConnectionEvent::Disconnected(_) => "disconnected",
            ConnectionEvent::DataReceived(..) => "data_received",
            ConnectionEvent::Ping(..) => "ping",
            ConnectionEvent::Pong(..) => "pong",
        }
    }
}

/// Forwards every notification onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSender {
    /// Creates the sender together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ConnectionEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|e| anyhow!("event receiver dropped, lost {} event", e.0.kind()))
    }
}

impl ConnectionEvents for EventSender {
    fn on_connected(&self, connection: &Arc<Connection>) -> anyhow::Result<()> {
        self.forward(ConnectionEvent::Connected(Arc::clone(connection)))
    }

    fn on_handshaked(&self, connection: &Arc<Connection>) -> anyhow::Result<()> {
        self.forward(ConnectionEvent::Handshaked(Arc::clone(connection)))
    }

    fn on_disconnected(&self, connection: &Arc<Connection>) -> anyhow::Result<()> {
        self.forward(ConnectionEvent::Disconnected(Arc::clone(connection)))
    }

    fn on_data_received(
        &self,
        connection: &Arc<Connection>,
        message: &DecodedMessage,
    ) -> anyhow::Result<()> {
        self.forward(ConnectionEvent::DataReceived(
            Arc::clone(connection),
            message.clone(),
        ))
    }

    fn on_ping(
        &self,
        connection: &Arc<Connection>,
        message: &DecodedMessage,
    ) -> anyhow::Result<()> {
        self.forward(ConnectionEvent::Ping(Arc::clone(connection), message.clone()))
    }

    fn on_pong(
        &self,
        connection: &Arc<Connection>,
        message: &DecodedMessage,
    ) -> anyhow::Result<()> {
        self.forward(ConnectionEvent::Pong(Arc::clone(connection), message.clone()))
    }
}

/// Runs one observer callback, containing its errors and panics.
pub(crate) fn notify<F>(event: &'static str, connection: &Connection, callback: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(conn = connection.id(), event, error = %e, "Observer failed");
        }
        Err(_) => {
            error!(conn = connection.id(), event, "Observer panicked");
        }
    }
}
