//! Receive Pipeline
//!
//! One task per connection with a single read outstanding at a time. The
//! bytes of every read go through the message processor; the resulting
//! messages are dispatched to the observer in order.

use super::close::{close_connection, recycle_slot};
use super::events::notify;
use super::Shared;
use crate::connection::socket::wait_for_signal;
use crate::connection::Connection;
use crate::pool::IoSlot;
use crate::protocol::{OpCode, ReceiveOutcome};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// What woke the pipeline up.
enum Wakeup {
    Read(io::Result<usize>),
    Closed,
    Shutdown,
    IdleCheck,
}

/// What to do after a batch of messages was dispatched.
enum Next {
    Receive,
    Close(OpCode),
    Stop,
}

pub(crate) async fn receive_loop(
    shared: Arc<Shared>,
    connection: Arc<Connection>,
    mut slot: IoSlot,
    mut reader: OwnedReadHalf,
) {
    let mut closed = connection.closed_signal();
    let mut shutdown = shared.shutdown_signal();
    let idle_timeout = shared.settings.idle_timeout();

    loop {
        if connection.is_closed() {
            recycle_slot(&shared, Some(&connection), slot);
            return;
        }

        let idle_deadline =
            idle_timeout.map(|timeout| Instant::from_std(connection.last_activity() + timeout));

        let wakeup = tokio::select! {
            result = reader.read(slot.segment_mut()) => Wakeup::Read(result),
            _ = wait_for_signal(&mut closed) => Wakeup::Closed,
            _ = wait_for_signal(&mut shutdown) => Wakeup::Shutdown,
            _ = sleep_until(idle_deadline) => Wakeup::IdleCheck,
        };

        let n = match wakeup {
            Wakeup::Read(Ok(0)) => {
                debug!(conn = connection.id(), "Peer closed connection");
                close_connection(&shared, &connection, Some(slot), OpCode::Empty, "").await;
                return;
            }
            Wakeup::Read(Ok(n)) => n,
            Wakeup::Read(Err(e)) => {
                if e.kind() == io::ErrorKind::ConnectionReset {
                    debug!(conn = connection.id(), "Connection reset by peer");
                } else {
                    warn!(conn = connection.id(), error = %e, "Read error");
                }
                close_connection(&shared, &connection, Some(slot), OpCode::Empty, "").await;
                return;
            }
            Wakeup::Closed => {
                recycle_slot(&shared, Some(&connection), slot);
                return;
            }
            Wakeup::Shutdown => {
                close_connection(&shared, &connection, Some(slot), OpCode::Empty, "").await;
                return;
            }
            Wakeup::IdleCheck => {
                // Sends may have moved the deadline meanwhile
                if idle_timeout.is_some_and(|timeout| connection.idle_for() >= timeout) {
                    info!(conn = connection.id(), "Closing idle connection");
                    close_connection(
                        &shared,
                        &connection,
                        Some(slot),
                        OpCode::Close,
                        "idle timeout",
                    )
                    .await;
                    return;
                }
                continue;
            }
        };

        connection.touch();
        shared.stats.bytes_read(n);
        trace!(conn = connection.id(), bytes = n, "Received");

        let outcome = match shared
            .processor
            .try_receive_message(&connection, &slot.segment()[..n])
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(conn = connection.id(), error = %e, "Protocol error");
                let reason = e.to_string();
                close_connection(&shared, &connection, Some(slot), OpCode::Close, &reason).await;
                return;
            }
        };

        match dispatch(&shared, &connection, outcome) {
            Next::Receive => {}
            Next::Close(status) => {
                close_connection(&shared, &connection, Some(slot), status, "").await;
                return;
            }
            Next::Stop => {
                debug!(conn = connection.id(), "Processor stopped receiving");
                close_connection(
                    &shared,
                    &connection,
                    Some(slot),
                    OpCode::Close,
                    "receive stopped",
                )
                .await;
                return;
            }
        }
    }
}

/// Emits the notifications for one processed read.
fn dispatch(shared: &Shared, connection: &Arc<Connection>, outcome: ReceiveOutcome) -> Next {
    if outcome.handshake_completed {
        debug!(conn = connection.id(), "Handshake completed");
        notify("handshaked", connection, || {
            shared.events.on_handshaked(connection)
        });
    }

    for message in &outcome.messages {
        match message.opcode {
            OpCode::Close => {
                let status = shared.processor.get_close_status(&message.payload);
                debug!(conn = connection.id(), status = %status, "Close requested by peer");
                return Next::Close(status);
            }
            OpCode::Ping => {
                shared.stats.message_received();
                notify("ping", connection, || shared.events.on_ping(connection, message));
            }
            OpCode::Pong => {
                shared.stats.message_received();
                notify("pong", connection, || shared.events.on_pong(connection, message));
            }
            _ => {
                shared.stats.message_received();
                notify("data_received", connection, || {
                    shared.events.on_data_received(connection, message)
                });
            }
        }
    }

    if outcome.continue_receiving {
        Next::Receive
    } else {
        Next::Stop
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
