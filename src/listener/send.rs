//! Send Pipeline
//!
//! Frames are appended to the connection's outbound queue by any caller. The
//! caller that flips the connection's `sending` flag spawns a drain; every
//! other caller just leaves its frame for that drain to pick up, so writes to
//! one socket never interleave.
//!
//! A drain holds one I/O slot and pushes each frame through the slot's
//! segment in `min(remaining, segment size)` chunks.

use super::close::close_connection;
use super::Shared;
use crate::connection::Connection;
use crate::pool::IoSlot;
use crate::protocol::OpCode;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Frames a payload and queues it. Returns true if this call started a drain.
pub(crate) fn post_send(
    shared: &Arc<Shared>,
    connection: &Arc<Connection>,
    opcode: OpCode,
    payload: &[u8],
) -> bool {
    if connection.is_closed() {
        debug!(conn = connection.id(), %opcode, "Dropping send to closed connection");
        return false;
    }
    let frame = shared
        .processor
        .build_message_pack(connection, opcode, payload);
    send_frame(shared, connection, frame)
}

/// Queues the processor's close-handshake frame.
pub(crate) fn post_close_handshake(
    shared: &Arc<Shared>,
    connection: &Arc<Connection>,
    reason: &str,
) -> bool {
    if connection.is_closed() {
        debug!(conn = connection.id(), "Dropping close handshake to closed connection");
        return false;
    }
    let frame = shared
        .processor
        .close_handshake_frame(connection, OpCode::Close, reason);
    send_frame(shared, connection, frame)
}

fn send_frame(shared: &Arc<Shared>, connection: &Arc<Connection>, frame: Bytes) -> bool {
    connection.enqueue(frame);
    if !connection.try_set_sending() {
        trace!(conn = connection.id(), "Queued behind in-flight drain");
        return false;
    }

    shared.spawn(send_loop(Arc::clone(shared), Arc::clone(connection)));
    true
}

async fn send_loop(shared: Arc<Shared>, connection: Arc<Connection>) {
    let Some(mut slot) = shared.io_slots.acquire().await else {
        connection.reset_sending();
        debug!(conn = connection.id(), "I/O slot pool closed, send abandoned");
        return;
    };
    slot.bind(&connection);

    match drain(&shared, &connection, &mut slot).await {
        Ok(()) => shared.io_slots.release(slot),
        Err(e) => {
            connection.reset_sending();
            if connection.is_closed() {
                debug!(conn = connection.id(), error = %e, "Send aborted by close");
            } else {
                warn!(conn = connection.id(), error = %e, "Write error");
            }
            close_connection(&shared, &connection, Some(slot), OpCode::Empty, "").await;
        }
    }
}

/// Writes queued frames until the queue is empty.
///
/// The caller must own the connection's `sending` flag; the flag is cleared
/// when the queue drains. A slot bound to any other connection is refused
/// before anything is dequeued. A frame that races in after the flag was cleared is
/// picked up by re-taking the flag, or left to whoever took it first.
pub(crate) async fn drain(
    shared: &Shared,
    connection: &Connection,
    slot: &mut IoSlot,
) -> io::Result<()> {
    if !slot.is_bound_to(connection) {
        error!(
            conn = connection.id(),
            slot = slot.id(),
            "Send slot not bound to its connection"
        );
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "send slot not bound to its connection",
        ));
    }

    loop {
        while let Some(frame) = connection.dequeue() {
            slot.begin_message(frame);
            while let Some(len) = slot.load_next_chunk() {
                let written = connection.write_chunk(&slot.segment()[..len]).await?;
                if written == 0 {
                    return Err(io::ErrorKind::WriteZero.into());
                }

                connection.touch();
                shared.stats.bytes_written(written);
                trace!(conn = connection.id(), bytes = written, "Sent");
                slot.advance(written);
            }
            slot.finish_message();
            shared.stats.message_sent();
        }

        connection.reset_sending();
        if connection.pending_sends() == 0 || !connection.try_set_sending() {
            return Ok(());
        }
    }
}
