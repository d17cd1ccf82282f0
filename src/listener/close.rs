//! Close Path
//!
//! Every way a connection can end funnels through [`close_connection`]:
//!
//! 1. Send a close-handshake frame, unless the status is [`OpCode::Empty`].
//! 2. Fire the connection's closed signal, drop queued frames and shut the
//!    write half down.
//! 3. Return the admission permit, update stats, emit `Disconnected`.
//! 4. Recycle the I/O slot handed in by the calling pipeline.
//!
//! Steps 1 to 3 run for the first caller only. Later callers (for example a
//! send drain failing after the receive pipeline already closed) only
//! recycle their slot.

use super::events::notify;
use super::send;
use super::Shared;
use crate::connection::Connection;
use crate::pool::IoSlot;
use crate::protocol::OpCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Upper bound for the close handshake write and the socket shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) async fn close_connection(
    shared: &Arc<Shared>,
    connection: &Arc<Connection>,
    slot: Option<IoSlot>,
    status: OpCode,
    reason: &str,
) {
    if connection.begin_close() {
        if status != OpCode::Empty {
            send_close_handshake(shared, connection, status, reason).await;
        }

        connection.signal_closed();
        let dropped = connection.clear_outbound();
        if dropped > 0 {
            debug!(conn = connection.id(), dropped, "Discarded queued frames");
        }

        match timeout(CLOSE_TIMEOUT, connection.shutdown_writer()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = connection.id(), error = %e, "Socket shutdown failed"),
            Err(_) => debug!(conn = connection.id(), "Socket shutdown timed out"),
        }

        if connection.take_admission() {
            shared.gate.release();
            shared.stats.connection_closed();
            info!(
                conn = connection.id(),
                client = %connection.remote_addr(),
                "Client disconnected"
            );
            notify("disconnected", connection, || {
                shared.events.on_disconnected(connection)
            });
        }
    }

    if let Some(slot) = slot {
        recycle_slot(shared, Some(connection), slot);
    }
}

/// Writes the close-handshake frame before teardown.
///
/// If another drain owns the connection the frame is only queued; teardown
/// then aborts that drain, so delivery is best effort.
async fn send_close_handshake(
    shared: &Shared,
    connection: &Arc<Connection>,
    status: OpCode,
    reason: &str,
) {
    let frame = shared
        .processor
        .close_handshake_frame(connection, status, reason);
    connection.enqueue(frame);

    if !connection.try_set_sending() {
        debug!(conn = connection.id(), "Close handshake queued behind in-flight drain");
        return;
    }

    let Ok(Some(mut slot)) = timeout(CLOSE_TIMEOUT, shared.io_slots.acquire()).await else {
        connection.reset_sending();
        debug!(conn = connection.id(), "No I/O slot for close handshake");
        return;
    };
    slot.bind(connection);

    match timeout(CLOSE_TIMEOUT, send::drain(shared, connection, &mut slot)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            connection.reset_sending();
            debug!(conn = connection.id(), error = %e, "Close handshake not delivered");
        }
        Err(_) => {
            connection.reset_sending();
            debug!(conn = connection.id(), "Close handshake timed out");
        }
    }
    shared.io_slots.release(slot);
}

/// Returns an I/O slot to the pool.
pub(crate) fn recycle_slot(shared: &Shared, connection: Option<&Arc<Connection>>, slot: IoSlot) {
    if let Some(connection) = connection {
        if slot.connection().is_some() && !slot.is_bound_to(connection) {
            error!(
                conn = connection.id(),
                slot = slot.id(),
                "Recycling I/O slot bound to another connection"
            );
        }
    }
    shared.io_slots.release(slot);
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::protocol::OpCode;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_close_releases_permit_once() {
        let mut server = start_server(settings().max_connections(4));
        let mut client = server.connect().await;
        let conn = server.expect_connected().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One permit for the connection, one for the parked accept
        assert_eq!(server.listener.available_permits(), 2);

        tokio::join!(
            server.listener.close(&conn, "first"),
            server.listener.close(&conn, "second"),
        );

        server.expect_disconnected().await;
        server.expect_no_event(Duration::from_millis(200)).await;
        assert_eq!(server.listener.available_permits(), 3);
        assert_eq!(server.listener.stats().active(), 0);

        let (opcode, payload) = read_frame(&mut client).await;
        assert_eq!(opcode, OpCode::Close);
        assert_eq!(payload, b"first");
        assert_eq!(read_to_eof(&mut client).await, 0);
    }

    #[tokio::test]
    async fn test_close_after_peer_left_is_a_no_op() {
        let mut server = start_server(settings());
        let client = server.connect().await;
        let conn = server.expect_connected().await;

        drop(client);
        server.expect_disconnected().await;

        server.listener.close(&conn, "too late").await;
        server.expect_no_event(Duration::from_millis(100)).await;
        assert_eq!(
            server.listener.available_permits(),
            server.listener.settings().max_connections() - 1
        );
    }

    #[tokio::test]
    async fn test_pools_are_whole_after_churn() {
        let mut server = start_server(settings().max_connections(2));
        for _ in 0..10 {
            let mut client = server.connect().await;
            let conn = server.expect_connected().await;
            server.listener.post_send(&conn, b"hi");
            read_frame(&mut client).await;
            drop(client);
            server.expect_disconnected().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let listener = &server.listener;
        assert_eq!(listener.shared.io_slots.available(), listener.settings().io_slots());
        assert_eq!(listener.available_permits(), 1);
        assert_eq!(listener.stats().active(), 0);
    }
}
