//! Accept Workers
//!
//! `max_accept_ops` workers share the listening socket. Each holds an
//! admission permit while its accept is posted, so at most `max_connections`
//! sockets are ever accepted and not yet closed.

use super::close;
use super::events::notify;
use super::receive;
use super::Shared;
use crate::connection::socket::wait_for_signal;
use crate::connection::Connection;
use crate::pool::AcceptSlot;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) async fn accept_loop(shared: Arc<Shared>, listener: Arc<TcpListener>, worker: usize) {
    let mut shutdown = shared.shutdown_signal();
    debug!(worker, "Accept worker started");

    while shared.is_running() {
        let admitted = tokio::select! {
            admitted = shared.gate.acquire() => admitted,
            _ = wait_for_signal(&mut shutdown) => false,
        };
        if !admitted {
            break;
        }
        if !shared.is_running() {
            shared.gate.release();
            break;
        }

        let slot = shared.accept_slots.take();
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = wait_for_signal(&mut shutdown) => {
                shared.accept_slots.put(slot);
                shared.gate.release();
                break;
            }
        };

        let failed = accepted.is_err();
        complete_accept(&shared, worker, slot, accepted).await;
        if failed {
            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
        }
    }

    debug!(worker, "Accept worker stopped");
}

/// Finishes one posted accept. The caller holds an admission permit, which
/// either passes to the new connection or is released here along with the
/// accept slot.
async fn complete_accept(
    shared: &Arc<Shared>,
    worker: usize,
    mut slot: AcceptSlot,
    accepted: io::Result<(TcpStream, SocketAddr)>,
) {
    match accepted {
        Ok((stream, addr)) => {
            slot.fill(stream, addr);
            hand_off(shared, slot).await;
        }
        Err(e) => {
            shared.stats.accept_failed();
            warn!(worker, error = %e, "Failed to accept connection");
            slot.reset();
            shared.accept_slots.put(slot);
            shared.gate.release();
        }
    }
}

/// Moves an accepted socket onto an I/O slot and starts its receive pipeline.
async fn hand_off(shared: &Arc<Shared>, mut accept_slot: AcceptSlot) {
    let Some(mut io_slot) = shared.io_slots.acquire().await else {
        debug!("I/O slot pool closed, dropping accepted socket");
        shared.accept_slots.put(accept_slot);
        shared.gate.release();
        return;
    };

    let Some((stream, addr)) = accept_slot.take() else {
        error!(slot = io_slot.id(), "Accept slot empty at hand-off");
        close::recycle_slot(shared, None, io_slot);
        shared.accept_slots.put(accept_slot);
        shared.gate.release();
        return;
    };
    shared.accept_slots.put(accept_slot);

    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    let connection = Arc::new(Connection::accepted(
        shared.next_connection_id(),
        addr,
        writer,
    ));
    io_slot.bind(&connection);

    shared.stats.connection_opened();
    info!(
        conn = connection.id(),
        client = %addr,
        slot = io_slot.id(),
        "Client connected"
    );
    notify("connected", &connection, || {
        shared.events.on_connected(&connection)
    });

    shared.spawn(receive::receive_loop(
        Arc::clone(shared),
        connection,
        io_slot,
        reader,
    ));
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::{complete_accept, hand_off};
    use crate::pool::AcceptSlot;
    use std::io;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_each_client_gets_a_distinct_connection() {
        let mut server = start_server(settings().max_accept_ops(2));
        let _a = server.connect().await;
        let _b = server.connect().await;
        let _c = server.connect().await;

        let mut ids = vec![
            server.expect_connected().await.id(),
            server.expect_connected().await.id(),
            server.expect_connected().await.id(),
        ];
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);

        let stats = server.listener.stats();
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 3);
        assert_eq!(stats.active(), 3);
    }

    #[tokio::test]
    async fn test_parked_accepts_hold_permits() {
        let server = start_server(settings().max_connections(4).max_accept_ops(2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Both workers are waiting in accept, each holding a permit
        assert_eq!(server.listener.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_accept_slot_returns_to_pool() {
        let mut server = start_server(settings());
        let _client = server.connect().await;
        server.expect_connected().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let accept_slots = &server.listener.shared.accept_slots;
        assert!(accept_slots.allocated() <= server.listener.settings().max_accept_ops());
    }

    #[tokio::test]
    async fn test_failed_accept_returns_permit_and_slot() {
        let listener = unstarted(settings().max_connections(2));
        let shared = &listener.shared;
        let permits = listener.available_permits();
        let pooled = shared.accept_slots.len();

        assert!(shared.gate.acquire().await);
        let slot = shared.accept_slots.take();
        let error = io::Error::other("too many open files");
        complete_accept(shared, 0, slot, Err(error)).await;

        assert_eq!(listener.available_permits(), permits);
        assert_eq!(shared.accept_slots.len(), pooled);
        assert_eq!(listener.stats().accept_errors.load(Ordering::Relaxed), 1);
        assert_eq!(listener.stats().active(), 0);
    }

    #[tokio::test]
    async fn test_hand_off_to_closed_slot_pool_drops_socket() {
        let listener = unstarted(settings().max_connections(2));
        let shared = &listener.shared;
        let permits = listener.available_permits();
        let pooled = shared.accept_slots.len();
        shared.io_slots.close();

        let (accepted, mut client) = socket_pair().await;
        assert!(shared.gate.acquire().await);
        let slot = shared.accept_slots.take();
        complete_accept(shared, 0, slot, Ok(accepted)).await;

        assert_eq!(listener.available_permits(), permits);
        assert_eq!(shared.accept_slots.len(), pooled);
        assert_eq!(listener.stats().active(), 0);
        assert_eq!(read_to_eof(&mut client).await, 0);
    }

    #[tokio::test]
    async fn test_hand_off_of_empty_accept_slot() {
        let listener = unstarted(settings());
        let shared = &listener.shared;
        let permits = listener.available_permits();

        assert!(shared.gate.acquire().await);
        hand_off(shared, AcceptSlot::default()).await;

        assert_eq!(listener.available_permits(), permits);
        assert_eq!(shared.io_slots.available(), listener.settings().io_slots());
        assert_eq!(listener.stats().active(), 0);
    }
}
