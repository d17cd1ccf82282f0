//! Per-Client Connection State
//!
//! A [`Connection`] is created by the accept loop for every admitted client
//! and shared (behind an `Arc`) by the receive pipeline, any in-flight send
//! drain, the close path and the application.
//!
//! ## Concurrency
//!
//! Only a few fields are touched from more than one task, and each is
//! synchronised on its own:
//!
//! ```text
//!   outbound   Mutex<VecDeque<Bytes>>   producers: any post_send caller
//!   sending    AtomicBool (CAS)          owner: the single active drain
//!   closing    AtomicBool (swap)         winner: the first close path
//!   admitted   AtomicBool (swap)         gate permit returned exactly once
//!   writer     tokio Mutex               drain writes, close shuts down
//! ```
//!
//! The read half of the socket is not stored here: the receive pipeline
//! owns it outright.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;

/// One accepted client.
pub struct Connection {
    /// Listener-unique id
    id: u64,

    /// Peer address
    remote_addr: SocketAddr,

    /// When the connection was accepted
    created: Instant,

    /// Milliseconds since `created` of the last receive or send completion
    last_activity_ms: AtomicU64,

    /// Set by the first close path to run
    closing: AtomicBool,

    /// True while the connection still holds an admission permit
    admitted: AtomicBool,

    /// Single-flight send flag
    sending: AtomicBool,

    /// Set by the message processor once its handshake completed
    handshaked: AtomicBool,

    /// Framed messages waiting to be written
    outbound: Mutex<VecDeque<Bytes>>,

    /// Reassembly buffer owned by the message processor
    receive_buffer: Mutex<BytesMut>,

    /// Write half of the socket; taken by the close path
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,

    /// Flipped to true once the connection is torn down
    closed_tx: watch::Sender<bool>,
}

impl Connection {
    fn with_writer(id: u64, remote_addr: SocketAddr, writer: Option<OwnedWriteHalf>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            remote_addr,
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            admitted: AtomicBool::new(true),
            sending: AtomicBool::new(false),
            handshaked: AtomicBool::new(false),
            outbound: Mutex::new(VecDeque::new()),
            receive_buffer: Mutex::new(BytesMut::new()),
            writer: tokio::sync::Mutex::new(writer),
            closed_tx,
        }
    }

    /// Creates the state for a freshly accepted socket.
    pub(crate) fn accepted(id: u64, remote_addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self::with_writer(id, remote_addr, Some(writer))
    }

    /// Creates a connection with no socket behind it.
    ///
    /// Writes fail with `NotConnected`. Useful for exercising message
    /// processors and queueing logic without a network.
    pub fn detached(id: u64, remote_addr: SocketAddr) -> Self {
        Self::with_writer(id, remote_addr, None)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Records receive or send activity.
    pub fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Instant of the last recorded activity.
    pub fn last_activity(&self) -> Instant {
        self.created + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Returns true once a close path has started for this connection.
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Claims the close path. Only the first caller gets `true`.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    /// Gives up the admission permit. Only the first caller gets `true`.
    pub(crate) fn take_admission(&self) -> bool {
        self.admitted.swap(false, Ordering::AcqRel)
    }

    /// Tries to become the connection's single sender.
    pub fn try_set_sending(&self) -> bool {
        self.sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clears the single-flight send flag.
    pub fn reset_sending(&self) {
        self.sending.store(false, Ordering::Release);
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// Appends a framed message to the outbound queue.
    pub fn enqueue(&self, frame: Bytes) {
        self.outbound.lock().unwrap().push_back(frame);
    }

    /// Removes the oldest queued frame.
    pub fn dequeue(&self) -> Option<Bytes> {
        self.outbound.lock().unwrap().pop_front()
    }

    /// Number of frames waiting to be written.
    pub fn pending_sends(&self) -> usize {
        self.outbound.lock().unwrap().len()
    }

    /// Drops every queued frame and returns how many were dropped.
    pub fn clear_outbound(&self) -> usize {
        let mut queue = self.outbound.lock().unwrap();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    /// Returns true once the processor reported a completed handshake.
    pub fn is_handshaked(&self) -> bool {
        self.handshaked.load(Ordering::Acquire)
    }

    /// Marks the handshake as completed.
    pub fn set_handshaked(&self) {
        self.handshaked.store(true, Ordering::Release);
    }

    /// Buffer the message processor uses to hold partial frames.
    ///
    /// Only the receive pipeline calls into the processor for a given
    /// connection, so the lock is uncontended.
    pub fn receive_buffer(&self) -> MutexGuard<'_, BytesMut> {
        self.receive_buffer.lock().unwrap()
    }

    /// Subscribes to the connection's teardown signal.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Fires the teardown signal, aborting pending reads and writes.
    pub(crate) fn signal_closed(&self) {
        self.closed_tx.send_replace(true);
    }

    /// Writes one chunk, returning how many bytes the socket accepted.
    ///
    /// Aborts with `NotConnected` if the connection is torn down meanwhile.
    pub(crate) async fn write_chunk(&self, chunk: &[u8]) -> io::Result<usize> {
        let mut closed = self.closed_signal();
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection writer already closed",
            ));
        };

        tokio::select! {
            result = stream.write(chunk) => result,
            _ = wait_for_signal(&mut closed) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed during write",
            )),
        }
    }

    /// Takes the write half and shuts it down.
    pub(crate) async fn shutdown_writer(&self) -> io::Result<()> {
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut stream) => stream.shutdown().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closing", &self.is_closed())
            .field("sending", &self.is_sending())
            .finish()
    }
}

/// Resolves once the watched flag becomes true.
///
/// Never resolves if the sender is gone without having set the flag.
pub(crate) async fn wait_for_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
