//! Socket Listener
//!
//! The connection-handling core: it accepts clients under an admission limit,
//! runs one receive pipeline per connection, serializes outbound writes and
//! tears connections down exactly once.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │      SocketListener      │
//!                 └────────────┬─────────────┘
//!                              │ Arc<Shared>
//!        ┌─────────────────────┼──────────────────────┐
//!        ▼                     ▼                      ▼
//!  ┌───────────┐        ┌─────────────┐        ┌─────────────┐
//!  │  accept   │───────▶│   receive   │───────▶│    close    │
//!  │ workers   │ spawn  │ (per conn)  │        │ (once/conn) │
//!  └─────┬─────┘        └──────┬──────┘        └──────▲──────┘
//!        │ gate permit         │ processor            │
//!        ▼                     ▼                      │
//!  ┌───────────┐        ┌─────────────┐        ┌──────┴──────┐
//!  │ Admission │        │   events    │        │    send     │
//!  │   Gate    │        │ (observer)  │        │ (per drain) │
//!  └───────────┘        └─────────────┘        └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - `gate`: the admission semaphore
//! - `events`: the notification observer and its channel adapter
//! - `accept`: accept workers and hand-off to a receive pipeline
//! - `receive`: the per-connection read loop
//! - `send`: single-flight, chunked send drains
//! - `close`: connection teardown

pub mod events;
pub mod gate;

mod accept;
mod close;
mod receive;
mod send;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{ConnectionEvent, ConnectionEvents, EventSender, NoopEvents};
pub use gate::AdmissionGate;

use crate::config::Settings;
use crate::connection::{Connection, ConnectionStats};
use crate::pool::{AcceptSlotPool, IoSlotPool};
use crate::protocol::{MessageProcessor, OpCode};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info};

/// Errors returned by [`SocketListener::start_listen`].
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Binding or listening on the socket failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("listener is already started")]
    AlreadyStarted,

    #[error("listener has been disposed")]
    Disposed,

    /// `start_listen` was called outside a Tokio runtime
    #[error("no Tokio runtime available")]
    NoRuntime,
}

/// State shared by the listener handle and all of its tasks.
pub(crate) struct Shared {
    pub(crate) settings: Settings,
    pub(crate) gate: AdmissionGate,
    pub(crate) io_slots: IoSlotPool,
    pub(crate) accept_slots: AcceptSlotPool,
    pub(crate) processor: Arc<dyn MessageProcessor>,
    pub(crate) events: Arc<dyn ConnectionEvents>,
    pub(crate) stats: ConnectionStats,
    running: AtomicBool,
    started: AtomicBool,
    disposed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    next_id: AtomicU64,
    runtime: OnceLock<Handle>,
    local_addr: OnceLock<SocketAddr>,
}

impl Shared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Subscribes to the listener-wide shutdown signal.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawns a pipeline task on the listener's runtime.
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.runtime.get().cloned().or_else(|| Handle::try_current().ok()) {
            Some(handle) => {
                handle.spawn(task);
            }
            None => error!("No Tokio runtime to run pipeline task on"),
        }
    }
}

/// Handle to a listening socket server.
///
/// Dropping the handle disposes the listener.
///
/// # Example
///
/// ```no_run
/// use flashsock::config::Settings;
/// use flashsock::listener::{ConnectionEvent, EventSender, SocketListener};
/// use flashsock::protocol::FrameProcessor;
///
/// # async fn run() -> anyhow::Result<()> {
/// let (events, mut rx) = EventSender::channel();
/// let listener = SocketListener::new(Settings::default(), FrameProcessor::new(), events);
/// listener.start_listen()?;
///
/// while let Some(event) = rx.recv().await {
///     if let ConnectionEvent::DataReceived(conn, message) = event {
///         listener.post_send(&conn, &message.payload);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SocketListener {
    shared: Arc<Shared>,
}

impl SocketListener {
    /// Allocates the buffer region and pools. Nothing is bound until
    /// [`start_listen`](Self::start_listen).
    pub fn new<P, E>(settings: Settings, processor: P, events: E) -> Self
    where
        P: MessageProcessor,
        E: ConnectionEvents,
    {
        let (shutdown_tx, _) = watch::channel(false);
        let shared = Shared {
            gate: AdmissionGate::new(settings.max_connections()),
            io_slots: IoSlotPool::new(settings.buffer_size(), settings.io_slots()),
            accept_slots: AcceptSlotPool::new(settings.max_accept_ops()),
            processor: Arc::new(processor),
            events: Arc::new(events),
            stats: ConnectionStats::new(),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            shutdown_tx,
            next_id: AtomicU64::new(1),
            runtime: OnceLock::new(),
            local_addr: OnceLock::new(),
            settings,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    /// Binds the listening socket and starts the accept workers.
    ///
    /// Must be called from within a Tokio runtime. Returns the bound address,
    /// which differs from the configured one when port 0 was requested.
    pub fn start_listen(&self) -> Result<SocketAddr, ListenerError> {
        let handle = Handle::try_current().map_err(|_| ListenerError::NoRuntime)?;
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(ListenerError::Disposed);
        }
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(ListenerError::AlreadyStarted);
        }

        let (listener, addr) = match bind(&self.shared.settings) {
            Ok((listener, addr)) => (Arc::new(listener), addr),
            Err(e) => {
                self.shared.started.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        let _ = self.shared.runtime.set(handle.clone());
        let _ = self.shared.local_addr.set(addr);
        self.shared.running.store(true, Ordering::Release);

        let settings = &self.shared.settings;
        info!(
            addr = %addr,
            max_connections = settings.max_connections(),
            accept_workers = settings.max_accept_ops(),
            io_slots = settings.io_slots(),
            buffer_size = settings.buffer_size(),
            "Listening"
        );

        for worker in 0..settings.max_accept_ops() {
            handle.spawn(accept::accept_loop(
                Arc::clone(&self.shared),
                Arc::clone(&listener),
                worker,
            ));
        }

        Ok(addr)
    }

    /// Stops accepting and tears down every connection. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.running.store(false, Ordering::Release);
        self.shared.shutdown_tx.send_replace(true);
        self.shared.io_slots.close();
        self.shared.io_slots.reset_all();
        self.shared.accept_slots.clear();

        info!(
            active = self.shared.stats.active(),
            "Listener disposed"
        );
    }

    /// Queues a binary message. Returns true if this call started a drain.
    pub fn post_send(&self, connection: &Arc<Connection>, payload: &[u8]) -> bool {
        self.post_send_with(connection, OpCode::Binary, payload)
    }

    /// Queues a message with an explicit opcode. Returns true if this call
    /// started a drain.
    pub fn post_send_with(
        &self,
        connection: &Arc<Connection>,
        opcode: OpCode,
        payload: &[u8],
    ) -> bool {
        send::post_send(&self.shared, connection, opcode, payload)
    }

    /// Sends a `ping` control message.
    pub fn ping(&self, connection: &Arc<Connection>) -> bool {
        self.post_send_with(connection, OpCode::Ping, b"ping")
    }

    /// Sends a `pong` control message.
    pub fn pong(&self, connection: &Arc<Connection>) -> bool {
        self.post_send_with(connection, OpCode::Pong, b"pong")
    }

    /// Sends the processor's close-handshake frame without closing.
    pub fn close_handshake(&self, connection: &Arc<Connection>, reason: &str) -> bool {
        send::post_close_handshake(&self.shared, connection, reason)
    }

    /// Closes a connection, sending a close handshake carrying `reason` first.
    ///
    /// Completes once the connection is torn down. Closing an already closed
    /// connection does nothing.
    pub async fn close(&self, connection: &Arc<Connection>, reason: &str) {
        close::close_connection(&self.shared, connection, None, OpCode::Close, reason).await;
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.get().copied()
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    /// Admission permits currently free.
    pub fn available_permits(&self) -> usize {
        self.shared.gate.available()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn bind(settings: &Settings) -> io::Result<(TcpListener, SocketAddr)> {
    let addr = settings.local_addr();
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(settings.backlog())?;
    let bound = listener.local_addr()?;
    Ok((listener, bound))
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::protocol::FrameProcessor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpStream;

    #[test]
    fn test_start_outside_runtime() {
        let (events, _rx) = EventSender::channel();
        let listener =
            SocketListener::new(settings().build().unwrap(), FrameProcessor::new(), events);
        assert!(matches!(listener.start_listen(), Err(ListenerError::NoRuntime)));
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_start_twice() {
        let server = start_server(settings());
        assert!(server.listener.is_running());
        assert_eq!(server.listener.local_addr(), Some(server.addr));
        assert!(matches!(
            server.listener.start_listen(),
            Err(ListenerError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_bind_failure_can_be_retried() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = settings()
            .local_addr(blocker.local_addr().unwrap())
            .build()
            .unwrap();
        let (events, _rx) = EventSender::channel();
        let listener = SocketListener::new(taken, FrameProcessor::new(), events);

        assert!(matches!(listener.start_listen(), Err(ListenerError::Io(_))));
        assert!(!listener.is_running());

        drop(blocker);
        assert!(listener.start_listen().is_ok());
        assert!(listener.is_running());
    }

    #[tokio::test]
    async fn test_connect_and_receive_data() {
        let mut server = start_server(settings());
        let mut client = server.connect().await;
        let conn = server.expect_connected().await;
        assert_eq!(server.listener.stats().active(), 1);

        write_frame(&mut client, OpCode::Text, b"hello").await;
        match server.next_event().await {
            ConnectionEvent::DataReceived(c, message) => {
                assert_eq!(c.id(), conn.id());
                assert_eq!(message.opcode, OpCode::Text);
                assert_eq!(message.payload, "hello");
            }
            other => panic!("expected DataReceived, got {other:?}"),
        }
        assert_eq!(server.listener.stats().bytes_read.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let mut server = start_server(settings());
        let mut client = server.connect().await;
        let conn = server.expect_connected().await;

        write_frame(&mut client, OpCode::Binary, b"echo me").await;
        let ConnectionEvent::DataReceived(_, message) = server.next_event().await else {
            panic!("expected DataReceived");
        };
        assert!(server.listener.post_send(&conn, &message.payload));

        let (opcode, payload) = read_frame(&mut client).await;
        assert_eq!(opcode, OpCode::Binary);
        assert_eq!(payload, b"echo me");
    }

    #[tokio::test]
    async fn test_admission_limit_holds_second_client() {
        let mut server = start_server(settings().max_connections(1));
        let first = server.connect().await;
        let first_conn = server.expect_connected().await;

        let _second = server.connect().await;
        server.expect_no_event(Duration::from_millis(200)).await;
        assert_eq!(server.listener.available_permits(), 0);

        drop(first);
        let gone = server.expect_disconnected().await;
        assert_eq!(gone.id(), first_conn.id());

        let second_conn = server.expect_connected().await;
        assert_ne!(second_conn.id(), first_conn.id());
        assert_eq!(server.listener.stats().active(), 1);
    }

    #[tokio::test]
    async fn test_handshake_precedes_messages() {
        let mut server = start_with(
            settings(),
            FrameProcessor::new().with_handshake("FSOCK/1\n"),
        );
        let mut client = server.connect().await;
        server.expect_connected().await;

        let mut bytes = b"FSOCK/1\n".to_vec();
        bytes.extend_from_slice(&crate::protocol::encode_frame(OpCode::Text, b"first"));
        write_raw(&mut client, &bytes).await;

        assert!(matches!(server.next_event().await, ConnectionEvent::Handshaked(_)));
        assert!(matches!(
            server.next_event().await,
            ConnectionEvent::DataReceived(_, m) if m.payload == "first"
        ));
    }

    struct PanickyEvents {
        inner: EventSender,
        calls: AtomicUsize,
    }

    impl ConnectionEvents for PanickyEvents {
        fn on_connected(&self, connection: &Arc<Connection>) -> anyhow::Result<()> {
            self.inner.on_connected(connection)
        }

        fn on_disconnected(&self, connection: &Arc<Connection>) -> anyhow::Result<()> {
            self.inner.on_disconnected(connection)
        }

        fn on_data_received(
            &self,
            connection: &Arc<Connection>,
            message: &crate::protocol::DecodedMessage,
        ) -> anyhow::Result<()> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => panic!("observer bug"),
                1 => anyhow::bail!("observer refused message"),
                _ => self.inner.on_data_received(connection, message),
            }
        }
    }

    #[tokio::test]
    async fn test_observer_failures_do_not_break_pipeline() {
        let (inner, rx) = EventSender::channel();
        let events = PanickyEvents {
            inner,
            calls: AtomicUsize::new(0),
        };
        let mut server = start_custom(settings(), FrameProcessor::new(), events, rx);
        let mut client = server.connect().await;
        server.expect_connected().await;

        write_frame(&mut client, OpCode::Text, b"one").await;
        write_frame(&mut client, OpCode::Text, b"two").await;
        write_frame(&mut client, OpCode::Text, b"three").await;

        match server.next_event().await {
            ConnectionEvent::DataReceived(_, m) => assert_eq!(m.payload, "three"),
            other => panic!("expected DataReceived, got {other:?}"),
        }
        assert_eq!(server.listener.stats().active(), 1);
    }

    #[tokio::test]
    async fn test_dispose_closes_everything() {
        let mut server = start_server(settings());
        let mut client = server.connect().await;
        server.expect_connected().await;

        server.listener.dispose();
        server.expect_disconnected().await;
        assert!(!server.listener.is_running());
        assert_eq!(read_to_eof(&mut client).await, 0);

        // Idempotent
        server.listener.dispose();
        assert!(matches!(
            server.listener.start_listen(),
            Err(ListenerError::Disposed)
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(server.addr).await.is_err());
        assert_eq!(
            server.listener.available_permits(),
            server.listener.settings().max_connections()
        );
    }
}
