//! Helpers for listener tests: a server on an ephemeral port and a raw
//! frame client.

use super::{ConnectionEvent, ConnectionEvents, EventSender, NoopEvents, SocketListener};
use crate::config::{Settings, SettingsBuilder};
use crate::connection::Connection;
use crate::protocol::{encode_frame, FrameProcessor, MessageProcessor, OpCode, HEADER_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

pub(crate) const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Small pools on an ephemeral loopback port, one accept worker.
pub(crate) fn settings() -> SettingsBuilder {
    Settings::builder()
        .local_addr("127.0.0.1:0".parse().unwrap())
        .max_connections(8)
        .max_accept_ops(1)
        .buffer_size(64)
}

/// A listener that was built but never started, for driving its pipelines
/// by hand.
pub(crate) fn unstarted(builder: SettingsBuilder) -> SocketListener {
    SocketListener::new(builder.build().unwrap(), FrameProcessor::new(), NoopEvents)
}

/// A connected loopback pair: the accepted server side with its peer
/// address, and the client side.
pub(crate) async fn socket_pair() -> ((TcpStream, SocketAddr), TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    (listener.accept().await.unwrap(), client)
}

pub(crate) struct TestServer {
    pub listener: SocketListener,
    pub addr: SocketAddr,
    pub events: UnboundedReceiver<ConnectionEvent>,
}

pub(crate) fn start_server(builder: SettingsBuilder) -> TestServer {
    start_with(builder, FrameProcessor::new())
}

pub(crate) fn start_with(builder: SettingsBuilder, processor: impl MessageProcessor) -> TestServer {
    let (events, rx) = EventSender::channel();
    start_custom(builder, processor, events, rx)
}

pub(crate) fn start_custom(
    builder: SettingsBuilder,
    processor: impl MessageProcessor,
    events: impl ConnectionEvents,
    rx: UnboundedReceiver<ConnectionEvent>,
) -> TestServer {
    let listener = SocketListener::new(builder.build().unwrap(), processor, events);
    let addr = listener.start_listen().unwrap();
    TestServer {
        listener,
        addr,
        events: rx,
    }
}

impl TestServer {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    pub async fn next_event(&mut self) -> ConnectionEvent {
        timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    pub async fn expect_connected(&mut self) -> Arc<Connection> {
        match self.next_event().await {
            ConnectionEvent::Connected(conn) => conn,
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    pub async fn expect_disconnected(&mut self) -> Arc<Connection> {
        match self.next_event().await {
            ConnectionEvent::Disconnected(conn) => conn,
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    pub async fn expect_no_event(&mut self, wait: Duration) {
        if let Ok(Some(event)) = timeout(wait, self.events.recv()).await {
            panic!("unexpected event: {event:?}");
        }
    }
}

pub(crate) async fn write_raw(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
    stream.flush().await.unwrap();
}

pub(crate) async fn write_frame(stream: &mut TcpStream, opcode: OpCode, payload: &[u8]) {
    write_raw(stream, &encode_frame(opcode, payload)).await;
}

pub(crate) async fn read_frame(stream: &mut TcpStream) -> (OpCode, Vec<u8>) {
    timeout(EVENT_TIMEOUT, async {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let opcode = OpCode::from_u8(header[0]).unwrap();
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        (opcode, payload)
    })
    .await
    .expect("timed out reading a frame")
}

/// Reads until the peer closes, returning how many bytes arrived first.
pub(crate) async fn read_to_eof(stream: &mut TcpStream) -> usize {
    let mut rest = Vec::new();
    timeout(EVENT_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .expect("timed out waiting for EOF")
        .unwrap_or(0);
    rest.len()
}
