//! Reusable Slot Pools
//!
//! Two pools of reusable resources back the listener:
//!
//! - [`IoSlotPool`]: long-lived I/O slots, each permanently bound to one
//!   buffer segment. A receive pipeline holds one slot for the lifetime of
//!   its connection; a send drain holds one while it transmits a chain of
//!   queued frames.
//! - [`AcceptSlotPool`]: transient holders for an accepted socket between
//!   accept completion and hand-off to an I/O slot.
//!
//! ## Exhaustion
//!
//! The I/O slot pool never grows. When it is empty, [`IoSlotPool::acquire`]
//! waits until another pipeline releases a slot. Settings validation sizes
//! the pool so that every admitted connection can hold a receive slot and a
//! send slot at the same time, which bounds the wait.
//!
//! The accept slot pool falls back to a fresh allocation when empty but only
//! keeps up to its capacity once slots come back.

use crate::connection::Connection;
use crate::pool::buffer::{BufferPool, BufferSegment};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{error, trace};

/// Per-operation bookkeeping carried by an I/O slot.
///
/// Reset wholesale whenever the slot goes back to its pool.
#[derive(Debug, Default)]
struct SlotToken {
    /// Connection the slot currently serves
    connection: Option<Arc<Connection>>,

    /// Frame being transmitted, if any
    message: Option<Bytes>,

    /// Write cursor: bytes of `message` already accepted by the socket
    bytes_done: usize,
}

/// A reusable I/O resource owning one buffer segment.
#[derive(Debug)]
pub struct IoSlot {
    id: usize,
    segment: BufferSegment,
    token: SlotToken,
}

impl IoSlot {
    fn new(id: usize, segment: BufferSegment) -> Self {
        Self {
            id,
            segment,
            token: SlotToken::default(),
        }
    }

    /// Index of the slot within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The slot's buffer segment.
    pub fn segment(&self) -> &BufferSegment {
        &self.segment
    }

    /// The slot's buffer segment, writable.
    pub fn segment_mut(&mut self) -> &mut BufferSegment {
        &mut self.segment
    }

    /// Associates the slot with a connection.
    pub fn bind(&mut self, connection: &Arc<Connection>) {
        self.token.connection = Some(Arc::clone(connection));
    }

    /// The connection the slot is bound to.
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.token.connection.as_ref()
    }

    /// Returns true if the slot is bound to exactly this connection.
    pub fn is_bound_to(&self, connection: &Connection) -> bool {
        self.token
            .connection
            .as_ref()
            .is_some_and(|bound| bound.id() == connection.id())
    }

    /// Starts transmitting a new frame from its first byte.
    pub fn begin_message(&mut self, message: Bytes) {
        self.token.message = Some(message);
        self.token.bytes_done = 0;
    }

    /// Copies the next chunk of the in-flight frame into the segment.
    ///
    /// The chunk is `min(bytes remaining, segment capacity)` bytes starting at
    /// the write cursor. Returns `None` when nothing is left to send.
    pub fn load_next_chunk(&mut self) -> Option<usize> {
        let message = self.token.message.as_ref()?;
        let pending = message.get(self.token.bytes_done..)?;
        if pending.is_empty() {
            return None;
        }
        Some(self.segment.fill_from(pending))
    }

    /// Moves the write cursor forward after the socket accepted `n` bytes.
    ///
    /// Returns true once the whole frame has been sent.
    pub fn advance(&mut self, n: usize) -> bool {
        self.token.bytes_done += n;
        self.remaining() == 0
    }

    /// Bytes of the in-flight frame already sent.
    pub fn bytes_done(&self) -> usize {
        self.token.bytes_done
    }

    /// Bytes of the in-flight frame still to send.
    pub fn remaining(&self) -> usize {
        self.token
            .message
            .as_ref()
            .map_or(0, |m| m.len().saturating_sub(self.token.bytes_done))
    }

    /// Drops the in-flight frame, keeping the connection binding.
    pub fn finish_message(&mut self) {
        self.token.message = None;
        self.token.bytes_done = 0;
    }

    /// Clears all per-operation state, including the connection binding.
    pub fn reset(&mut self) {
        self.token = SlotToken::default();
    }
}

/// Fixed-size pool of I/O slots.
#[derive(Debug)]
pub struct IoSlotPool {
    /// Idle slots (LIFO)
    slots: Mutex<Vec<IoSlot>>,

    /// One permit per idle slot
    available: Semaphore,

    capacity: usize,
    segment_size: usize,
}

impl IoSlotPool {
    /// Builds `count` slots over a freshly allocated buffer region.
    pub fn new(segment_size: usize, count: usize) -> Self {
        let mut region = BufferPool::new(segment_size, count);
        let slots: Vec<IoSlot> = region
            .take_all()
            .into_iter()
            .enumerate()
            .map(|(id, segment)| IoSlot::new(id, segment))
            .collect();

        let capacity = slots.len();
        Self {
            slots: Mutex::new(slots),
            available: Semaphore::new(capacity),
            capacity,
            segment_size,
        }
    }

    /// Takes a slot, waiting for one to be released if the pool is empty.
    ///
    /// Returns `None` once the pool has been closed.
    pub async fn acquire(&self) -> Option<IoSlot> {
        let permit = self.available.acquire().await.ok()?;
        permit.forget();
        self.pop()
    }

    /// Takes a slot if one is idle right now.
    pub fn try_acquire(&self) -> Option<IoSlot> {
        let permit = self.available.try_acquire().ok()?;
        permit.forget();
        self.pop()
    }

    fn pop(&self) -> Option<IoSlot> {
        let slot = self.slots.lock().unwrap().pop();
        if slot.is_none() {
            error!("I/O slot permit granted with no idle slot");
        }
        slot
    }

    /// Resets a slot and returns it to the pool.
    pub fn release(&self, mut slot: IoSlot) {
        slot.reset();
        trace!(slot = slot.id(), "I/O slot released");
        self.slots.lock().unwrap().push(slot);
        self.available.add_permits(1);
    }

    /// Stops handing out slots; pending and future `acquire` calls return `None`.
    ///
    /// Slots may still be released into a closed pool.
    pub fn close(&self) {
        self.available.close();
    }

    /// Resets every idle slot.
    pub fn reset_all(&self) {
        for slot in self.slots.lock().unwrap().iter_mut() {
            slot.reset();
        }
    }

    /// Number of idle slots.
    pub fn available(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of each slot's segment.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }
}

/// Transient holder of an accepted socket.
#[derive(Debug, Default)]
pub struct AcceptSlot {
    handle: Option<(TcpStream, SocketAddr)>,
}

impl AcceptSlot {
    /// Stores a freshly accepted socket.
    pub fn fill(&mut self, stream: TcpStream, addr: SocketAddr) {
        self.handle = Some((stream, addr));
    }

    /// Hands the accepted socket over, leaving the slot empty.
    pub fn take(&mut self) -> Option<(TcpStream, SocketAddr)> {
        self.handle.take()
    }

    /// Drops (and thereby closes) any socket still held.
    pub fn reset(&mut self) {
        self.handle = None;
    }
}

/// Pool of accept slots with fresh allocation on exhaustion.
#[derive(Debug)]
pub struct AcceptSlotPool {
    slots: Mutex<Vec<AcceptSlot>>,
    capacity: usize,
    allocated: AtomicUsize,
}

impl AcceptSlotPool {
    /// Pre-allocates `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| AcceptSlot::default()).collect();
        Self {
            slots: Mutex::new(slots),
            capacity,
            allocated: AtomicUsize::new(capacity),
        }
    }

    /// Takes a pooled slot, or allocates a new one if the pool is empty.
    pub fn take(&self) -> AcceptSlot {
        if let Some(slot) = self.slots.lock().unwrap().pop() {
            return slot;
        }

        let total = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(total, "Accept slot pool empty, allocating");
        AcceptSlot::default()
    }

    /// Resets a slot and returns it to the pool.
    ///
    /// Slots beyond the pool's capacity are dropped.
    pub fn put(&self, mut slot: AcceptSlot) {
        slot.reset();
        let mut slots = self.slots.lock().unwrap();
        if slots.len() < self.capacity {
            slots.push(slot);
        } else {
            self.allocated.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Drops every pooled slot.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.slots.lock().unwrap());
        self.allocated.fetch_sub(drained.len(), Ordering::Relaxed);
    }

    /// Number of pooled slots.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Returns true if no slot is pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots alive, pooled or in use.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}
