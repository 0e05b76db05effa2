//! Transfer buffers, packet envelopes and fixed-capacity buffer pools.
//!
//! ```text
//!   BufferPool ──acquire──▶ in flight (BulkTransport) ──complete──▶ relay
//!        ▲                                                          │
//!        └──────────────────────── release ◀────────────────────────┘
//! ```
//!
//! A [`TransferBuffer`] is owned by exactly one place at a time: an idle
//! pool, a relay queue, or the transport while in flight. Ownership moves
//! by value, so a buffer cannot be queued twice.

use heapless::Deque;

/// SDIO receive (host→backend) request pool size.
pub const SDIO_RX_BUFFERS: usize = 16;
/// SDIO transmit (backend→host) request pool size.
pub const SDIO_TX_BUFFERS: usize = 100;
/// Payload allocated for each SDIO receive request.
pub const SDIO_RX_BUFFER_SIZE: usize = 2048;

/// SMD receive request pool size.
pub const SMD_RX_BUFFERS: usize = 8;
/// SMD transmit request pool size.
pub const SMD_TX_BUFFERS: usize = 8;
/// Fixed backing storage of every SMD request.
pub const SMD_BUFFER_SIZE: usize = 2048;

/// Data backend a buffer or packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Backend {
    Sdio,
    Smd,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sdio => "sdio",
            Self::Smd => "smd",
        }
    }
}

/// Bulk direction as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host → device (bulk OUT, receive request).
    Out,
    /// Device → host (bulk IN, transmit request).
    In,
}

// ── Transfer buffer ─────────────────────────────────────────────

/// One bulk transfer request and its payload.
///
/// For [`Direction::Out`] the length is the number of bytes requested
/// from the host until a completion trims it to the actual transfer. For
/// [`Direction::In`] it is the number of valid bytes to send.
#[derive(Debug)]
pub struct TransferBuffer {
    direction: Direction,
    owner: Backend,
    session: u32,
    storage: Vec<u8>,
    len: usize,
}

impl TransferBuffer {
    pub fn new(direction: Direction, owner: Backend, capacity: usize) -> Self {
        Self {
            direction,
            owner,
            session: 0,
            storage: vec![0; capacity],
            len: 0,
        }
    }

    /// Buffer without backing storage; payload is attached per submission.
    pub fn empty(direction: Direction, owner: Backend) -> Self {
        Self::new(direction, owner, 0)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn owner(&self) -> Backend {
        self.owner
    }

    /// Bring-up generation this buffer was allocated for.
    pub fn session(&self) -> u32 {
        self.session
    }

    pub(crate) fn set_session(&mut self, session: u32) {
        self.session = session;
    }

    /// Valid bytes (IN) or requested window (OUT).
    pub fn data(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Whole backing storage, for the party filling the buffer.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// Trim to `len` valid bytes, clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.storage.len());
    }

    /// Prepare a receive request of `size` bytes, reallocating only when the
    /// payload was handed off or has a different size.
    pub fn arm(&mut self, size: usize) {
        if self.storage.len() != size {
            self.storage = vec![0; size];
        }
        self.len = size;
    }

    /// Take an outbound payload as the buffer's contents.
    pub fn attach(&mut self, payload: Vec<u8>) {
        self.len = payload.len();
        self.storage = payload;
    }

    /// Hand the valid bytes off, leaving the buffer without storage.
    pub fn detach(&mut self) -> Vec<u8> {
        let mut payload = core::mem::take(&mut self.storage);
        payload.truncate(self.len);
        self.len = 0;
        payload
    }
}

// ── Packet envelope ─────────────────────────────────────────────

/// Payload moving between the relay and a backend adapter.
///
/// A packet handed to a backend carries the session it was written under,
/// so a late acknowledgment from an earlier session can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    session: u32,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            session: 0,
        }
    }

    /// Session the packet was handed to a backend under; 0 if never.
    pub fn session(&self) -> u32 {
        self.session
    }

    pub(crate) fn set_session(&mut self, session: u32) {
        self.session = session;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.payload
    }
}

impl From<Vec<u8>> for Packet {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&[u8]> for Packet {
    fn from(payload: &[u8]) -> Self {
        Self::new(payload.to_vec())
    }
}

// ── Buffer pool ─────────────────────────────────────────────────

/// Idle list of transfer buffers with a compile-time cap.
///
/// `allocated` counts buffers created for the current bring-up; buffers in
/// flight are not in the idle list but still count against it.
pub struct BufferPool<const N: usize> {
    idle: Deque<TransferBuffer, N>,
    allocated: usize,
}

impl<const N: usize> BufferPool<N> {
    pub const fn new() -> Self {
        Self {
            idle: Deque::new(),
            allocated: 0,
        }
    }

    /// Fill the pool with up to `N` buffers produced by `make`.
    pub fn populate(&mut self, count: usize, make: impl FnMut() -> TransferBuffer) {
        self.fill(core::iter::repeat_with(make).take(count));
    }

    /// Adopt pre-allocated buffers until the pool is full.
    pub fn fill(&mut self, buffers: impl IntoIterator<Item = TransferBuffer>) {
        for buffer in buffers {
            if self.idle.push_back(buffer).is_err() {
                break;
            }
            self.allocated += 1;
        }
    }

    /// Take an idle buffer, or `None` when exhausted.
    pub fn acquire(&mut self) -> Option<TransferBuffer> {
        self.idle.pop_front()
    }

    /// Return a buffer to the tail of the idle list.
    pub fn release(&mut self, buffer: TransferBuffer) {
        if let Err(buffer) = self.idle.push_back(buffer) {
            log::warn!("pool: idle list full, freeing {:?} buffer", buffer.owner());
        }
    }

    /// Return a buffer that could not be submitted to the head of the list.
    pub fn release_front(&mut self, buffer: TransferBuffer) {
        if let Err(buffer) = self.idle.push_front(buffer) {
            log::warn!("pool: idle list full, freeing {:?} buffer", buffer.owner());
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    pub fn is_idle_empty(&self) -> bool {
        self.idle.is_empty()
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Free every idle buffer and forget the allocation count. Buffers still
    /// in flight are discarded by the relay when they complete.
    pub fn clear(&mut self) -> usize {
        let freed = self.idle.len();
        self.idle.clear();
        self.allocated = 0;
        freed
    }
}

impl<const N: usize> Default for BufferPool<N> {
    fn default() -> Self {
        Self::new()
    }
}
