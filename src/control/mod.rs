//! Control-channel state: encapsulated command/response queues, reader
//! registration, line state and the notification counter.
//!
//! ```text
//!            SEND_ENCAPSULATED_COMMAND            reader.read()
//!   host ────────────────────────────▶ ToBackend ─────────────▶ backend
//!   host ◀──────────────────────────── ToHost   ◀───────────── backend
//!            GET_ENCAPSULATED_RESPONSE            reader.write()
//!                     ▲
//!                     └── RESPONSE_AVAILABLE (one outstanding at a time)
//! ```
//!
//! Pure state; the relay owns it under its lock and performs all port I/O
//! (notification submission) outside the lock based on the returned
//! decisions.

pub mod setup;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::ports::Completion;

/// Largest control packet relayed in either direction.
pub const MAX_CONTROL_PACKET: usize = 4096;

// ── Packet ──────────────────────────────────────────────────────

/// One encapsulated command or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket(heapless::Vec<u8, MAX_CONTROL_PACKET>);

impl ControlPacket {
    /// Copy `data` into a new packet. Oversized payloads are rejected here,
    /// before anything is queued.
    pub fn from_slice(data: &[u8]) -> Result<Self, ControlError> {
        heapless::Vec::from_slice(data)
            .map(Self)
            .map_err(|()| ControlError::TooLarge { len: data.len() })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

// ── Line state ──────────────────────────────────────────────────

/// Host line-status bits from SET_CONTROL_LINE_STATE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineState(u16);

impl LineState {
    pub const DTR: u16 = 1 << 0;

    pub fn from_request(value: u16) -> Self {
        Self(value & Self::DTR)
    }

    pub fn dtr(self) -> bool {
        self.0 & Self::DTR != 0
    }

    pub fn bits(self) -> u16 {
        self.0
    }
}

// ── State ───────────────────────────────────────────────────────

/// Outcome of a host command arriving at the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Queued,
    /// No reader registered; the command was discarded.
    Dropped,
}

#[derive(Debug, Default)]
pub struct ControlState {
    to_host: VecDeque<ControlPacket>,
    to_backend: VecDeque<ControlPacket>,
    reader_open: bool,
    line: LineState,
    notify_count: u32,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Host → backend ---

    /// Queue a host command for the reader, or drop it when nobody listens.
    pub fn ingest_command(&mut self, packet: ControlPacket) -> Ingest {
        if !self.reader_open {
            return Ingest::Dropped;
        }
        self.to_backend.push_back(packet);
        Ingest::Queued
    }

    /// Pop the oldest command if it fits into `capacity` bytes. A packet that
    /// does not fit stays queued.
    pub fn next_command(&mut self, capacity: usize) -> Result<Option<ControlPacket>, ControlError> {
        match self.to_backend.front() {
            None => Ok(None),
            Some(p) if p.len() > capacity => Err(ControlError::BufferTooSmall { needed: p.len() }),
            Some(_) => Ok(self.to_backend.pop_front()),
        }
    }

    // --- Backend → host ---

    /// Queue a response. Returns `true` when the caller must submit a
    /// RESPONSE_AVAILABLE notification (count went from zero to one).
    pub fn queue_response(&mut self, packet: ControlPacket) -> bool {
        self.to_host.push_back(packet);
        self.notify_count += 1;
        self.notify_count == 1
    }

    /// Pop the oldest response, truncated to what the host asked for.
    pub fn take_response(&mut self, max_len: usize) -> Option<ControlPacket> {
        let mut packet = self.to_host.pop_front()?;
        packet.truncate(max_len);
        Some(packet)
    }

    /// Account for a finished notification. Returns `true` when another
    /// notification must be sent.
    pub fn notify_completed(&mut self, status: Completion) -> bool {
        match status {
            Completion::Aborted => {
                self.notify_count = 0;
                false
            }
            Completion::Success(_) | Completion::Failure(_) => {
                self.notify_count = self.notify_count.saturating_sub(1);
                self.notify_count > 0
            }
        }
    }

    /// A notification could not be submitted at all. Nothing is in flight
    /// any more, so the next queued response re-arms notification.
    pub fn notify_submit_failed(&mut self) {
        self.notify_count = 0;
    }

    pub fn notify_count(&self) -> u32 {
        self.notify_count
    }

    // --- Reader ---

    /// Claim the exclusive reader slot.
    pub fn register_reader(&mut self) -> bool {
        if self.reader_open {
            return false;
        }
        self.reader_open = true;
        true
    }

    pub fn release_reader(&mut self) {
        self.reader_open = false;
    }

    pub fn reader_open(&self) -> bool {
        self.reader_open
    }

    // --- Line state ---

    pub fn set_line_state(&mut self, line: LineState) {
        self.line = line;
    }

    pub fn line_state(&self) -> LineState {
        self.line
    }

    // --- Lifecycle ---

    /// Free both queues, drop DTR and forget outstanding notifications.
    /// Reader registration survives a disconnect.
    pub fn reset(&mut self) -> usize {
        let freed = self.to_host.len() + self.to_backend.len();
        self.to_host.clear();
        self.to_backend.clear();
        self.line = LineState::default();
        self.notify_count = 0;
        freed
    }

    pub fn to_host_len(&self) -> usize {
        self.to_host.len()
    }

    pub fn to_backend_len(&self) -> usize {
        self.to_backend.len()
    }
}
