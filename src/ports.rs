//! Port traits: the boundary between the relay core and the outside world.
//!
//! ```text
//!   BulkTransport ◀──▶ Relay ◀──▶ SdioMux | SmdChannel
//!                        │
//!                        └──▶ EventSink
//! ```
//!
//! Adapters implement these traits; the [`Relay`](crate::relay::Relay)
//! consumes them via generics. Port methods take `&self` because they are
//! invoked from completion and callback contexts concurrently; adapters
//! provide their own interior synchronisation.
//!
//! ## Re-entrancy
//!
//! The relay never calls a port while holding its lock, so a port may call
//! back into the relay synchronously (a transport completing a transfer
//! inside `submit`, an SMD driver raising `Open` inside `open`).

use crate::buffer::{Direction, Packet, TransferBuffer};
use crate::control::setup::Notification;
use crate::error::{BackendError, TransportError};
use crate::events::RelayEvent;

// ───────────────────────────────────────────────────────────────
// Bulk transport (peer-facing USB function)
// ───────────────────────────────────────────────────────────────

/// Endpoints of the data interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Interrupt IN, carries CDC notifications.
    Notify,
    /// Bulk IN (device → host).
    BulkIn,
    /// Bulk OUT (host → device).
    BulkOut,
}

impl Endpoint {
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::In => Self::BulkIn,
            Direction::Out => Self::BulkOut,
        }
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Transfer finished with this many bytes moved.
    Success(usize),
    /// Endpoint shut down or was reset; the transfer never finished.
    Aborted,
    /// Transfer failed with a driver status code.
    Failure(i32),
}

/// A submission the transport refused; ownership of the buffer returns to
/// the caller.
#[derive(Debug)]
pub struct Rejected {
    pub buffer: TransferBuffer,
    pub error: TransportError,
}

pub trait BulkTransport {
    fn enable(&self, endpoint: Endpoint) -> Result<(), TransportError>;

    /// Disable an endpoint. Transfers in flight complete with
    /// [`Completion::Aborted`].
    fn disable(&self, endpoint: Endpoint);

    /// Cancel everything queued on an endpoint without disabling it.
    fn flush(&self, endpoint: Endpoint);

    /// Queue a transfer on the endpoint matching the buffer's direction.
    /// The buffer comes back through
    /// [`Relay::transfer_complete`](crate::relay::Relay::transfer_complete).
    fn submit(&self, buffer: TransferBuffer) -> Result<(), Rejected>;

    /// Send an interrupt notification. Completion is reported through
    /// [`Relay::notify_complete`](crate::relay::Relay::notify_complete).
    fn notify(&self, notification: &Notification) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────
// SDIO mux (asynchronous, callback driven)
// ───────────────────────────────────────────────────────────────

/// Multiplexed SDIO interconnect.
///
/// Received packets arrive through
/// [`Relay::sdio_receive`](crate::relay::Relay::sdio_receive); each accepted
/// write is acknowledged through
/// [`Relay::sdio_write_done`](crate::relay::Relay::sdio_write_done).
pub trait SdioMux {
    fn open(&self, channel: u32) -> Result<(), BackendError>;

    /// Queue a packet for the modem. On error the packet is consumed.
    fn write(&self, channel: u32, packet: Packet) -> Result<(), BackendError>;
}

// ───────────────────────────────────────────────────────────────
// SMD channel (shared memory, polled capacities)
// ───────────────────────────────────────────────────────────────

/// Events raised by the SMD driver through
/// [`Relay::smd_notify`](crate::relay::Relay::smd_notify).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmdEvent {
    /// Space or data became available.
    Data,
    /// The channel finished opening.
    Open,
    /// The remote side closed the channel.
    Close,
}

/// Packet-mode shared-memory channel. All calls are non-blocking.
pub trait SmdChannel {
    /// Start opening the named channel; readiness is signalled with
    /// [`SmdEvent::Open`].
    fn open(&self, name: &str) -> Result<(), BackendError>;

    fn close(&self);

    /// Read up to `buf.len()` bytes of the next packet.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Write one packet; returns the number of bytes accepted.
    fn write(&self, data: &[u8]) -> usize;

    /// Size of the next fully received packet, 0 when none.
    fn current_packet_size(&self) -> usize;

    fn read_available(&self) -> usize;

    fn write_available(&self) -> usize;
}

// ───────────────────────────────────────────────────────────────
// Event sink (relay → platform hooks / logging)
// ───────────────────────────────────────────────────────────────

/// The relay emits lifecycle events through this port. Platforms hook
/// power and performance hints onto `Connected`/`Disconnected`.
pub trait EventSink {
    fn emit(&self, event: &RelayEvent);
}
