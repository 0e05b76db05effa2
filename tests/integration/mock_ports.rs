//! Mock port adapters for integration tests.
//!
//! Each mock records every call so tests can assert on the full history,
//! and exposes knobs to inject failures. Mocks never call back into the
//! relay; tests complete transfers and raise callbacks explicitly.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use embedded_hal::delay::DelayNs;
use modem_relay::buffer::{Backend, Direction, Packet, TransferBuffer};
use modem_relay::config::RelayConfig;
use modem_relay::control::setup::Notification;
use modem_relay::error::{BackendError, TransportError};
use modem_relay::events::RelayEvent;
use modem_relay::ports::{
    BulkTransport, Completion, Endpoint, EventSink, Rejected, SdioMux, SmdChannel, SmdEvent,
};
use modem_relay::relay::Relay;

// ── Bulk transport ────────────────────────────────────────────

#[derive(Default)]
pub struct TransportModel {
    pub enabled: Vec<Endpoint>,
    pub disabled: Vec<Endpoint>,
    pub flushed: Vec<Endpoint>,
    /// Receive requests waiting for host data, oldest first.
    pub out: VecDeque<TransferBuffer>,
    /// Transmit requests waiting for the host to read, oldest first.
    pub inbound: VecDeque<TransferBuffer>,
    pub notifications: Vec<Notification>,
    pub submits: usize,
    pub reject_submits: usize,
    pub reject_notify: bool,
    pub refuse_enable: Option<Endpoint>,
}

#[derive(Default)]
pub struct MockTransport {
    pub model: Mutex<TransportModel>,
}

impl MockTransport {
    pub fn with<R>(&self, f: impl FnOnce(&mut TransportModel) -> R) -> R {
        f(&mut self.model.lock().unwrap())
    }

    pub fn take_out(&self) -> Option<TransferBuffer> {
        self.with(|m| m.out.pop_front())
    }

    pub fn take_in(&self) -> Option<TransferBuffer> {
        self.with(|m| m.inbound.pop_front())
    }

    pub fn out_pending(&self) -> usize {
        self.with(|m| m.out.len())
    }

    pub fn in_pending(&self) -> usize {
        self.with(|m| m.inbound.len())
    }

    pub fn notifications(&self) -> usize {
        self.with(|m| m.notifications.len())
    }

    pub fn reject_next_submits(&self, n: usize) {
        self.with(|m| m.reject_submits = n);
    }

    /// Everything still queued on the bulk endpoints.
    pub fn drain(&self) -> Vec<TransferBuffer> {
        self.with(|m| m.out.drain(..).chain(m.inbound.drain(..)).collect())
    }
}

impl BulkTransport for MockTransport {
    fn enable(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        self.with(|m| {
            if m.refuse_enable == Some(endpoint) {
                return Err(TransportError::EndpointUnavailable);
            }
            m.enabled.push(endpoint);
            Ok(())
        })
    }

    fn disable(&self, endpoint: Endpoint) {
        self.with(|m| m.disabled.push(endpoint));
    }

    fn flush(&self, endpoint: Endpoint) {
        self.with(|m| m.flushed.push(endpoint));
    }

    fn submit(&self, buffer: TransferBuffer) -> Result<(), Rejected> {
        self.with(|m| {
            if m.reject_submits > 0 {
                m.reject_submits -= 1;
                return Err(Rejected {
                    buffer,
                    error: TransportError::SubmitFailed(-108),
                });
            }
            m.submits += 1;
            match buffer.direction() {
                Direction::Out => m.out.push_back(buffer),
                Direction::In => m.inbound.push_back(buffer),
            }
            Ok(())
        })
    }

    fn notify(&self, notification: &Notification) -> Result<(), TransportError> {
        self.with(|m| {
            if m.reject_notify {
                return Err(TransportError::NotifyFailed(-16));
            }
            m.notifications.push(*notification);
            Ok(())
        })
    }
}

// ── SDIO mux ──────────────────────────────────────────────────

#[derive(Default)]
pub struct SdioModel {
    pub open_calls: u32,
    pub open_failures: u32,
    pub refuse_writes: bool,
    /// Payloads in the order the mux received them.
    pub written: Vec<Vec<u8>>,
    /// Writes not yet acknowledged with `sdio_write_done`.
    pub unacked: VecDeque<Packet>,
}

#[derive(Default)]
pub struct MockSdio {
    pub model: Mutex<SdioModel>,
}

impl MockSdio {
    pub fn with<R>(&self, f: impl FnOnce(&mut SdioModel) -> R) -> R {
        f(&mut self.model.lock().unwrap())
    }

    pub fn take_unacked(&self) -> Option<Packet> {
        self.with(|m| m.unacked.pop_front())
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.with(|m| m.written.clone())
    }
}

impl SdioMux for MockSdio {
    fn open(&self, _channel: u32) -> Result<(), BackendError> {
        self.with(|m| {
            m.open_calls += 1;
            if m.open_failures > 0 {
                m.open_failures -= 1;
                return Err(BackendError::OpenFailed(-19));
            }
            Ok(())
        })
    }

    fn write(&self, _channel: u32, packet: Packet) -> Result<(), BackendError> {
        self.with(|m| {
            if m.refuse_writes {
                return Err(BackendError::WriteFailed(-11));
            }
            m.written.push(packet.as_slice().to_vec());
            m.unacked.push_back(packet);
            Ok(())
        })
    }
}

// ── SMD channel ───────────────────────────────────────────────

#[derive(Default)]
pub struct SmdModel {
    pub open_calls: u32,
    pub close_calls: u32,
    pub refuse_open: bool,
    /// Free space for host→modem writes.
    pub write_room: usize,
    /// Space the remote frees right after the next `write_available`
    /// query returns, as if it drained concurrently.
    pub room_after_query: usize,
    /// Packets written, in order.
    pub written: Vec<Vec<u8>>,
    /// Complete modem→host packets waiting to be read.
    pub incoming: VecDeque<Vec<u8>>,
}

#[derive(Default)]
pub struct MockSmd {
    pub model: Mutex<SmdModel>,
}

impl MockSmd {
    pub fn with<R>(&self, f: impl FnOnce(&mut SmdModel) -> R) -> R {
        f(&mut self.model.lock().unwrap())
    }

    pub fn set_room(&self, room: usize) {
        self.with(|m| m.write_room = room);
    }

    pub fn push_incoming(&self, data: &[u8]) {
        self.with(|m| m.incoming.push_back(data.to_vec()));
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.with(|m| m.written.clone())
    }
}

impl SmdChannel for MockSmd {
    fn open(&self, _name: &str) -> Result<(), BackendError> {
        self.with(|m| {
            m.open_calls += 1;
            if m.refuse_open {
                return Err(BackendError::OpenFailed(-2));
            }
            Ok(())
        })
    }

    fn close(&self) {
        self.with(|m| m.close_calls += 1);
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        self.with(|m| match m.incoming.pop_front() {
            Some(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                n
            }
            None => 0,
        })
    }

    /// Packet mode: all or nothing.
    fn write(&self, data: &[u8]) -> usize {
        self.with(|m| {
            if data.len() > m.write_room {
                return 0;
            }
            m.write_room -= data.len();
            m.written.push(data.to_vec());
            data.len()
        })
    }

    fn current_packet_size(&self) -> usize {
        self.with(|m| m.incoming.front().map_or(0, Vec::len))
    }

    fn read_available(&self) -> usize {
        self.with(|m| m.incoming.iter().map(Vec::len).sum())
    }

    fn write_available(&self) -> usize {
        self.with(|m| {
            let room = m.write_room;
            m.write_room += core::mem::take(&mut m.room_after_query);
            room
        })
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<RelayEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &RelayEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &RelayEvent) {
        self.events.lock().unwrap().push(*event);
    }
}

// ── Delay ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockDelay {
    pub total_ms: u64,
    pub calls: u32,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ms += u64::from(ns) / 1_000_000;
        self.calls += 1;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
        self.calls += 1;
    }
}

// ── Harness ───────────────────────────────────────────────────

pub type TestRelay = Relay<MockTransport, MockSdio, MockSmd, RecordingSink>;

pub fn relay_with(config: RelayConfig) -> TestRelay {
    Relay::new(
        config,
        MockTransport::default(),
        MockSdio::default(),
        MockSmd::default(),
        RecordingSink::default(),
    )
    .unwrap()
}

pub fn relay() -> TestRelay {
    relay_with(RelayConfig::default())
}

/// Enable on SDIO with the channel already open.
pub fn online_sdio() -> TestRelay {
    let relay = relay();
    relay.enable(Backend::Sdio).unwrap();
    relay
}

/// Enable on SMD; the channel reports open up front so bring-up does not
/// wait.
pub fn online_smd(room: usize) -> TestRelay {
    let relay = relay();
    relay.smd_channel().set_room(room);
    relay.smd_notify(SmdEvent::Open);
    relay.enable(Backend::Smd).unwrap();
    relay.run_pending();
    relay
}

/// Host sends one bulk OUT packet into the oldest receive request.
pub fn host_send(relay: &TestRelay, data: &[u8]) {
    let mut buffer = relay
        .transport()
        .take_out()
        .expect("no receive request outstanding");
    buffer.storage_mut()[..data.len()].copy_from_slice(data);
    relay.transfer_complete(buffer, Completion::Success(data.len()));
}

/// Host reads the oldest bulk IN transfer.
pub fn host_read(relay: &TestRelay) -> Option<Vec<u8>> {
    let buffer = relay.transport().take_in()?;
    let data = buffer.data().to_vec();
    relay.transfer_complete(buffer, Completion::Success(data.len()));
    Some(data)
}

/// Complete every queued transfer as aborted, as a controller does on
/// endpoint disable or flush.
pub fn abort_all(relay: &TestRelay) -> usize {
    let buffers = relay.transport().drain();
    let n = buffers.len();
    for buffer in buffers {
        relay.transfer_complete(buffer, Completion::Aborted);
    }
    n
}

/// Acknowledge `n` SDIO writes.
pub fn ack_sdio_writes(relay: &TestRelay, n: usize) {
    for _ in 0..n {
        let packet = relay.sdio_mux().take_unacked().expect("no unacked write");
        relay.sdio_write_done(packet);
    }
}
