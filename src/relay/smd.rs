//! SMD channel data path.
//!
//! Host→backend packets must reach the channel in the order the host sent
//! them. A receive completion writes straight through only when nothing is
//! held and the channel has room; otherwise the buffer joins the held FIFO
//! and [`Activation::SmdRx`] drains it oldest-first once the channel
//! reports space:
//!
//! ```text
//!   completion ──(held none, room)──▶ write ──▶ resubmit
//!        └──────(otherwise)─────────▶ held FIFO ──SmdRx──▶ write ──▶ resubmit
//! ```
//!
//! `held_len` is `Some` exactly while the FIFO is non-empty and, at rest,
//! equals the length of the FIFO head.
//!
//! Backend→host: [`Activation::SmdTx`] reads whole packets into idle tx
//! buffers and submits them.

use heapless::Deque;
use log::{debug, error, info, trace, warn};

use super::{Activation, Relay};
use crate::buffer::{
    Backend, BufferPool, Direction, SMD_BUFFER_SIZE, SMD_RX_BUFFERS, SMD_TX_BUFFERS, TransferBuffer,
};
use crate::diagnostics::SmdDiagnostics;
use crate::error::{Error, Result};
use crate::events::RelayEvent;
use crate::ports::{BulkTransport, Completion, EventSink, Rejected, SdioMux, SmdChannel, SmdEvent};

pub(super) struct SmdState {
    rx_idle: BufferPool<SMD_RX_BUFFERS>,
    tx_idle: BufferPool<SMD_TX_BUFFERS>,
    /// Completed receives waiting for channel space, oldest first.
    rx_queue: Deque<TransferBuffer, SMD_RX_BUFFERS>,
    held_len: Option<usize>,
    channel_open: bool,
}

impl SmdState {
    pub(super) fn new() -> Self {
        Self {
            rx_idle: BufferPool::new(),
            tx_idle: BufferPool::new(),
            rx_queue: Deque::new(),
            held_len: None,
            channel_open: false,
        }
    }

    fn populate(&mut self, session: u32, rx: Vec<TransferBuffer>, tx: Vec<TransferBuffer>) {
        let tag = |mut buffer: TransferBuffer| {
            buffer.set_session(session);
            buffer
        };
        self.rx_idle.fill(rx.into_iter().map(tag));
        self.tx_idle.fill(tx.into_iter().map(tag));
    }

    /// Append a completed receive to the held FIFO.
    fn hold(&mut self, buffer: TransferBuffer) {
        let len = buffer.len();
        match self.rx_queue.push_back(buffer) {
            Ok(()) => {
                self.held_len.get_or_insert(len);
            }
            Err(_) => warn!("smd: held queue full, {} bytes dropped", len),
        }
    }

    /// Free pools and the held FIFO. The channel stays open.
    pub(super) fn teardown(&mut self) -> usize {
        let freed = self.rx_idle.clear() + self.tx_idle.clear() + self.rx_queue.len();
        self.rx_queue.clear();
        self.held_len = None;
        freed
    }

    /// Forget the open channel; returns whether it was open.
    pub(super) fn close(&mut self) -> bool {
        core::mem::replace(&mut self.channel_open, false)
    }

    pub(super) fn diagnostics(&self) -> SmdDiagnostics {
        SmdDiagnostics {
            channel_open: self.channel_open,
            rx_queued: self.rx_queue.len(),
            rx_head_len: self.rx_queue.front().map(TransferBuffer::len),
            held_len: self.held_len,
            rx_idle: self.rx_idle.idle(),
            tx_idle: self.tx_idle.idle(),
        }
    }
}

/// Receive completion routing, decided under the lock.
enum RxPath {
    Stale,
    Held,
    Direct(TransferBuffer),
}

/// One step of the held-FIFO drain.
enum Drain {
    Stop,
    Retry,
    Write(TransferBuffer),
}

impl<T, S, M, E> Relay<T, S, M, E>
where
    T: BulkTransport,
    S: SdioMux,
    M: SmdChannel,
    E: EventSink,
{
    pub(super) fn smd_bring_up(&self) -> Result<()> {
        self.smd_open()?;

        let rx: Vec<_> = (0..SMD_RX_BUFFERS)
            .map(|_| TransferBuffer::new(Direction::Out, Backend::Smd, SMD_BUFFER_SIZE))
            .collect();
        let tx: Vec<_> = (0..SMD_TX_BUFFERS)
            .map(|_| TransferBuffer::new(Direction::In, Backend::Smd, SMD_BUFFER_SIZE))
            .collect();

        let published = self.with_state(|s| {
            if !s.online {
                return false;
            }
            let session = s.next_session();
            s.smd.populate(session, rx, tx);
            s.selector = Backend::Smd.into();
            true
        });
        if !published {
            return Err(Error::NotConnected);
        }

        self.smd_start_rx();
        // The modem may have queued data while nobody was reading.
        self.activations.schedule(Activation::SmdTx);
        Ok(())
    }

    /// Open the data channel and wait for the driver to confirm. A channel
    /// left open by an earlier session is reused. A disconnect while waiting
    /// ends the wait with `NotConnected`.
    fn smd_open(&self) -> Result<()> {
        if self.with_state(|s| s.smd.channel_open) {
            debug!("smd: channel already open");
            return Ok(());
        }

        let name = self.config.smd_data_channel.as_str();
        self.smd_ready.reset();
        if let Err(e) = self.smd.open(name) {
            error!("smd: open {} failed: {}", name, e);
            return Err(e.into());
        }

        futures_lite::future::block_on(async {
            loop {
                let (open, online) = self.with_state(|s| (s.smd.channel_open, s.online));
                if open {
                    return Ok(());
                }
                if !online {
                    return Err(Error::NotConnected);
                }
                self.smd_ready.wait().await;
            }
        })
        .inspect_err(|_| warn!("smd: open of {} abandoned, relay offline", name))?;
        info!("smd: channel {} open", name);
        Ok(())
    }

    /// Event raised by the SMD driver.
    pub fn smd_notify(&self, event: SmdEvent) {
        match event {
            SmdEvent::Open => {
                self.with_state(|s| s.smd.channel_open = true);
                self.smd_ready.signal(());
                self.events.emit(&RelayEvent::SmdChannelOpen);
            }
            SmdEvent::Close => {
                self.with_state(|s| s.smd.channel_open = false);
                self.smd_ready.signal(());
                info!("smd: channel closed by remote");
                self.events.emit(&RelayEvent::SmdChannelClosed);
            }
            SmdEvent::Data => {
                if !self.with_state(|s| s.admits(Backend::Smd)) {
                    return;
                }
                self.smd_recheck_held();
                if self.smd.read_available() > 0 {
                    self.activations.schedule(Activation::SmdTx);
                }
            }
        }
    }

    // ── Host → backend ──────────────────────────────────────────

    pub(super) fn smd_start_rx(&self) {
        loop {
            let buffer = self.with_state(|s| {
                if !s.admits(Backend::Smd) {
                    return None;
                }
                s.smd.rx_idle.acquire()
            });
            let Some(mut buffer) = buffer else { break };
            buffer.arm(SMD_BUFFER_SIZE);
            if let Err(Rejected { buffer, error }) = self.transport.submit(buffer) {
                error!("smd: rx submit failed: {}", error);
                self.recycle_smd_rx(buffer);
                break;
            }
        }
    }

    fn recycle_smd_rx(&self, buffer: TransferBuffer) -> bool {
        self.with_state(|s| {
            if !s.accepts(&buffer) {
                return false;
            }
            s.smd.rx_idle.release(buffer);
            true
        })
    }

    pub(super) fn smd_rx_complete(&self, mut buffer: TransferBuffer, status: Completion) {
        match status {
            Completion::Aborted => {
                // Parked without resubmission; freed at teardown.
                self.recycle_smd_rx(buffer);
                return;
            }
            Completion::Failure(code) => {
                error!("smd: rx failed ({}), payload dropped", code);
                if self.recycle_smd_rx(buffer) {
                    self.smd_start_rx();
                }
                return;
            }
            Completion::Success(actual) => buffer.set_len(actual),
        }

        let room = self.smd.write_available();
        let path = self.with_state(|s| {
            if !s.accepts(&buffer) {
                return RxPath::Stale;
            }
            if s.smd.held_len.is_none() && room >= buffer.len() {
                return RxPath::Direct(buffer);
            }
            s.smd.hold(buffer);
            RxPath::Held
        });

        match path {
            RxPath::Stale => trace!("smd: stale rx completion discarded"),
            RxPath::Held => {
                trace!("smd: rx held, waiting for channel space");
                // Space may have been reported between the room sample and
                // the hold, while nothing was held yet.
                self.smd_recheck_held();
            }
            RxPath::Direct(buffer) => {
                self.smd_write_out(buffer);
                self.smd_start_rx();
            }
        }
    }

    /// Schedule [`Activation::SmdRx`] when the held head fits now.
    fn smd_recheck_held(&self) {
        let held = self.with_state(|s| s.smd.held_len);
        if let Some(len) = held {
            if self.smd.write_available() >= len {
                self.activations.schedule(Activation::SmdRx);
            }
        }
    }

    /// Write one buffer's payload to the channel and recycle the buffer.
    /// A short write loses the packet.
    fn smd_write_out(&self, buffer: TransferBuffer) {
        let len = buffer.len();
        let written = self.smd.write(buffer.data());
        if written != len {
            error!("smd: short write ({} of {} bytes)", written, len);
        }
        self.with_state(|s| {
            if written == len {
                s.counters.data_to_smd += 1;
            } else {
                s.counters.backend_write_errors += 1;
            }
            if s.accepts(&buffer) {
                s.smd.rx_idle.release(buffer);
            }
        });
    }

    /// [`Activation::SmdRx`]: drain the held FIFO while the head fits.
    pub(super) fn smd_rx_drain(&self) {
        loop {
            let head = self.with_state(|s| {
                if !s.admits(Backend::Smd) {
                    return None;
                }
                let head = s.smd.rx_queue.front().map(TransferBuffer::len);
                if head.is_none() {
                    s.smd.held_len = None;
                }
                head
            });
            let Some(len) = head else { break };

            let room = self.smd.write_available();
            let step = self.with_state(|s| {
                if !s.admits(Backend::Smd) {
                    return Drain::Stop;
                }
                if s.smd.rx_queue.front().map(TransferBuffer::len) != Some(len) {
                    return Drain::Retry;
                }
                if room < len {
                    s.smd.held_len = Some(len);
                    return Drain::Stop;
                }
                s.smd.rx_queue.pop_front().map_or(Drain::Retry, Drain::Write)
            });

            match step {
                Drain::Stop => break,
                Drain::Retry => {}
                Drain::Write(buffer) => self.smd_write_out(buffer),
            }
        }
        self.smd_start_rx();
    }

    // ── Backend → host ──────────────────────────────────────────

    /// [`Activation::SmdTx`]: move complete packets from the channel into
    /// idle tx buffers.
    pub(super) fn smd_tx_pump(&self) {
        loop {
            let size = self.smd.current_packet_size();
            if size == 0 || self.smd.read_available() < size {
                break;
            }
            let buffer = self.with_state(|s| {
                if !s.admits(Backend::Smd) {
                    return None;
                }
                s.smd.tx_idle.acquire()
            });
            let Some(mut buffer) = buffer else { break };

            if size > buffer.capacity() {
                let mut discard = vec![0; size];
                self.smd.read(&mut discard);
                let total = self.with_state(|s| {
                    s.counters.tx_dropped += 1;
                    let total = s.counters.tx_dropped;
                    if s.accepts(&buffer) {
                        s.smd.tx_idle.release_front(buffer);
                    }
                    s.drop_log.allow().then_some(total)
                });
                self.log_drop("smd: oversized packet", total);
                continue;
            }

            let read = self.smd.read(&mut buffer.storage_mut()[..size]);
            buffer.set_len(read);
            match self.transport.submit(buffer) {
                Ok(()) => self.with_state(|s| s.counters.data_to_host += 1),
                Err(Rejected { buffer, error }) => {
                    error!("smd: tx submit failed: {}, packet lost", error);
                    self.with_state(|s| {
                        if s.accepts(&buffer) {
                            s.smd.tx_idle.release_front(buffer);
                        }
                    });
                    break;
                }
            }
        }
    }

    pub(super) fn smd_tx_complete(&self, buffer: TransferBuffer, status: Completion) {
        if let Completion::Failure(code) = status {
            error!("smd: tx failed ({})", code);
        }
        let reschedule = self.with_state(|s| {
            if !s.accepts(&buffer) {
                return false;
            }
            let was_empty = s.smd.tx_idle.is_idle_empty();
            s.smd.tx_idle.release(buffer);
            was_empty && status != Completion::Aborted
        });
        if reschedule {
            self.activations.schedule(Activation::SmdTx);
        }
    }
}
