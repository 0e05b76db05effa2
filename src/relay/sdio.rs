//! SDIO mux data path.
//!
//! Host→backend: every receive completion moves its payload onto the
//! ToBackend queue and schedules [`Activation::SdioRxDispatch`], which
//! hands packets to the mux one at a time. Each hand-off counts as a
//! pending write until the mux reports it done. Receive resubmission
//! follows a hysteresis on that count:
//!
//! ```text
//!   pending >= rx_enable   receive paused: completions park their buffers
//!   pending <= rx_disable  write-done lifts the pause and resubmits
//! ```
//!
//! The pause is latched: between the two watermarks a paused path stays
//! paused and a running path keeps running. Writes are tagged with the
//! session they were issued under; acknowledgments from an earlier session
//! do not touch the current count.
//!
//! Backend→host: packets from the mux queue on ToHost (dropped once the
//! queue reaches `tx_drop`) and are sent while idle tx buffers exist.

use std::collections::VecDeque;

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, trace, warn};

use super::{Activation, Relay};
use crate::buffer::{
    Backend, BufferPool, Direction, Packet, SDIO_RX_BUFFER_SIZE, SDIO_RX_BUFFERS, SDIO_TX_BUFFERS,
    TransferBuffer,
};
use crate::diagnostics::SdioDiagnostics;
use crate::error::{BackendError, Error, Result};
use crate::events::RelayEvent;
use crate::ports::{BulkTransport, Completion, EventSink, Rejected, SdioMux, SmdChannel};

pub(super) struct SdioState {
    rx_idle: BufferPool<SDIO_RX_BUFFERS>,
    tx_idle: BufferPool<SDIO_TX_BUFFERS>,
    /// Host data awaiting dispatch to the mux.
    to_backend: VecDeque<Packet>,
    /// Mux data awaiting an idle tx buffer.
    to_host: VecDeque<Packet>,
    /// Writes handed to the mux and not yet acknowledged.
    pending: u32,
    /// Set at `rx_enable`, cleared at `rx_disable`.
    rx_paused: bool,
    channel_open: bool,
}

impl SdioState {
    pub(super) fn new() -> Self {
        Self {
            rx_idle: BufferPool::new(),
            tx_idle: BufferPool::new(),
            to_backend: VecDeque::new(),
            to_host: VecDeque::new(),
            pending: 0,
            rx_paused: false,
            channel_open: false,
        }
    }

    fn populate(&mut self, session: u32) {
        let tagged = |direction| {
            let mut buffer = TransferBuffer::empty(direction, Backend::Sdio);
            buffer.set_session(session);
            buffer
        };
        self.rx_idle.populate(SDIO_RX_BUFFERS, || tagged(Direction::Out));
        self.tx_idle.populate(SDIO_TX_BUFFERS, || tagged(Direction::In));
    }

    pub(super) fn reset_pending(&mut self) {
        self.pending = 0;
        self.rx_paused = false;
    }

    /// Latch the pause once pending reaches `rx_enable`. Returns whether
    /// receive is paused.
    fn check_pause(&mut self, rx_enable: u32) -> bool {
        if self.pending >= rx_enable {
            self.rx_paused = true;
        }
        self.rx_paused
    }

    /// Free pools and queues. Buffers still in flight are freed on
    /// completion.
    pub(super) fn teardown(&mut self) -> usize {
        let freed = self.rx_idle.clear()
            + self.tx_idle.clear()
            + self.to_backend.len()
            + self.to_host.len();
        self.to_backend.clear();
        self.to_host.clear();
        self.reset_pending();
        freed
    }

    pub(super) fn diagnostics(&self) -> SdioDiagnostics {
        SdioDiagnostics {
            channel_open: self.channel_open,
            pending_writes: self.pending,
            rx_paused: self.rx_paused,
            to_backend_queued: self.to_backend.len(),
            to_host_queued: self.to_host.len(),
            rx_idle: self.rx_idle.idle(),
            tx_idle: self.tx_idle.idle(),
        }
    }
}

/// What a receive completion leads to, decided under the lock.
enum RxNext {
    Stale,
    Parked,
    Resubmit(TransferBuffer),
}

enum Admission {
    Inactive,
    Queued,
    /// Carries the drop total when the drop may be logged.
    Dropped(Option<u64>),
}

impl<T, S, M, E> Relay<T, S, M, E>
where
    T: BulkTransport,
    S: SdioMux,
    M: SmdChannel,
    E: EventSink,
{
    /// Open the SDIO data channel, retrying with a fixed delay.
    ///
    /// Blocks for up to `sdio_open_attempts × sdio_open_retry_delay_ms`;
    /// call it from a background context at bind time.
    pub fn open_sdio(&self, delay: &mut impl DelayNs) -> Result<()> {
        let channel = self.config.sdio_data_channel;
        let allowed = self.config.sdio_open_attempts;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.sdio.open(channel) {
                Ok(()) => {
                    self.with_state(|s| s.sdio.channel_open = true);
                    info!("sdio: channel {} open after {} attempt(s)", channel, attempts);
                    self.events.emit(&RelayEvent::SdioChannelOpen { attempts });
                    return Ok(());
                }
                Err(e) if attempts >= allowed => {
                    error!(
                        "sdio: channel {} open failed after {} attempts: {}",
                        channel, attempts, e
                    );
                    self.events.emit(&RelayEvent::SdioOpenFailed { attempts });
                    return Err(BackendError::OpenExhausted { attempts }.into());
                }
                Err(e) => {
                    debug!("sdio: open attempt {} failed: {}", attempts, e);
                    delay.delay_ms(self.config.sdio_open_retry_delay_ms);
                }
            }
        }
    }

    pub(super) fn sdio_bring_up(&self) -> Result<()> {
        let published = self.with_state(|s| {
            if !s.online {
                return None;
            }
            let session = s.next_session();
            s.sdio.populate(session);
            s.selector = Backend::Sdio.into();
            Some(s.sdio.channel_open)
        });
        let Some(channel_open) = published else {
            return Err(Error::NotConnected);
        };
        if !channel_open {
            warn!("sdio: data channel not open yet, host data will fail to write");
        }
        self.sdio_start_rx();
        Ok(())
    }

    // ── Host → backend ──────────────────────────────────────────

    /// Submit idle receive buffers until the pool is empty or receive is
    /// paused.
    pub(super) fn sdio_start_rx(&self) {
        loop {
            let buffer = self.with_state(|s| {
                if !s.admits(Backend::Sdio) || s.sdio.check_pause(s.flow.rx_enable) {
                    return None;
                }
                s.sdio.rx_idle.acquire()
            });
            let Some(mut buffer) = buffer else { break };
            buffer.arm(SDIO_RX_BUFFER_SIZE);
            if let Err(Rejected { buffer, error }) = self.transport.submit(buffer) {
                error!("sdio: rx submit failed: {}", error);
                self.park_sdio_rx(buffer);
                break;
            }
        }
    }

    fn park_sdio_rx(&self, buffer: TransferBuffer) {
        self.with_state(|s| {
            if s.accepts(&buffer) {
                s.sdio.rx_idle.release(buffer);
            }
        });
    }

    pub(super) fn sdio_rx_complete(&self, mut buffer: TransferBuffer, status: Completion) {
        let packet = match status {
            Completion::Success(actual) => {
                buffer.set_len(actual);
                Some(Packet::new(buffer.detach()))
            }
            Completion::Aborted => {
                trace!("sdio: rx aborted, buffer freed");
                return;
            }
            Completion::Failure(code) => {
                error!("sdio: rx failed ({}), payload dropped", code);
                drop(buffer.detach());
                None
            }
        };
        let queued = packet.is_some();

        let next = self.with_state(|s| {
            if !s.accepts(&buffer) {
                return RxNext::Stale;
            }
            if let Some(packet) = packet {
                s.sdio.to_backend.push_back(packet);
            }
            if s.sdio.check_pause(s.flow.rx_enable) {
                s.sdio.rx_idle.release(buffer);
                return RxNext::Parked;
            }
            RxNext::Resubmit(buffer)
        });

        match next {
            RxNext::Stale => trace!("sdio: stale rx completion discarded"),
            RxNext::Parked => {
                debug!("sdio: rx paused at pending watermark");
                if queued {
                    self.activations.schedule(Activation::SdioRxDispatch);
                }
            }
            RxNext::Resubmit(mut buffer) => {
                if queued {
                    self.activations.schedule(Activation::SdioRxDispatch);
                }
                buffer.arm(SDIO_RX_BUFFER_SIZE);
                if let Err(Rejected { buffer, error }) = self.transport.submit(buffer) {
                    error!("sdio: rx resubmit failed: {}", error);
                    self.park_sdio_rx(buffer);
                }
            }
        }
    }

    /// [`Activation::SdioRxDispatch`]: drain ToBackend into the mux.
    pub(super) fn sdio_dispatch(&self) {
        let channel = self.config.sdio_data_channel;
        loop {
            // Counted before the write so a synchronous write-done cannot
            // underflow the pending count.
            let packet = self.with_state(|s| {
                if !s.admits(Backend::Sdio) {
                    return None;
                }
                let mut packet = s.sdio.to_backend.pop_front()?;
                packet.set_session(s.session);
                s.sdio.pending += 1;
                Some(packet)
            });
            let Some(packet) = packet else { break };
            let session = packet.session();

            match self.sdio.write(channel, packet) {
                Ok(()) => self.with_state(|s| s.counters.data_to_sdio += 1),
                Err(e) => {
                    error!("sdio: write failed: {}", e);
                    self.with_state(|s| s.counters.backend_write_errors += 1);
                    self.sdio_retire_write(session);
                }
            }
        }
    }

    /// The mux finished with a packet handed to [`SdioMux::write`].
    pub fn sdio_write_done(&self, packet: Packet) {
        self.sdio_retire_write(packet.session());
    }

    fn sdio_retire_write(&self, session: u32) {
        let resume = self.with_state(|s| {
            if !s.admits(Backend::Sdio) || session != s.session {
                return None;
            }
            s.sdio.pending = s.sdio.pending.saturating_sub(1);
            let resumed = s.sdio.rx_paused && s.sdio.pending <= s.flow.rx_disable;
            if resumed {
                s.sdio.rx_paused = false;
            }
            Some((resumed, !s.sdio.rx_paused && !s.sdio.rx_idle.is_idle_empty()))
        });
        match resume {
            None => trace!("sdio: write-done from earlier session ignored"),
            Some((resumed, restart)) => {
                if resumed {
                    debug!("sdio: rx resumed at pending watermark");
                }
                if restart {
                    self.sdio_start_rx();
                }
            }
        }
    }

    // ── Backend → host ──────────────────────────────────────────

    /// The mux delivered a packet for the host.
    pub fn sdio_receive(&self, packet: Packet) {
        let admission = self.with_state(|s| {
            if !s.admits(Backend::Sdio) {
                return Admission::Inactive;
            }
            if s.sdio.to_host.len() >= s.flow.tx_drop as usize {
                s.counters.tx_dropped += 1;
                let total = s.counters.tx_dropped;
                return Admission::Dropped(s.drop_log.allow().then_some(total));
            }
            s.sdio.to_host.push_back(packet);
            Admission::Queued
        });
        match admission {
            Admission::Inactive => trace!("sdio: packet for host discarded, path not active"),
            Admission::Queued => self.sdio_start_tx(),
            Admission::Dropped(total) => self.log_drop("sdio: tx packet", total),
        }
    }

    pub(super) fn sdio_start_tx(&self) {
        loop {
            let work = self.with_state(|s| {
                if !s.admits(Backend::Sdio) {
                    return None;
                }
                let buffer = s.sdio.tx_idle.acquire()?;
                match s.sdio.to_host.pop_front() {
                    Some(packet) => Some((buffer, packet)),
                    None => {
                        s.sdio.tx_idle.release_front(buffer);
                        None
                    }
                }
            });
            let Some((mut buffer, packet)) = work else { break };

            buffer.attach(packet.into_inner());
            match self.transport.submit(buffer) {
                Ok(()) => self.with_state(|s| s.counters.data_to_host += 1),
                Err(Rejected { mut buffer, error }) => {
                    error!("sdio: tx submit failed: {}", error);
                    let packet = Packet::new(buffer.detach());
                    self.with_state(|s| {
                        if s.accepts(&buffer) {
                            s.sdio.to_host.push_front(packet);
                            s.sdio.tx_idle.release_front(buffer);
                        }
                    });
                    break;
                }
            }
        }
    }

    pub(super) fn sdio_tx_complete(&self, mut buffer: TransferBuffer, status: Completion) {
        drop(buffer.detach());
        match status {
            Completion::Aborted => {
                trace!("sdio: tx aborted, buffer freed");
                return;
            }
            Completion::Failure(code) => error!("sdio: tx failed ({})", code),
            Completion::Success(_) => {}
        }
        let recycled = self.with_state(|s| {
            if !s.accepts(&buffer) {
                return false;
            }
            s.sdio.tx_idle.release(buffer);
            true
        });
        if recycled {
            self.sdio_start_tx();
        }
    }
}
