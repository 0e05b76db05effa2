//! Relay core: lifecycle, backend selection and the completion entry point.
//!
//! ```text
//!              ┌──────────── Relay ─────────────────────────────┐
//!  host ──OUT──┤  SDIO: rx pool ─▶ ToBackend ─▶ SdioRxDispatch ─┼──▶ SdioMux
//!      ◀──IN───┤        tx pool ◀─ ToHost   ◀── sdio_receive ───┼─── SdioMux
//!              │  SMD:  rx pool ─▶ direct / held FIFO ─▶ SmdRx ─┼──▶ SmdChannel
//!              │        tx pool ◀──────────────────── SmdTx ────┼─── SmdChannel
//!  host ◀─ctl─▶┤  Control: ToHost / ToBackend, notification     │
//!              └────────────────────────────────────────────────┘
//! ```
//!
//! Lifecycle: `Disabled → Enabling → Online → Disabling → Disabled`. The
//! [`Selector`] is `Undefined` while a backend is being torn down or brought
//! up, and nothing is admitted to the data path until a backend is
//! published.
//!
//! ## Locking
//!
//! All pools, queues, counters, the selector, the online flag and the
//! control state live in one [`RelayState`] behind an `embassy_sync`
//! blocking mutex. Port methods are never called while it is held; every
//! re-acquisition after a port call re-validates online, selector and the
//! buffer's session, and stale buffers are freed instead of requeued.

pub mod activation;
mod control;
mod sdio;
mod smd;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::buffer::{Backend, Direction, TransferBuffer};
use crate::config::{FlowThresholds, RelayConfig};
use crate::control::{ControlState, LineState};
use crate::diagnostics::{ControlDiagnostics, Counters, DiagnosticsSnapshot, DropLog};
use crate::error::{Error, Result};
use crate::events::RelayEvent;
use crate::ports::{BulkTransport, Completion, Endpoint, EventSink, SdioMux, SmdChannel};

pub use activation::{Activation, Activations};
pub use control::{ControlReader, SetupAction};

use sdio::SdioState;
use smd::SmdState;

/// Endpoints in enable order.
const ENDPOINTS: [Endpoint; 3] = [Endpoint::Notify, Endpoint::BulkIn, Endpoint::BulkOut];

/// Which backend currently owns the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selector {
    /// Transitional: no packet admission.
    Undefined,
    Sdio,
    Smd,
}

impl Selector {
    pub fn backend(self) -> Option<Backend> {
        match self {
            Self::Undefined => None,
            Self::Sdio => Some(Backend::Sdio),
            Self::Smd => Some(Backend::Smd),
        }
    }
}

impl From<Backend> for Selector {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Sdio => Self::Sdio,
            Backend::Smd => Self::Smd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkPhase {
    Disabled,
    Enabling,
    Online,
    Disabling,
}

// ── Shared state ────────────────────────────────────────────────

pub(crate) struct RelayState {
    phase: LinkPhase,
    online: bool,
    selector: Selector,
    switching: bool,
    /// Bumped on every backend bring-up; buffers carry the value they were
    /// allocated under.
    session: u32,
    flow: FlowThresholds,
    counters: Counters,
    sdio: SdioState,
    smd: SmdState,
    control: ControlState,
    drop_log: DropLog,
}

impl RelayState {
    fn new(flow: FlowThresholds) -> Self {
        Self {
            phase: LinkPhase::Disabled,
            online: false,
            selector: Selector::Undefined,
            switching: false,
            session: 0,
            flow,
            counters: Counters::default(),
            sdio: SdioState::new(),
            smd: SmdState::new(),
            control: ControlState::new(),
            drop_log: DropLog::new(),
        }
    }

    /// The data path of `backend` is live.
    fn admits(&self, backend: Backend) -> bool {
        self.online && self.selector == Selector::from(backend)
    }

    /// A completed buffer belongs to the live data path and may be reused.
    fn accepts(&self, buffer: &TransferBuffer) -> bool {
        self.admits(buffer.owner()) && buffer.session() == self.session
    }

    /// Start a new session for a backend bring-up.
    fn next_session(&mut self) -> u32 {
        self.session = self.session.wrapping_add(1);
        self.session
    }

    fn teardown(&mut self, backend: Backend) -> usize {
        match backend {
            Backend::Sdio => self.sdio.teardown(),
            Backend::Smd => self.smd.teardown(),
        }
    }
}

// ── Relay ───────────────────────────────────────────────────────

/// The modem data relay.
///
/// Shared between completion contexts, backend callbacks, the control
/// reader and the worker; all methods take `&self`.
pub struct Relay<T, S, M, E> {
    config: RelayConfig,
    transport: T,
    sdio: S,
    smd: M,
    events: E,
    state: Mutex<CriticalSectionRawMutex, RefCell<RelayState>>,
    activations: Activations,
    /// Wakes a control reader blocked on an empty queue or a disconnect.
    reader_wake: Signal<CriticalSectionRawMutex, ()>,
    /// Raised by `SmdEvent::Open`.
    smd_ready: Signal<CriticalSectionRawMutex, ()>,
}

impl<T, S, M, E> Relay<T, S, M, E> {
    fn with_state<R>(&self, f: impl FnOnce(&mut RelayState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sdio_mux(&self) -> &S {
        &self.sdio
    }

    pub fn smd_channel(&self) -> &M {
        &self.smd
    }

    pub fn event_sink(&self) -> &E {
        &self.events
    }

    pub fn activations(&self) -> &Activations {
        &self.activations
    }

    pub fn is_online(&self) -> bool {
        self.with_state(|s| s.online)
    }

    pub fn phase(&self) -> LinkPhase {
        self.with_state(|s| s.phase)
    }

    pub fn selector(&self) -> Selector {
        self.with_state(|s| s.selector)
    }

    pub fn counters(&self) -> Counters {
        self.with_state(|s| s.counters)
    }

    pub fn line_state(&self) -> LineState {
        self.with_state(|s| s.control.line_state())
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.with_state(|s| DiagnosticsSnapshot {
            phase: s.phase,
            online: s.online,
            selector: s.selector,
            session: s.session,
            counters: s.counters,
            sdio: s.sdio.diagnostics(),
            smd: s.smd.diagnostics(),
            control: ControlDiagnostics {
                reader_open: s.control.reader_open(),
                dtr: s.control.line_state().dtr(),
                to_host_queued: s.control.to_host_len(),
                to_backend_queued: s.control.to_backend_len(),
                notify_count: s.control.notify_count(),
            },
        })
    }

    /// Zero the packet counters. Flow-control state is left alone.
    pub fn reset_counters(&self) {
        self.with_state(|s| s.counters = Counters::default());
        debug!("relay: counters reset");
    }

    /// Replace the SDIO watermarks at runtime.
    pub fn update_thresholds(&self, flow: FlowThresholds) -> Result<()> {
        flow.validate()?;
        self.with_state(|s| s.flow = flow);
        info!(
            "relay: thresholds tx_drop={} rx_enable={} rx_disable={}",
            flow.tx_drop, flow.rx_enable, flow.rx_disable
        );
        Ok(())
    }
}

impl<T, S, M, E> Relay<T, S, M, E>
where
    T: BulkTransport,
    S: SdioMux,
    M: SmdChannel,
    E: EventSink,
{
    pub fn new(config: RelayConfig, transport: T, sdio: S, smd: M, events: E) -> Result<Self> {
        config.validate()?;
        let flow = config.flow;
        Ok(Self {
            config,
            transport,
            sdio,
            smd,
            events,
            state: Mutex::new(RefCell::new(RelayState::new(flow))),
            activations: Activations::new(),
            reader_wake: Signal::new(),
            smd_ready: Signal::new(),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Host selected the data interface: enable endpoints, go online and
    /// bring up `backend`.
    ///
    /// When the backend cannot be brought up the relay stays online with no
    /// backend selected and the error is returned; a later
    /// [`switch`](Self::switch) may still succeed.
    pub fn enable(&self, backend: Backend) -> Result<()> {
        self.with_state(|s| {
            if s.phase != LinkPhase::Disabled {
                return Err(Error::InvalidState("relay already enabled"));
            }
            s.phase = LinkPhase::Enabling;
            Ok(())
        })?;

        if let Err(e) = self.enable_endpoints() {
            self.with_state(|s| s.phase = LinkPhase::Disabled);
            return Err(e);
        }

        self.with_state(|s| {
            s.counters = Counters::default();
            s.sdio.reset_pending();
            s.online = true;
            s.switching = true;
            s.phase = LinkPhase::Online;
        });
        info!("relay: online");
        self.events.emit(&RelayEvent::Connected);

        let result = self.bring_up(backend);
        self.with_state(|s| s.switching = false);
        result
    }

    fn enable_endpoints(&self) -> Result<()> {
        for (i, endpoint) in ENDPOINTS.iter().enumerate() {
            if let Err(e) = self.transport.enable(*endpoint) {
                error!("relay: cannot enable {:?}: {}", endpoint, e);
                for enabled in ENDPOINTS[..i].iter().rev() {
                    self.transport.disable(*enabled);
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Host deconfigured the interface or reset. Idempotent.
    pub fn disable(&self) {
        let was_online = self.with_state(|s| {
            if !s.online {
                return false;
            }
            s.online = false;
            s.phase = LinkPhase::Disabling;
            s.control.set_line_state(LineState::default());
            true
        });
        if !was_online {
            debug!("relay: disable while offline ignored");
            return;
        }

        // In-flight transfers come back Aborted and are freed.
        for endpoint in ENDPOINTS {
            self.transport.disable(endpoint);
        }
        self.activations.cancel_all();

        let freed = self.with_state(|s| {
            let freed = s.sdio.teardown() + s.smd.teardown() + s.control.reset();
            s.selector = Selector::Undefined;
            s.phase = LinkPhase::Disabled;
            freed
        });
        info!("relay: offline ({} buffers and packets freed)", freed);

        self.events.emit(&RelayEvent::Disconnected);
        self.reader_wake.signal(());
        self.smd_ready.signal(());
    }

    /// Move the data path to `backend` while online.
    ///
    /// In-flight transfers of the old backend are flushed; their late
    /// completions are recognised as stale and freed.
    pub fn switch(&self, backend: Backend) -> Result<()> {
        let previous = self.with_state(|s| {
            if !s.online {
                return Err(Error::NotConnected);
            }
            if s.switching {
                return Err(Error::Busy);
            }
            if s.selector == Selector::from(backend) {
                return Ok(None);
            }
            s.switching = true;
            Ok(Some(core::mem::replace(&mut s.selector, Selector::Undefined)))
        })?;
        let Some(previous) = previous else {
            info!("relay: already on {}", backend.name());
            return Ok(());
        };

        if let Some(old) = previous.backend() {
            for direction in [Direction::In, Direction::Out] {
                self.transport.flush(Endpoint::for_direction(direction));
            }
            if old == Backend::Smd {
                self.activations.cancel(Activation::SmdRx);
                self.activations.cancel(Activation::SmdTx);
            } else {
                self.activations.cancel(Activation::SdioRxDispatch);
            }
            let freed = self.with_state(|s| s.teardown(old));
            debug!("relay: {} torn down ({} freed)", old.name(), freed);
        }

        let result = self.bring_up(backend);
        self.with_state(|s| s.switching = false);
        if result.is_ok() {
            info!("relay: switched {:?} -> {}", previous, backend.name());
            self.events.emit(&RelayEvent::BackendSwitched {
                from: previous.backend(),
                to: backend,
            });
        }
        result
    }

    /// Runtime selection surface: integer text, non-zero selects SDIO and
    /// zero selects SMD.
    pub fn select_backend(&self, input: &str) -> Result<()> {
        let value: i64 = input
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput("transport selection is not an integer"))?;
        let backend = if value == 0 { Backend::Smd } else { Backend::Sdio };
        self.switch(backend)
    }

    fn bring_up(&self, backend: Backend) -> Result<()> {
        let result = match backend {
            Backend::Sdio => self.sdio_bring_up(),
            Backend::Smd => self.smd_bring_up(),
        };
        match result {
            Ok(()) => {
                info!("relay: {} active", backend.name());
                self.events.emit(&RelayEvent::BackendActive(backend));
                Ok(())
            }
            Err(e) => {
                error!("relay: {} bring-up failed: {}", backend.name(), e);
                Err(e)
            }
        }
    }

    /// Bus suspended: the host can no longer assert DTR.
    pub fn suspend(&self) {
        let dropped = self.with_state(|s| {
            if !s.online {
                return false;
            }
            s.control.set_line_state(LineState::default());
            true
        });
        if dropped {
            debug!("relay: suspended, DTR dropped");
        }
    }

    /// Function removed: disconnect and close the SMD channel.
    pub fn unbind(&self) {
        self.disable();
        let was_open = self.with_state(|s| s.smd.close());
        if was_open {
            self.smd.close();
            info!("smd: channel closed on unbind");
            self.events.emit(&RelayEvent::SmdChannelClosed);
        }
    }

    // ── Completion entry point ──────────────────────────────────

    /// A bulk transfer submitted through [`BulkTransport::submit`] finished.
    pub fn transfer_complete(&self, buffer: TransferBuffer, status: Completion) {
        match (buffer.owner(), buffer.direction()) {
            (Backend::Sdio, Direction::Out) => self.sdio_rx_complete(buffer, status),
            (Backend::Sdio, Direction::In) => self.sdio_tx_complete(buffer, status),
            (Backend::Smd, Direction::Out) => self.smd_rx_complete(buffer, status),
            (Backend::Smd, Direction::In) => self.smd_tx_complete(buffer, status),
        }
    }

    // ── Activations ─────────────────────────────────────────────

    /// Run one activation's routine now.
    ///
    /// When another driver (the worker or a concurrent `run_pending`) is
    /// already running it, that driver is asked to run it once more and
    /// `false` is returned.
    pub fn run_activation(&self, activation: Activation) -> bool {
        let acts = &self.activations;
        if !acts.try_claim(activation) {
            acts.defer(activation);
            // The holder may have released before it saw the deferral.
            if !acts.try_claim(activation) {
                return false;
            }
        }
        loop {
            acts.take_deferred(activation);
            match activation {
                Activation::SdioRxDispatch => self.sdio_dispatch(),
                Activation::SmdRx => self.smd_rx_drain(),
                Activation::SmdTx => self.smd_tx_pump(),
            }
            acts.release(activation);
            if !acts.take_deferred(activation) || !acts.try_claim(activation) {
                return true;
            }
        }
    }

    /// Run every pending activation until none is left. Returns how many
    /// routines ran.
    ///
    /// Meant for drivers without a [`worker`](crate::worker). Used next to
    /// one it stays single-flight, but leaves busy directions to the worker.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let mut progressed = false;
            for activation in Activation::ALL {
                if self.activations.is_running(activation) {
                    continue;
                }
                if self.activations.take(activation) && self.run_activation(activation) {
                    ran += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return ran;
            }
        }
    }

    fn log_drop(&self, what: &str, total: Option<u64>) {
        if let Some(total) = total {
            warn!("relay: {} dropped (total {})", what, total);
        }
    }
}
