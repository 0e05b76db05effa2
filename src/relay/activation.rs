//! Deferred, single-flight activation units.
//!
//! Completion handlers never do backend I/O that may take long; they
//! schedule an activation instead. Each activation is an
//! `embassy_sync` [`Signal`]: scheduling an already-pending activation is a
//! no-op, so any number of requests coalesce into one run.
//!
//! ```text
//!   completion / callback ──schedule──▶ Signal ──▶ run_pending()  (polling)
//!                                          └────▶ worker task     (thread)
//! ```
//!
//! A routine runs only while its driver holds the activation's claim, so
//! two drivers never execute the same direction at once. A driver that
//! loses the claim defers to the holder, which runs the routine again
//! after releasing.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// One deferred direction of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Drain the host→backend SDIO packet queue into the mux.
    SdioRxDispatch,
    /// Drain held host→backend SMD buffers into the channel.
    SmdRx,
    /// Pull complete packets from the SMD channel towards the host.
    SmdTx,
}

impl Activation {
    pub const ALL: [Self; 3] = [Self::SdioRxDispatch, Self::SmdRx, Self::SmdTx];

    const fn slot(self) -> usize {
        self as usize
    }
}

pub struct Activations {
    slots: [Signal<CriticalSectionRawMutex, ()>; 3],
    running: [AtomicBool; 3],
    deferred: [AtomicBool; 3],
}

impl Activations {
    pub const fn new() -> Self {
        Self {
            slots: [Signal::new(), Signal::new(), Signal::new()],
            running: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
            deferred: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
        }
    }

    /// Claim the right to run `activation`. Returns `false` while another
    /// driver is running it.
    pub fn try_claim(&self, activation: Activation) -> bool {
        self.running[activation.slot()]
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release(&self, activation: Activation) {
        self.running[activation.slot()].store(false, Ordering::Release);
    }

    pub fn is_running(&self, activation: Activation) -> bool {
        self.running[activation.slot()].load(Ordering::Acquire)
    }

    /// Ask the current claim holder for another run.
    pub(crate) fn defer(&self, activation: Activation) {
        self.deferred[activation.slot()].store(true, Ordering::Release);
    }

    pub(crate) fn take_deferred(&self, activation: Activation) -> bool {
        self.deferred[activation.slot()].swap(false, Ordering::AcqRel)
    }

    /// Request a run. Returns `false` when one was already pending.
    pub fn schedule(&self, activation: Activation) -> bool {
        let signal = &self.slots[activation.slot()];
        let fresh = !signal.signaled();
        signal.signal(());
        fresh
    }

    /// Consume a pending request, if any.
    pub fn take(&self, activation: Activation) -> bool {
        self.slots[activation.slot()].try_take().is_some()
    }

    pub fn is_pending(&self, activation: Activation) -> bool {
        self.slots[activation.slot()].signaled()
    }

    /// Wait until the activation is requested, consuming the request.
    pub async fn wait(&self, activation: Activation) {
        self.slots[activation.slot()].wait().await;
    }

    /// Drop a pending request. A worker already waiting stays registered.
    pub fn cancel(&self, activation: Activation) {
        let _ = self.slots[activation.slot()].try_take();
    }

    pub fn cancel_all(&self) {
        for activation in Activation::ALL {
            self.cancel(activation);
        }
    }
}

impl Default for Activations {
    fn default() -> Self {
        Self::new()
    }
}
