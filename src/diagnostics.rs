//! Relay counters and runtime diagnostics.
//!
//! Counters are plain integers folded under the relay lock; they never feed
//! back into control flow. The flow-control values (SDIO pending writes,
//! queue depths) are reported alongside but live in the adapters and are
//! not touched by [`Relay::reset_counters`](crate::relay::Relay::reset_counters).
//!
//! A snapshot renders three ways: a human-readable status page
//! (`Display`), JSON for host tooling, and postcard for compact storage.

use core::fmt;
use core::time::Duration;

use burster::Limiter;
use serde::{Deserialize, Serialize};

use crate::relay::{LinkPhase, Selector};

/// Packet counters since the last connect or reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Host data handed to the SDIO mux.
    pub data_to_sdio: u64,
    /// Host data written to the SMD channel.
    pub data_to_smd: u64,
    /// Backend data submitted to the host.
    pub data_to_host: u64,
    /// Control commands delivered to the reader.
    pub ctrl_to_backend: u64,
    /// Control responses returned to the host.
    pub ctrl_to_host: u64,
    /// Backend→host packets dropped at the SDIO queue limit.
    pub tx_dropped: u64,
    /// Host commands dropped because no reader was registered.
    pub ctrl_dropped: u64,
    /// Backend writes refused or truncated.
    pub backend_write_errors: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdioDiagnostics {
    pub channel_open: bool,
    pub pending_writes: u32,
    pub rx_paused: bool,
    pub to_backend_queued: usize,
    pub to_host_queued: usize,
    pub rx_idle: usize,
    pub tx_idle: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmdDiagnostics {
    pub channel_open: bool,
    pub rx_queued: usize,
    /// Length of the oldest queued receive, if any.
    pub rx_head_len: Option<usize>,
    pub held_len: Option<usize>,
    pub rx_idle: usize,
    pub tx_idle: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDiagnostics {
    pub reader_open: bool,
    pub dtr: bool,
    pub to_host_queued: usize,
    pub to_backend_queued: usize,
    pub notify_count: u32,
}

/// Point-in-time view of the whole relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub phase: LinkPhase,
    pub online: bool,
    pub selector: Selector,
    pub session: u32,
    pub counters: Counters,
    pub sdio: SdioDiagnostics,
    pub smd: SmdDiagnostics,
    pub control: ControlDiagnostics,
}

impl DiagnosticsSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

impl fmt::Display for DiagnosticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "phase: {:?}  online: {}  xport: {:?}", self.phase, self.online, self.selector)?;
        writeln!(
            f,
            "dpkts_to_sdio: {}  dpkts_to_smd: {}  dpkts_to_host: {}",
            c.data_to_sdio, c.data_to_smd, c.data_to_host
        )?;
        writeln!(
            f,
            "cpkts_to_backend: {}  cpkts_to_host: {}  cpkts_dropped: {}",
            c.ctrl_to_backend, c.ctrl_to_host, c.ctrl_dropped
        )?;
        writeln!(
            f,
            "tx_dropped: {}  backend_write_errors: {}",
            c.tx_dropped, c.backend_write_errors
        )?;
        writeln!(
            f,
            "sdio: open={} pending={} paused={} rx_q={} tx_q={} rx_idle={} tx_idle={}",
            self.sdio.channel_open,
            self.sdio.pending_writes,
            self.sdio.rx_paused,
            self.sdio.to_backend_queued,
            self.sdio.to_host_queued,
            self.sdio.rx_idle,
            self.sdio.tx_idle
        )?;
        writeln!(
            f,
            "smd: open={} rx_q={} held={:?} rx_idle={} tx_idle={}",
            self.smd.channel_open,
            self.smd.rx_queued,
            self.smd.held_len,
            self.smd.rx_idle,
            self.smd.tx_idle
        )?;
        write!(
            f,
            "ctrl: reader={} dtr={} to_host={} to_backend={} notify={}",
            self.control.reader_open,
            self.control.dtr,
            self.control.to_host_queued,
            self.control.to_backend_queued,
            self.control.notify_count
        )
    }
}

// ── Rate-limited drop logging ─────────────────────────────────

/// Token bucket guarding log lines on drop paths, so a flooding peer
/// cannot flood the log as well.
pub(crate) struct DropLog {
    bucket: burster::TokenBucket<fn() -> Duration>,
}

impl DropLog {
    pub(crate) fn new() -> Self {
        Self {
            bucket: burster::TokenBucket::new_with_time_provider(
                10,
                10, // 10 lines per second, burst of 10
                platform_now as fn() -> Duration,
            ),
        }
    }

    /// `true` when a drop may be logged now.
    pub(crate) fn allow(&mut self) -> bool {
        self.bucket.try_consume(1).is_ok()
    }
}

fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}
