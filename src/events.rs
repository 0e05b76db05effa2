//! Outbound relay events.
//!
//! The [`Relay`](crate::relay::Relay) emits these through the
//! [`EventSink`](crate::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log them, raise a wake lock, bump a bus
//! performance level.

use crate::buffer::Backend;

/// Structured events emitted by the relay core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    /// Host configured the data interface; the relay is online.
    Connected,

    /// Host went away or reset the interface; everything was torn down.
    Disconnected,

    /// A backend's pools were allocated and its receive path started.
    BackendActive(Backend),

    /// The data path moved between backends.
    BackendSwitched { from: Option<Backend>, to: Backend },

    /// SDIO data channel opened after this many attempts.
    SdioChannelOpen { attempts: u32 },

    /// SDIO data channel could not be opened; no further retries.
    SdioOpenFailed { attempts: u32 },

    /// SMD channel confirmed open.
    SmdChannelOpen,

    /// SMD channel closed by the remote side or on unbind.
    SmdChannelClosed,
}
