//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing relay lifecycle events to the `log`
//! facade. A platform wanting wake locks or bus performance hints wraps or
//! replaces it with an adapter implementing the same trait.

use log::{error, info, warn};

use crate::events::RelayEvent;
use crate::ports::EventSink;

/// Adapter that logs every [`RelayEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &RelayEvent) {
        match event {
            RelayEvent::Connected => info!("LINK | connected"),
            RelayEvent::Disconnected => info!("LINK | disconnected"),
            RelayEvent::BackendActive(backend) => {
                info!("XPORT | {} active", backend.name());
            }
            RelayEvent::BackendSwitched { from, to } => {
                info!(
                    "XPORT | {} -> {}",
                    from.map_or("none", |b| b.name()),
                    to.name()
                );
            }
            RelayEvent::SdioChannelOpen { attempts } => {
                info!("SDIO | channel open (attempts={})", attempts);
            }
            RelayEvent::SdioOpenFailed { attempts } => {
                error!("SDIO | channel open failed (attempts={})", attempts);
            }
            RelayEvent::SmdChannelOpen => info!("SMD | channel open"),
            RelayEvent::SmdChannelClosed => warn!("SMD | channel closed"),
        }
    }
}
