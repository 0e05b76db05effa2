//! Modem data relay library.
//!
//! Bridges a USB bulk data interface to one of two modem interconnects
//! (SDIO mux or SMD channel) and carries the CDC encapsulated control
//! channel alongside. Platform drivers plug in through the traits in
//! [`ports`]; everything else is host-testable pure logic.

#![deny(unused_must_use)]

pub mod adapters;
pub mod buffer;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod ports;
pub mod relay;
pub mod worker;

pub use buffer::{Backend, Packet, TransferBuffer};
pub use config::{FlowThresholds, RelayConfig};
pub use error::{Error, Result};
pub use relay::{ControlReader, Relay, Selector, SetupAction};
