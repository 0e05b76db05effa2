//! Adapters: concrete implementations of the port traits that need no
//! platform driver.
//!
//! | Adapter    | Implements                | Connects to          |
//! |------------|---------------------------|----------------------|
//! | `log_sink` | EventSink                 | `log` facade         |
//! | `delay`    | embedded_hal `DelayNs`    | `std::thread::sleep` |
//!
//! The bulk transport and backend interconnects are platform drivers and
//! live outside this crate.

pub mod delay;
pub mod log_sink;
