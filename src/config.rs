//! Relay configuration parameters
//!
//! All tunable parameters for the relay. Defaults match the values the
//! modem side expects; a platform may override them from persistent
//! storage (postcard) or a provisioning document (JSON).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SDIO flow-control watermarks.
///
/// Copied out of the relay lock on every completion, so kept small and
/// `Copy`. Can be replaced at runtime through
/// [`Relay::update_thresholds`](crate::relay::Relay::update_thresholds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowThresholds {
    /// Backend→host packets queued at or above this length are dropped.
    pub tx_drop: u32,
    /// Receive resubmission pauses once pending backend writes reach this.
    pub rx_enable: u32,
    /// Receive resubmission resumes once pending backend writes fall to this.
    pub rx_disable: u32,
}

impl Default for FlowThresholds {
    fn default() -> Self {
        Self {
            tx_drop: 1000,
            rx_enable: 1000,
            rx_disable: 500,
        }
    }
}

impl FlowThresholds {
    /// Hysteresis needs a gap between the two watermarks, otherwise the
    /// receive path would pause and resume on the same write.
    pub fn validate(&self) -> Result<()> {
        if self.rx_disable >= self.rx_enable {
            return Err(Error::Config("rx_disable must be below rx_enable"));
        }
        if self.tx_drop == 0 {
            return Err(Error::Config("tx_drop must be non-zero"));
        }
        Ok(())
    }
}

/// Core relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    // --- Backends ---
    /// SDIO mux logical channel carrying modem data.
    pub sdio_data_channel: u32,
    /// SMD channel name carrying modem data.
    pub smd_data_channel: heapless::String<32>,

    // --- Flow control ---
    pub flow: FlowThresholds,

    // --- SDIO channel open ---
    /// Attempts before SDIO open is declared failed.
    pub sdio_open_attempts: u32,
    /// Delay between SDIO open attempts (milliseconds).
    pub sdio_open_retry_delay_ms: u32,

    // --- USB ---
    /// Interface number reported in RESPONSE_AVAILABLE notifications.
    pub interface_id: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let mut smd_data_channel = heapless::String::new();
        let _ = smd_data_channel.push_str("DATA40");
        Self {
            sdio_data_channel: 8,
            smd_data_channel,

            flow: FlowThresholds::default(),

            sdio_open_attempts: 90,
            sdio_open_retry_delay_ms: 2000, // 3 minutes total

            interface_id: 0,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        self.flow.validate()?;
        if self.smd_data_channel.is_empty() {
            return Err(Error::Config("smd_data_channel must be named"));
        }
        if self.sdio_open_attempts == 0 {
            return Err(Error::Config("sdio_open_attempts must be non-zero"));
        }
        Ok(())
    }
}
