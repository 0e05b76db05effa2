//! Relay side of the control channel: host class requests, the exclusive
//! reader handle and RESPONSE_AVAILABLE notifications.

use log::{debug, error, trace};

use super::Relay;
use crate::control::setup::{ControlRequest, Notification, SetupPacket};
use crate::control::{ControlPacket, Ingest, LineState, MAX_CONTROL_PACKET};
use crate::error::{ControlError, Error, Result};
use crate::ports::{BulkTransport, Completion, EventSink, SdioMux, SmdChannel};

/// What the USB stack must do after [`Relay::setup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupAction {
    /// Receive `length` bytes in the data stage and pass them to
    /// [`Relay::command_received`].
    ReceiveCommand { length: u16 },
    /// Send `packet` in the data stage, terminated with a zero-length
    /// packet when shorter than the host asked for.
    Respond {
        packet: ControlPacket,
        zero_length_packet: bool,
    },
    /// Nothing to transfer; complete the status stage.
    Acknowledge,
}

impl<T, S, M, E> Relay<T, S, M, E>
where
    T: BulkTransport,
    S: SdioMux,
    M: SmdChannel,
    E: EventSink,
{
    // ── Host control surface ────────────────────────────────────

    /// Serve a class request on the control endpoint. An error means the
    /// request must be stalled.
    pub fn setup(&self, setup: &SetupPacket) -> Result<SetupAction> {
        if !self.is_online() {
            return Err(Error::NotConnected);
        }
        let request = ControlRequest::decode(setup).inspect_err(|_| {
            debug!(
                "ctrl: invalid request {:02x}.{:02x} v{:04x} i{:04x} l{}",
                setup.request_type, setup.request, setup.value, setup.index, setup.length
            );
        })?;

        match request {
            ControlRequest::SendEncapsulatedCommand { length } => {
                if usize::from(length) > MAX_CONTROL_PACKET {
                    return Err(ControlError::TooLarge {
                        len: usize::from(length),
                    }
                    .into());
                }
                Ok(SetupAction::ReceiveCommand { length })
            }
            ControlRequest::GetEncapsulatedResponse { length } => {
                let packet = self.get_response(usize::from(length))?;
                let zero_length_packet = packet.len() < usize::from(length);
                Ok(SetupAction::Respond {
                    packet,
                    zero_length_packet,
                })
            }
            ControlRequest::SetControlLineState { value } => {
                self.set_control_line_state(value)?;
                Ok(SetupAction::Acknowledge)
            }
        }
    }

    /// Data stage of SEND_ENCAPSULATED_COMMAND finished.
    pub fn command_received(&self, data: &[u8], status: Completion) -> Result<Ingest> {
        match status {
            Completion::Success(actual) => self.send_command(&data[..actual.min(data.len())]),
            Completion::Aborted | Completion::Failure(_) => {
                error!("ctrl: command data stage ended with {:?}", status);
                Err(ControlError::DataStageFailed.into())
            }
        }
    }

    /// Ingest a host command for the backend reader. Without a registered
    /// reader the command is dropped; the host is not told.
    pub fn send_command(&self, data: &[u8]) -> Result<Ingest> {
        let packet = ControlPacket::from_slice(data)?;
        trace!("ctrl: command {:02x?}", packet.as_slice());

        let (outcome, drop_total) = self.with_state(|s| {
            if !s.online {
                return Err(Error::NotConnected);
            }
            let outcome = s.control.ingest_command(packet);
            if outcome == Ingest::Dropped {
                s.counters.ctrl_dropped += 1;
                let total = s.counters.ctrl_dropped;
                return Ok((outcome, s.drop_log.allow().then_some(total)));
            }
            Ok((outcome, None))
        })?;

        match outcome {
            Ingest::Queued => self.reader_wake.signal(()),
            Ingest::Dropped => self.log_drop("ctrl: command without reader", drop_total),
        }
        Ok(outcome)
    }

    /// Pop the oldest response, truncated to `max_len` bytes.
    pub fn get_response(&self, max_len: usize) -> Result<ControlPacket> {
        let packet = self.with_state(|s| {
            if !s.online {
                return Err(Error::NotConnected);
            }
            let packet = s
                .control
                .take_response(max_len)
                .ok_or(ControlError::NoResponse)?;
            s.counters.ctrl_to_host += 1;
            Ok(packet)
        })?;
        trace!("ctrl: response {:02x?}", packet.as_slice());
        Ok(packet)
    }

    pub fn set_control_line_state(&self, value: u16) -> Result<()> {
        let line = LineState::from_request(value);
        self.with_state(|s| {
            if !s.online {
                return Err(Error::NotConnected);
            }
            s.control.set_line_state(line);
            Ok(())
        })?;
        debug!("ctrl: DTR {}", if line.dtr() { "set" } else { "cleared" });
        Ok(())
    }

    // ── Notification ────────────────────────────────────────────

    fn queue_response(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(ControlError::ZeroLength.into());
        }
        let packet = ControlPacket::from_slice(data)?;
        let notify = self.with_state(|s| {
            if !s.online {
                return Err(Error::NotConnected);
            }
            Ok(s.control.queue_response(packet))
        })?;
        if notify {
            self.send_notification();
        }
        Ok(data.len())
    }

    fn send_notification(&self) {
        let notification = Notification::response_available(self.config.interface_id);
        if let Err(e) = self.transport.notify(&notification) {
            error!("ctrl: notification submit failed: {}", e);
            self.with_state(|s| s.control.notify_submit_failed());
        }
    }

    /// The RESPONSE_AVAILABLE notification finished on the interrupt
    /// endpoint.
    pub fn notify_complete(&self, status: Completion) {
        if let Completion::Failure(code) = status {
            error!("ctrl: notification failed ({})", code);
        }
        let resend = self.with_state(|s| s.control.notify_completed(status));
        if resend {
            self.send_notification();
        }
    }

    // ── Reader ──────────────────────────────────────────────────

    /// Register the backend-side control reader. Only one may exist.
    pub fn open_control(&self) -> Result<ControlReader<'_, T, S, M, E>> {
        if !self.with_state(|s| s.control.register_reader()) {
            return Err(Error::Busy);
        }
        debug!("ctrl: reader registered");
        Ok(ControlReader { relay: self })
    }
}

/// Exclusive handle for the backend end of the control channel. Dropping it
/// releases the registration.
pub struct ControlReader<'a, T, S, M, E> {
    relay: &'a Relay<T, S, M, E>,
}

impl<T, S, M, E> ControlReader<'_, T, S, M, E>
where
    T: BulkTransport,
    S: SdioMux,
    M: SmdChannel,
    E: EventSink,
{
    /// Wait for the next host command and copy it into `buf`.
    ///
    /// Fails with `NotConnected` once the relay goes offline and with
    /// `BufferTooSmall` (packet kept) if `buf` cannot hold the next command.
    /// Dropping the future abandons the wait.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let capacity = buf.len();
        loop {
            let next = self.relay.with_state(|s| {
                if !s.online {
                    return Err(Error::NotConnected);
                }
                let packet = s.control.next_command(capacity)?;
                if packet.is_some() {
                    s.counters.ctrl_to_backend += 1;
                }
                Ok(packet)
            })?;
            if let Some(packet) = next {
                let len = packet.len();
                buf[..len].copy_from_slice(packet.as_slice());
                return Ok(len);
            }
            self.relay.reader_wake.wait().await;
        }
    }

    /// Blocking form of [`read`](Self::read).
    pub fn read_blocking(&self, buf: &mut [u8]) -> Result<usize> {
        futures_lite::future::block_on(self.read(buf))
    }

    /// Queue a response for the host and raise RESPONSE_AVAILABLE.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.relay.queue_response(data)
    }

    /// Line-status bits last set by the host.
    pub fn line_state(&self) -> LineState {
        self.relay.line_state()
    }
}

impl<T, S, M, E> Drop for ControlReader<'_, T, S, M, E> {
    fn drop(&mut self) {
        self.relay.with_state(|s| s.control.release_reader());
    }
}
